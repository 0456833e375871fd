//! # dealsim Core
//!
//! Core data model for the dealsim similar-deal engine.
//!
//! - [`DealRepresentation`] - structured vector, section text vectors and metadata of one deal
//! - [`Normalizer`] - validates raw input against a [`RepresentationScheme`]
//! - [`CandidateFilter`] - sector / year / outcome predicates for candidate retrieval
//! - [`CandidateStore`] - the vector/metadata store contract, with [`InMemoryDealStore`]
//!
//! ## Example
//!
//! ```rust
//! use dealsim_core::{DealMetadata, Normalizer, RawRepresentation, RepresentationScheme};
//!
//! let normalizer = Normalizer::new(RepresentationScheme::new("v1", 2, 3));
//! let raw = RawRepresentation {
//!     id: Some("deal-1".to_string()),
//!     structured: Some(vec![Some(7.0), None]),
//!     metadata: DealMetadata::new("SaaS", "US", "Growth", 2023),
//!     ..Default::default()
//! };
//! let deal = normalizer.normalize(raw).unwrap();
//! assert_eq!(deal.imputed_fields, vec![1]);
//! ```

pub mod error;
pub mod filter;
pub mod normalizer;
pub mod representation;
pub mod store;
pub mod vector;

pub use error::{Error, Result};
pub use filter::{CandidateFilter, Filter, FilterCondition};
pub use normalizer::Normalizer;
pub use representation::{
    code_key, sections, DealMetadata, DealRepresentation, Modality, Outcome, RawRepresentation,
    RepresentationScheme,
};
pub use store::{CandidateStore, InMemoryDealStore, RetrievedCandidate};
pub use vector::Vector;
