//! # dealsim
//!
//! Explainable similar-deal retrieval.
//!
//! Given a new opportunity (a structured financial profile, document-section
//! embeddings and categorical metadata), dealsim retrieves historical deals,
//! scores them per modality, fuses the scores under a context-specific
//! weight profile and returns an ordered, attributed result set. Analyst
//! feedback is logged and periodically turned into new weight-profile
//! versions.
//!
//! ## Quick Start
//!
//! ### As a Server
//!
//! ```bash
//! dealsim --data-dir ./data --http-port 7333 --struct-dim 8 --text-dim 384
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use dealsim::prelude::*;
//!
//! # async fn run() -> dealsim::Result<()> {
//! let service = SimilarityService::open(ServiceConfig::default())?;
//! let result = service
//!     .search(SearchRequest {
//!         query: RawRepresentation {
//!             structured: Some(vec![Some(7.0), Some(0.3)]),
//!             metadata: DealMetadata::new("SaaS", "US", "Growth", 2024),
//!             ..Default::default()
//!         },
//!         context: Some("screening".to_string()),
//!         ..Default::default()
//!     })
//!     .await?;
//! for candidate in &result.candidates {
//!     println!("{} {:.3}", candidate.id, candidate.s_final);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - `dealsim-core` - representations, normalizer, filters, candidate store contract
//! - `dealsim-similarity` - scorer, weight profiles, ranker, fallback policy, attribution
//! - `dealsim-storage` - feedback log, LMDB weight registry, tuning job and scheduler
//! - `dealsim-api` - query orchestration service and REST API

pub use dealsim_core::{
    CandidateFilter, CandidateStore, DealMetadata, DealRepresentation, Error, FilterCondition,
    InMemoryDealStore, Normalizer, Outcome, RawRepresentation, RepresentationScheme, Result,
    RetrievedCandidate, Vector,
};

pub use dealsim_similarity::{
    AdjacencyTable, Attribution, FallbackState, RankedResultSet, Ranker, ScoredCandidate, Scorer,
    SectorAdjacency, SimilarityContext, WeightProfile,
};

pub use dealsim_storage::{
    FeedbackEvent, FeedbackLabel, FeedbackLog, TuningConfig, TuningJob, TuningScheduler, WeightRegistry,
};

pub use dealsim_api::{
    FeedbackRequest, RestApi, SearchRequest, ServiceConfig, SimilarityService,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Attribution, CandidateFilter, DealMetadata, DealRepresentation, Error, FeedbackLabel,
        FeedbackRequest, RankedResultSet, RawRepresentation, Result, ScoredCandidate,
        SearchRequest, ServiceConfig, SimilarityContext, SimilarityService, WeightProfile,
    };
}
