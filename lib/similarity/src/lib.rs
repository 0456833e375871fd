//! # dealsim Similarity
//!
//! Multi-modal similarity scoring and ranking for deal representations.
//!
//! ## Features
//!
//! - **Scorer**: structured, text and metadata similarity with explicit missing-modality handling
//! - **Contexts and weight profiles**: versioned, immutable `{w_struct, w_text}` per context or caller
//! - **Ranker**: weighted fusion with renormalization, feedback boost and sector diversity
//! - **Fallback policy**: low-confidence detection and the adjacent-search / escalation state machine
//! - **Attribution**: per-modality breakdown of every final score
//!
//! ## Example
//!
//! ```rust
//! use dealsim_similarity::{fuse, ModalityScores, SimilarityContext, WeightProfile};
//!
//! let scores = ModalityScores { structured: Some(0.85), text: Some(0.78), metadata: 0.15, best_section: None };
//! let profile = WeightProfile::preset(SimilarityContext::Default);
//! let fusion = fuse(&scores, &profile);
//! assert!((fusion.s_fused - 0.958).abs() < 1e-5);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! query ──> Scorer ──> Ranker ──> FallbackPolicy ──> Attribution
//!              ^          ^
//!   adjacency ─┘          └── WeightResolver <── ProfileSource
//! ```

pub mod adjacency;
pub mod attribution;
pub mod context;
pub mod fallback;
pub mod ranker;
pub mod resolver;
pub mod result;
pub mod scorer;
pub mod weights;

pub use adjacency::{AdjacencyEdge, AdjacencyTable, SectorAdjacency};
pub use attribution::{annotate, Attribution, ModalityContribution, ResultStats};
pub use context::{validate_caller_id, ProfileKey, SimilarityContext};
pub use fallback::{
    Confidence, FallbackConfig, FallbackInfo, FallbackPolicy, FallbackState, CONFLICTING_SIGNALS,
    LIMITED_COMPS,
};
pub use ranker::{
    compare_candidates, fuse, FeedbackSignals, Fusion, RankOutcome, Ranker, RankerConfig,
    ScoredCandidate, SkippedCandidate, MAX_FINAL_SCORE,
};
pub use resolver::{ProfileSource, ResolvedProfile, StaticProfiles, WeightResolver};
pub use result::{RankedResultSet, RETRIEVAL_TIMEOUT_WARNING};
pub use scorer::{
    metadata_similarity, section_similarities, structured_similarity, text_similarity,
    ModalityScores, Scorer, SectionMatch, METADATA_CEILING,
};
pub use weights::{preset_weights, project_weights, validate_weights, WeightError, WeightProfile};
