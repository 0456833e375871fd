use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribution::ResultStats;
use crate::context::SimilarityContext;
use crate::fallback::FallbackInfo;
use crate::ranker::{ScoredCandidate, SkippedCandidate};

pub const RETRIEVAL_TIMEOUT_WARNING: &str = "retrieval_timeout";

/// Ordered result of one search; produced per query, never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResultSet {
    pub query_id: String,
    pub context: SimilarityContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    pub profile_version: String,
    pub candidates: Vec<ScoredCandidate>,
    pub max_final: f32,
    pub threshold: f32,
    /// Set when no candidate clears the confidence threshold
    pub low_confidence: bool,
    pub fallback: FallbackInfo,
    /// Degradations such as a timed-out retrieval
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedCandidate>,
    pub stats: ResultStats,
    pub created_at: DateTime<Utc>,
}

impl RankedResultSet {
    pub fn candidate(&self, candidate_id: &str) -> Option<&ScoredCandidate> {
        self.candidates.iter().find(|c| c.id == candidate_id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}
