//! Fallback / escalation policy
//!
//! Per-query state machine `Normal -> AdjacentSearch -> Escalated`. The
//! policy only decides; re-retrieval and ticketing are driven by the caller.

use serde::{Deserialize, Serialize};

use crate::ranker::ScoredCandidate;

pub const LIMITED_COMPS: &str = "limited comps";
pub const CONFLICTING_SIGNALS: &str = "conflicting signals";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub confidence_threshold: f32,
    /// Fewer confident results than this also triggers the adjacent search
    pub min_confident: usize,
    pub divergence: f32,
    /// Both modality scores must exceed this for a divergence to count
    pub divergence_floor: f32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            min_confident: 3,
            divergence: 0.4,
            divergence_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackState {
    #[default]
    Normal,
    AdjacentSearch,
    Escalated,
}

/// Confidence of one ranked slate against a threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confidence {
    pub max_final: f32,
    pub confident: usize,
    pub threshold: f32,
}

impl Confidence {
    /// The result-set fallback flag: nothing clears the threshold.
    pub fn is_low(&self) -> bool {
        self.max_final < self.threshold
    }
}

/// Fallback metadata attached to a result set
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FallbackInfo {
    pub state: FallbackState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expanded_sectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_ticket: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FallbackPolicy {
    config: FallbackConfig,
}

impl FallbackPolicy {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    pub fn assess(&self, ranked: &[ScoredCandidate], max_final: f32, threshold: f32) -> Confidence {
        Confidence {
            max_final,
            confident: ranked.iter().filter(|c| c.s_final >= threshold).count(),
            threshold,
        }
    }

    /// Next state after observing `confidence` in `state`.
    pub fn next_state(&self, state: FallbackState, confidence: &Confidence) -> FallbackState {
        match state {
            FallbackState::Normal => {
                if confidence.is_low() || confidence.confident < self.config.min_confident {
                    FallbackState::AdjacentSearch
                } else {
                    FallbackState::Normal
                }
            }
            FallbackState::AdjacentSearch => {
                if confidence.is_low() {
                    FallbackState::Escalated
                } else {
                    FallbackState::AdjacentSearch
                }
            }
            FallbackState::Escalated => FallbackState::Escalated,
        }
    }

    pub fn is_conflicting(&self, candidate: &ScoredCandidate) -> bool {
        match (candidate.s_struct, candidate.s_text) {
            (Some(s), Some(t)) => {
                s > self.config.divergence_floor
                    && t > self.config.divergence_floor
                    && (s - t).abs() > self.config.divergence
            }
            _ => false,
        }
    }

    /// Flag divergent candidates; returns how many were flagged.
    pub fn flag_conflicts(&self, ranked: &mut [ScoredCandidate]) -> usize {
        let mut flagged = 0;
        for candidate in ranked.iter_mut() {
            candidate.conflicting_signals = self.is_conflicting(candidate);
            if candidate.conflicting_signals {
                flagged += 1;
            }
        }
        flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(s_struct: Option<f32>, s_text: Option<f32>, s_final: f32) -> ScoredCandidate {
        ScoredCandidate {
            id: "c".to_string(),
            sector: "SaaS".to_string(),
            year: 2020,
            s_struct,
            s_text,
            s_meta: 0.0,
            s_fused: s_final,
            s_final,
            w_struct: 0.4,
            w_text: 0.6,
            profile_version: "default@v1".to_string(),
            partial: false,
            best_section: None,
            feedback_boost: 0.0,
            diversity_factor: 1.0,
            conflicting_signals: false,
            attribution: None,
        }
    }

    #[test]
    fn test_low_confidence_moves_to_adjacent() {
        let policy = FallbackPolicy::default();
        let ranked = vec![candidate(Some(0.5), Some(0.5), 0.55)];
        let confidence = policy.assess(&ranked, 0.55, 0.6);
        assert!(confidence.is_low());
        assert_eq!(
            policy.next_state(FallbackState::Normal, &confidence),
            FallbackState::AdjacentSearch
        );
        assert_eq!(
            policy.next_state(FallbackState::AdjacentSearch, &confidence),
            FallbackState::Escalated
        );
    }

    #[test]
    fn test_few_confident_results_retry_without_escalating() {
        let policy = FallbackPolicy::default();
        let ranked = vec![candidate(None, Some(0.9), 0.9), candidate(None, Some(0.3), 0.3)];
        let confidence = policy.assess(&ranked, 0.9, 0.6);
        assert!(!confidence.is_low());
        assert_eq!(confidence.confident, 1);
        assert_eq!(
            policy.next_state(FallbackState::Normal, &confidence),
            FallbackState::AdjacentSearch
        );
        assert_eq!(
            policy.next_state(FallbackState::AdjacentSearch, &confidence),
            FallbackState::AdjacentSearch
        );
    }

    #[test]
    fn test_confident_stays_normal() {
        let policy = FallbackPolicy::default();
        let ranked: Vec<_> = (0..3).map(|_| candidate(Some(0.9), Some(0.9), 1.5)).collect();
        let confidence = policy.assess(&ranked, 1.5, 0.6);
        assert_eq!(policy.next_state(FallbackState::Normal, &confidence), FallbackState::Normal);
    }

    #[test]
    fn test_flag_flips_with_max_score() {
        let policy = FallbackPolicy::default();
        let below = policy.assess(&[], 0.59, 0.6);
        let above = policy.assess(&[], 0.61, 0.6);
        assert!(below.is_low());
        assert!(!above.is_low());
    }

    #[test]
    fn test_conflicting_signals() {
        let policy = FallbackPolicy::default();
        assert!(policy.is_conflicting(&candidate(Some(0.98), Some(0.55), 1.0)));
        assert!(!policy.is_conflicting(&candidate(Some(0.98), Some(0.45), 1.0)));
        assert!(!policy.is_conflicting(&candidate(Some(0.9), Some(0.6), 1.0)));
        assert!(!policy.is_conflicting(&candidate(None, Some(0.9), 1.0)));

        let mut ranked = vec![candidate(Some(0.98), Some(0.55), 1.0), candidate(Some(0.7), Some(0.7), 1.0)];
        assert_eq!(policy.flag_conflicts(&mut ranked), 1);
        assert!(ranked[0].conflicting_signals);
    }
}
