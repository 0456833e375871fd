//! Ranker for multi-modal deal similarity
//!
//! Fuses per-modality scores under one weight-profile snapshot, applies the
//! feedback boost and the sector diversity penalty, and orders candidates.

use ahash::{AHashMap, AHashSet};
use dealsim_core::{code_key, DealRepresentation, Error, RetrievedCandidate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::attribution::Attribution;
use crate::scorer::{ModalityScores, Scorer, SectionMatch, METADATA_CEILING};
use crate::weights::WeightProfile;

/// Upper bound of any final score
pub const MAX_FINAL_SCORE: f32 = 1.0 + METADATA_CEILING;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    /// Multiplier applied to a candidate whose sector already holds two slots
    pub diversity_factor: f32,
    pub feedback_step: f32,
    pub feedback_cap: f32,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            diversity_factor: 0.85,
            feedback_step: 0.05,
            feedback_cap: 0.15,
        }
    }
}

/// One candidate scored against one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: String,
    pub sector: String,
    pub year: i32,
    pub s_struct: Option<f32>,
    pub s_text: Option<f32>,
    pub s_meta: f32,
    /// Weighted sum before post-fusion adjustments
    pub s_fused: f32,
    pub s_final: f32,
    /// Weights actually applied, after renormalization for absent modalities
    pub w_struct: f32,
    pub w_text: f32,
    pub profile_version: String,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_section: Option<SectionMatch>,
    pub feedback_boost: f32,
    /// 1.0 unless the diversity penalty was applied
    pub diversity_factor: f32,
    pub conflicting_signals: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

/// A candidate that could not be scored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedCandidate {
    pub id: String,
    pub reason: String,
}

/// Effective weights and fused score for one pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fusion {
    pub w_struct: f32,
    pub w_text: f32,
    pub s_fused: f32,
}

/// `w_struct * s_struct + w_text * s_text + s_meta`, moving the weight of
/// an absent modality onto the present one.
pub fn fuse(scores: &ModalityScores, profile: &WeightProfile) -> Fusion {
    let total = profile.w_struct + profile.w_text;
    let (w_struct, w_text) = match (scores.structured, scores.text) {
        (Some(_), Some(_)) => (profile.w_struct, profile.w_text),
        (Some(_), None) => (total, 0.0),
        (None, Some(_)) => (0.0, total),
        (None, None) => (0.0, 0.0),
    };
    let s_fused = w_struct * scores.structured.unwrap_or(0.0)
        + w_text * scores.text.unwrap_or(0.0)
        + scores.metadata;
    Fusion {
        w_struct,
        w_text,
        s_fused: s_fused.clamp(0.0, MAX_FINAL_SCORE),
    }
}

/// Descending score, then more recent year, then id.
pub fn compare_candidates(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.s_final
        .total_cmp(&a.s_final)
        .then_with(|| b.year.cmp(&a.year))
        .then_with(|| a.id.cmp(&b.id))
}

/// Per-candidate feedback counts relevant to one query
#[derive(Debug, Clone, Default)]
pub struct FeedbackSignals {
    positives: AHashMap<String, u32>,
    rejections: AHashMap<String, u32>,
}

impl FeedbackSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_positive(&mut self, candidate_id: &str) {
        *self.positives.entry(candidate_id.to_string()).or_insert(0) += 1;
    }

    pub fn add_rejection(&mut self, candidate_id: &str) {
        *self.rejections.entry(candidate_id.to_string()).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.positives.is_empty() && self.rejections.is_empty()
    }

    /// Bounded boost minus bounded penalty.
    pub fn adjustment(&self, candidate_id: &str, step: f32, cap: f32) -> f32 {
        let positives = self.positives.get(candidate_id).copied().unwrap_or(0) as f32;
        let rejections = self.rejections.get(candidate_id).copied().unwrap_or(0) as f32;
        (step * positives).min(cap) - (step * rejections).min(cap)
    }
}

#[derive(Debug, Clone)]
pub struct RankOutcome {
    pub ranked: Vec<ScoredCandidate>,
    /// Highest `s_final` among all scored candidates before diversity
    pub max_final: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Ranker {
    config: RankerConfig,
}

impl Ranker {
    pub fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    /// Score every candidate in parallel. Candidates that cannot be compared
    /// are skipped with a reason; duplicates keep their first occurrence.
    pub fn score_candidates(
        &self,
        scorer: &Scorer,
        query: &DealRepresentation,
        candidates: &[RetrievedCandidate],
        profile: &WeightProfile,
    ) -> (Vec<ScoredCandidate>, Vec<SkippedCandidate>) {
        let mut seen = AHashSet::with_capacity(candidates.len());
        let unique: Vec<&RetrievedCandidate> = candidates
            .iter()
            .filter(|c| seen.insert(c.id.as_str()))
            .collect();

        let results: Vec<Result<ScoredCandidate, SkippedCandidate>> = unique
            .par_iter()
            .map(|candidate| {
                let deal = candidate.representation.as_ref();
                match scorer.score(query, deal) {
                    Ok(scores) => Ok(Self::build(&candidate.id, deal, scores, profile)),
                    Err(e) => {
                        if matches!(e, Error::VersionMismatch { .. }) {
                            warn!("Skipping candidate {}: {}", candidate.id, e);
                        } else {
                            debug!("Skipping candidate {}: {}", candidate.id, e);
                        }
                        Err(SkippedCandidate {
                            id: candidate.id.clone(),
                            reason: e.to_string(),
                        })
                    }
                }
            })
            .collect();

        let mut scored = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for result in results {
            match result {
                Ok(s) => scored.push(s),
                Err(s) => skipped.push(s),
            }
        }
        (scored, skipped)
    }

    fn build(id: &str, deal: &DealRepresentation, scores: ModalityScores, profile: &WeightProfile) -> ScoredCandidate {
        let fusion = fuse(&scores, profile);
        ScoredCandidate {
            id: id.to_string(),
            sector: deal.metadata.sector.clone(),
            year: deal.metadata.year,
            partial: scores.is_partial(),
            s_struct: scores.structured,
            s_text: scores.text,
            s_meta: scores.metadata,
            s_fused: fusion.s_fused,
            s_final: fusion.s_fused,
            w_struct: fusion.w_struct,
            w_text: fusion.w_text,
            profile_version: profile.version_id(),
            best_section: scores.best_section,
            feedback_boost: 0.0,
            diversity_factor: 1.0,
            conflicting_signals: false,
            attribution: None,
        }
    }

    /// Apply feedback, sort and cut the diversity-constrained top-k slate.
    pub fn rank(&self, mut scored: Vec<ScoredCandidate>, signals: &FeedbackSignals, k: usize) -> RankOutcome {
        if !signals.is_empty() {
            for candidate in scored.iter_mut() {
                let adjustment =
                    signals.adjustment(&candidate.id, self.config.feedback_step, self.config.feedback_cap);
                if adjustment != 0.0 {
                    candidate.feedback_boost = adjustment;
                    candidate.s_final = (candidate.s_fused + adjustment).clamp(0.0, MAX_FINAL_SCORE);
                }
            }
        }

        scored.sort_by(compare_candidates);
        let max_final = scored.first().map(|c| c.s_final).unwrap_or(0.0);

        let ranked = if k >= 3 {
            self.diversify(scored, k)
        } else {
            scored.truncate(k);
            scored
        };

        RankOutcome { ranked, max_final }
    }

    /// Greedy top-down slate: a candidate whose sector already holds two
    /// slots is penalized once and re-queued; a sector at the cap takes no
    /// further slots. Returns fewer than `k` when the pool runs out.
    fn diversify(&self, sorted: Vec<ScoredCandidate>, k: usize) -> Vec<ScoredCandidate> {
        let cap = k.div_ceil(3);
        let mut pool = sorted;
        let mut slate: Vec<ScoredCandidate> = Vec::with_capacity(k);
        let mut per_sector: AHashMap<String, usize> = AHashMap::new();

        while slate.len() < k && !pool.is_empty() {
            let mut candidate = pool.remove(0);
            let sector = code_key(&candidate.sector);
            let taken = per_sector.get(&sector).copied().unwrap_or(0);

            if taken >= cap {
                continue;
            }
            if taken >= 2 && candidate.diversity_factor == 1.0 {
                candidate.diversity_factor = self.config.diversity_factor;
                candidate.s_final *= self.config.diversity_factor;
                let at = pool
                    .binary_search_by(|other| compare_candidates(other, &candidate))
                    .unwrap_or_else(|i| i);
                pool.insert(at, candidate);
                continue;
            }

            *per_sector.entry(sector).or_insert(0) += 1;
            slate.push(candidate);
        }

        slate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimilarityContext;
    use dealsim_core::{DealMetadata, Vector};
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    fn scored(id: &str, sector: &str, year: i32, s: f32) -> ScoredCandidate {
        ScoredCandidate {
            id: id.to_string(),
            sector: sector.to_string(),
            year,
            s_struct: Some(s),
            s_text: Some(s),
            s_meta: 0.0,
            s_fused: s,
            s_final: s,
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

    fn deal(id: &str, structured: Option<Vec<f32>>, text: Option<Vec<f32>>) -> DealRepresentation {
        let mut sections = BTreeMap::new();
        if let Some(t) = text {
            sections.insert("overview".to_string(), Vector::new(t));
        }
        DealRepresentation {
            id: id.to_string(),
            structured: structured.map(Vector::new),
            imputed_fields: Vec::new(),
            text: sections,
            absent_sections: BTreeSet::new(),
            metadata: DealMetadata::new("SaaS", "US", "Growth", 2020),
            version: "v1".to_string(),
        }
    }

    #[test]
    fn test_fusion_worked_example() {
        let scores = ModalityScores {
            structured: Some(0.85),
            text: Some(0.78),
            metadata: 0.15,
            best_section: None,
        };
        let profile = WeightProfile::preset(SimilarityContext::Default);
        let fusion = fuse(&scores, &profile);
        assert!((fusion.s_fused - 0.958).abs() < 1e-5, "got {}", fusion.s_fused);
    }

    #[test]
    fn test_fusion_renormalizes_absent_modality() {
        let scores = ModalityScores {
            structured: None,
            text: Some(0.8),
            metadata: 0.1,
            best_section: None,
        };
        let profile = WeightProfile::preset(SimilarityContext::Default);
        let fusion = fuse(&scores, &profile);
        assert_eq!(fusion.w_struct, 0.0);
        assert!((fusion.w_text - 1.0).abs() < 1e-6);
        assert!((fusion.s_fused - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_tie_break_year_then_id() {
        let ranker = Ranker::default();
        let candidates = vec![
            scored("b", "A", 2020, 0.9),
            scored("a", "B", 2020, 0.9),
            scored("c", "C", 2022, 0.9),
        ];
        let outcome = ranker.rank(candidates, &FeedbackSignals::new(), 3);
        let ids: Vec<_> = outcome.ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_feedback_boost_bounded_and_floored() {
        let ranker = Ranker::default();
        let mut signals = FeedbackSignals::new();
        for _ in 0..5 {
            signals.add_positive("low");
        }
        for _ in 0..4 {
            signals.add_rejection("zero");
        }
        let outcome = ranker.rank(
            vec![scored("high", "A", 2020, 0.9), scored("low", "B", 2020, 0.8), scored("zero", "C", 2020, 0.1)],
            &signals,
            3,
        );
        let low = outcome.ranked.iter().find(|c| c.id == "low").unwrap();
        assert!((low.s_final - 0.95).abs() < 1e-6);
        assert_eq!(outcome.ranked[0].id, "low");
        let zero = outcome.ranked.iter().find(|c| c.id == "zero").unwrap();
        assert_eq!(zero.s_final, 0.0);
    }

    #[test]
    fn test_diversity_cap() {
        let ranker = Ranker::default();
        let mut candidates: Vec<_> = (0..8)
            .map(|i| scored(&format!("saas-{i}"), "SaaS", 2020, 0.95 - i as f32 * 0.01))
            .collect();
        candidates.push(scored("fin-1", "Fintech", 2020, 0.6));
        candidates.push(scored("fin-2", "Fintech", 2020, 0.55));
        candidates.push(scored("hc-1", "Health", 2020, 0.5));
        candidates.push(scored("ind-1", "Industrials", 2020, 0.45));

        let k = 6;
        let outcome = ranker.rank(candidates, &FeedbackSignals::new(), k);
        assert_eq!(outcome.ranked.len(), k);
        let saas = outcome.ranked.iter().filter(|c| c.sector == "SaaS").count();
        assert!(saas <= 2, "SaaS holds {} slots", saas);
        assert!((outcome.max_final - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_diversity_cap_ignores_sector_case() {
        let ranker = Ranker::default();
        let candidates = vec![
            scored("a", "SaaS", 2020, 0.9),
            scored("b", "saas", 2020, 0.89),
            scored("c", "SAAS", 2020, 0.88),
            scored("d", "Retail", 2020, 0.5),
            scored("e", "Fintech", 2020, 0.4),
        ];
        let outcome = ranker.rank(candidates, &FeedbackSignals::new(), 3);
        let ids: Vec<_> = outcome.ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d", "e"]);
    }

    #[test]
    fn test_third_same_sector_penalized() {
        let ranker = Ranker::default();
        let candidates = vec![
            scored("a", "SaaS", 2020, 0.9),
            scored("b", "SaaS", 2020, 0.89),
            scored("c", "SaaS", 2020, 0.88),
            scored("d", "Retail", 2020, 0.7),
        ];
        let outcome = ranker.rank(candidates, &FeedbackSignals::new(), 9);
        let c = outcome.ranked.iter().find(|x| x.id == "c").unwrap();
        assert_eq!(c.diversity_factor, 0.85);
        assert!((c.s_final - 0.88 * 0.85).abs() < 1e-6);
        // 0.748 still beats the retail candidate
        assert_eq!(outcome.ranked[2].id, "c");
    }

    #[test]
    fn test_short_pool_returns_short_slate() {
        let ranker = Ranker::default();
        let candidates: Vec<_> = (0..5)
            .map(|i| scored(&format!("s{i}"), "SaaS", 2020, 0.9))
            .collect();
        let outcome = ranker.rank(candidates, &FeedbackSignals::new(), 3);
        assert_eq!(outcome.ranked.len(), 1);
    }

    #[test]
    fn test_score_candidates_skips_incomparable() {
        let ranker = Ranker::default();
        let scorer = Scorer::default();
        let query = deal("q", Some(vec![0.0, 0.0]), None);
        let candidates = vec![
            RetrievedCandidate {
                id: "ok".to_string(),
                representation: Arc::new(deal("ok", Some(vec![0.1, 0.0]), None)),
                approx_distance: 0.1,
            },
            RetrievedCandidate {
                id: "text-only".to_string(),
                representation: Arc::new(deal("text-only", None, Some(vec![1.0, 0.0]))),
                approx_distance: 0.2,
            },
            RetrievedCandidate {
                id: "ok".to_string(),
                representation: Arc::new(deal("ok", Some(vec![0.1, 0.0]), None)),
                approx_distance: 0.1,
            },
        ];
        let profile = WeightProfile::preset(SimilarityContext::Default);
        let (scored, skipped) = ranker.score_candidates(&scorer, &query, &candidates, &profile);
        assert_eq!(scored.len(), 1);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].id, "text-only");
        assert_eq!(scored[0].profile_version, "default@v1");
        assert!(scored[0].partial);
    }
}
