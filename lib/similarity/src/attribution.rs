//! Attribution for ranked deal results
//!
//! Decomposes a final score into per-modality raw score, applied weight and
//! contribution. Absent modalities render as `not_available`, never as zero.

use dealsim_core::Modality;
use serde::{Deserialize, Serialize};

use crate::fallback::CONFLICTING_SIGNALS;
use crate::ranker::ScoredCandidate;
use crate::scorer::SectionMatch;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModalityContribution {
    Available {
        raw: f32,
        weight: f32,
        contribution: f32,
    },
    NotAvailable,
}

impl ModalityContribution {
    fn weighted(raw: Option<f32>, weight: f32) -> Self {
        match raw {
            Some(raw) => ModalityContribution::Available {
                raw,
                weight,
                contribution: raw * weight,
            },
            None => ModalityContribution::NotAvailable,
        }
    }

    pub fn contribution(&self) -> Option<f32> {
        match self {
            ModalityContribution::Available { contribution, .. } => Some(*contribution),
            ModalityContribution::NotAvailable => None,
        }
    }
}

/// Per-candidate score breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub candidate_id: String,
    pub profile_version: String,
    pub structured: ModalityContribution,
    pub text: ModalityContribution,
    pub metadata: ModalityContribution,
    /// Section that matched best, for highlighting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_section: Option<SectionMatch>,
    pub feedback_boost: f32,
    pub diversity_factor: f32,
    pub s_final: f32,
    pub partial: bool,
    pub conflicting_signals: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Attribution {
    pub fn from_candidate(candidate: &ScoredCandidate) -> Self {
        let mut notes = Vec::new();
        if candidate.partial {
            let missing = match (candidate.s_struct, candidate.s_text) {
                (None, _) => Modality::Structured,
                _ => Modality::Text,
            };
            notes.push(format!("partial: {missing} signal not available, weight moved"));
        }
        if candidate.conflicting_signals {
            notes.push(CONFLICTING_SIGNALS.to_string());
        }
        if candidate.diversity_factor < 1.0 {
            notes.push(format!("diversity penalty x{:.2}", candidate.diversity_factor));
        }

        Self {
            candidate_id: candidate.id.clone(),
            profile_version: candidate.profile_version.clone(),
            structured: ModalityContribution::weighted(candidate.s_struct, candidate.w_struct),
            text: ModalityContribution::weighted(candidate.s_text, candidate.w_text),
            metadata: ModalityContribution::weighted(Some(candidate.s_meta), 1.0),
            best_section: candidate.best_section.clone(),
            feedback_boost: candidate.feedback_boost,
            diversity_factor: candidate.diversity_factor,
            s_final: candidate.s_final,
            partial: candidate.partial,
            conflicting_signals: candidate.conflicting_signals,
            notes,
        }
    }

    /// Modality with the largest contribution.
    pub fn top_modality(&self) -> Option<Modality> {
        [
            (Modality::Structured, self.structured.contribution()),
            (Modality::Text, self.text.contribution()),
            (Modality::Metadata, self.metadata.contribution()),
        ]
        .into_iter()
        .filter_map(|(m, c)| c.map(|c| (m, c)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(m, _)| m)
    }

    /// One-line human readable form.
    pub fn summary(&self) -> String {
        let part = |name: &str, c: &ModalityContribution| match c {
            ModalityContribution::Available {
                raw,
                weight,
                contribution,
            } => format!("{name} {raw:.3} x {weight:.2} = {contribution:.3}"),
            ModalityContribution::NotAvailable => format!("{name} n/a"),
        };
        let mut line = format!(
            "{}; {}; {}",
            part("structured", &self.structured),
            part("text", &self.text),
            part("metadata", &self.metadata)
        );
        if self.feedback_boost != 0.0 {
            line.push_str(&format!("; feedback {:+.3}", self.feedback_boost));
        }
        line.push_str(&format!(" => {:.3}", self.s_final));
        line
    }
}

/// Attach an attribution to every candidate in the slate.
pub fn annotate(ranked: &mut [ScoredCandidate]) {
    for candidate in ranked.iter_mut() {
        candidate.attribution = Some(Attribution::from_candidate(candidate));
    }
}

/// Summary statistics for one result set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultStats {
    pub candidates_considered: usize,
    pub results_count: usize,
    pub skipped_count: usize,
    pub avg_score: f32,
    pub best_score: f32,
    /// Modality that contributed most to the best result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_modality: Option<Modality>,
}

impl ResultStats {
    /// `ranked` must already be sorted best first.
    pub fn compute(ranked: &[ScoredCandidate], candidates_considered: usize, skipped_count: usize) -> Self {
        let Some(best) = ranked.first() else {
            return Self {
                candidates_considered,
                skipped_count,
                ..Default::default()
            };
        };

        let avg_score = ranked.iter().map(|c| c.s_final).sum::<f32>() / ranked.len() as f32;
        let top_modality = best
            .attribution
            .clone()
            .unwrap_or_else(|| Attribution::from_candidate(best))
            .top_modality();

        Self {
            candidates_considered,
            results_count: ranked.len(),
            skipped_count,
            avg_score,
            best_score: best.s_final,
            top_modality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(s_struct: Option<f32>, s_text: Option<f32>, s_meta: f32, w: (f32, f32)) -> ScoredCandidate {
        let s_final = w.0 * s_struct.unwrap_or(0.0) + w.1 * s_text.unwrap_or(0.0) + s_meta;
        ScoredCandidate {
            id: "deal-a".to_string(),
            sector: "SaaS".to_string(),
            year: 2021,
            s_struct,
            s_text,
            s_meta,
            s_fused: s_final,
            s_final,
            w_struct: w.0,
            w_text: w.1,
            profile_version: "default@v1".to_string(),
            partial: s_struct.is_none() || s_text.is_none(),
            best_section: None,
            feedback_boost: 0.0,
            diversity_factor: 1.0,
            conflicting_signals: false,
            attribution: None,
        }
    }

    #[test]
    fn test_worked_example_breakdown() {
        let c = candidate(Some(0.85), Some(0.78), 0.15, (0.4, 0.6));
        let a = Attribution::from_candidate(&c);

        let terms: Vec<f32> = [a.structured, a.text, a.metadata]
            .iter()
            .map(|m| m.contribution().unwrap())
            .collect();
        assert!((terms[0] - 0.34).abs() < 1e-6);
        assert!((terms[1] - 0.468).abs() < 1e-6);
        assert!((terms[2] - 0.15).abs() < 1e-6);
        assert!((a.s_final - 0.958).abs() < 1e-5);
        assert_eq!(a.top_modality(), Some(Modality::Text));
        assert!(a.summary().ends_with("=> 0.958"));
    }

    #[test]
    fn test_missing_modality_not_available() {
        let c = candidate(None, Some(0.9), 0.2, (0.0, 1.0));
        let a = Attribution::from_candidate(&c);
        assert_eq!(a.structured, ModalityContribution::NotAvailable);
        assert!(a.partial);
        assert!(a.notes[0].starts_with("partial: structured"));

        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["structured"]["status"], "not_available");
        assert_eq!(json["text"]["status"], "available");
    }

    #[test]
    fn test_stats() {
        let mut ranked = vec![
            candidate(Some(0.9), Some(0.9), 0.2, (0.7, 0.3)),
            candidate(Some(0.5), Some(0.5), 0.2, (0.7, 0.3)),
        ];
        annotate(&mut ranked);
        let stats = ResultStats::compute(&ranked, 10, 1);
        assert_eq!(stats.results_count, 2);
        assert_eq!(stats.top_modality, Some(Modality::Structured));
        assert!((stats.best_score - 1.1).abs() < 1e-5);
        assert!((stats.avg_score - 0.9).abs() < 1e-5);

        let empty = ResultStats::compute(&[], 4, 4);
        assert_eq!(empty.best_score, 0.0);
        assert_eq!(empty.skipped_count, 4);
    }
}
