//! Per-modality similarity
//!
//! Every score is in [0, 1] except `s_meta`, which is bounded by
//! [`METADATA_CEILING`]. A missing modality is reported as
//! [`Error::MissingModality`] so the ranker can renormalize instead of
//! comparing against zeros.

use dealsim_core::{DealMetadata, DealRepresentation, Error, Modality, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adjacency::{AdjacencyTable, SectorAdjacency};

pub const SECTOR_WEIGHT: f32 = 0.2;
pub const GEO_WEIGHT: f32 = 0.1;
/// Years over which the temporal term decays by 1/e
pub const YEAR_DECAY: f32 = 5.0;
/// Upper bound of `s_meta`: sector + geography + temporal term
pub const METADATA_CEILING: f32 = SECTOR_WEIGHT + GEO_WEIGHT + 1.0;

/// `1 - ||a - b|| / sqrt(d)`, floored at 0.
pub fn structured_similarity(a: &DealRepresentation, b: &DealRepresentation) -> Result<f32> {
    let (Some(va), Some(vb)) = (&a.structured, &b.structured) else {
        return Err(Error::MissingModality(Modality::Structured));
    };
    let distance = va.l2_distance(vb).ok_or_else(|| Error::InvalidDimension {
        field: "structured".to_string(),
        expected: va.dim(),
        actual: vb.dim(),
    })?;
    if va.is_empty() {
        return Err(Error::MissingModality(Modality::Structured));
    }
    let d = va.dim() as f32;
    Ok((1.0 - distance / d.sqrt()).clamp(0.0, 1.0))
}

/// Cosine of the primary text vectors remapped to [0, 1].
pub fn text_similarity(a: &DealRepresentation, b: &DealRepresentation) -> Result<f32> {
    let (Some((_, va)), Some((_, vb))) = (a.primary_text(), b.primary_text()) else {
        return Err(Error::MissingModality(Modality::Text));
    };
    remapped_cosine(va, vb)
}

fn remapped_cosine(a: &dealsim_core::Vector, b: &dealsim_core::Vector) -> Result<f32> {
    if a.dim() != b.dim() {
        return Err(Error::InvalidDimension {
            field: "text".to_string(),
            expected: a.dim(),
            actual: b.dim(),
        });
    }
    let cos = a
        .cosine_similarity(b)
        .ok_or(Error::MissingModality(Modality::Text))?;
    Ok(((cos + 1.0) / 2.0).clamp(0.0, 1.0))
}

/// `0.2 * sector + 0.1 * geo + exp(-|dyear| / 5)`
pub fn metadata_similarity(a: &DealMetadata, b: &DealMetadata, adjacency: &dyn SectorAdjacency) -> f32 {
    let sector = adjacency.affinity(&a.sector, &b.sector).clamp(0.0, 1.0);
    let geo = if a.same_geography(b) {
        1.0
    } else {
        0.0
    };
    let dyear = (a.year - b.year).unsigned_abs() as f32;
    SECTOR_WEIGHT * sector + GEO_WEIGHT * geo + (-dyear / YEAR_DECAY).exp()
}

/// Best-matching text section shared by both sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionMatch {
    pub label: String,
    pub score: f32,
}

/// Per-section remapped cosine over the labels both sides carry, best first.
///
/// When no label is shared the primary vectors are compared under the
/// query's primary label.
pub fn section_similarities(a: &DealRepresentation, b: &DealRepresentation) -> Vec<SectionMatch> {
    let mut out: Vec<SectionMatch> = a
        .text
        .iter()
        .filter_map(|(label, va)| {
            let vb = b.section(label)?;
            let score = remapped_cosine(va, vb).ok()?;
            Some(SectionMatch {
                label: label.clone(),
                score,
            })
        })
        .collect();

    if out.is_empty() {
        if let (Some((label, _)), Ok(score)) = (a.primary_text(), text_similarity(a, b)) {
            out.push(SectionMatch {
                label: label.to_string(),
                score,
            });
        }
    }

    out.sort_by(|x, y| y.score.total_cmp(&x.score).then_with(|| x.label.cmp(&y.label)));
    out
}

/// Raw per-modality scores for one query/candidate pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityScores {
    pub structured: Option<f32>,
    pub text: Option<f32>,
    pub metadata: f32,
    pub best_section: Option<SectionMatch>,
}

impl ModalityScores {
    pub fn is_partial(&self) -> bool {
        self.structured.is_none() || self.text.is_none()
    }
}

#[derive(Clone)]
pub struct Scorer {
    adjacency: Arc<dyn SectorAdjacency>,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(Arc::new(AdjacencyTable::standard()))
    }
}

impl Scorer {
    pub fn new(adjacency: Arc<dyn SectorAdjacency>) -> Self {
        Self { adjacency }
    }

    pub fn adjacency(&self) -> &Arc<dyn SectorAdjacency> {
        &self.adjacency
    }

    /// Score a candidate against the query.
    ///
    /// Fails with `VersionMismatch` on incompatible versions and with
    /// `IncompleteRepresentation` when neither structured nor text signal
    /// can be compared.
    pub fn score(&self, query: &DealRepresentation, candidate: &DealRepresentation) -> Result<ModalityScores> {
        if query.version != candidate.version {
            return Err(Error::VersionMismatch {
                expected: query.version.clone(),
                actual: candidate.version.clone(),
            });
        }

        let structured = recover_missing(structured_similarity(query, candidate))?;
        let text = recover_missing(text_similarity(query, candidate))?;

        if structured.is_none() && text.is_none() {
            return Err(Error::IncompleteRepresentation {
                id: candidate.id.clone(),
                reason: "no modality comparable with the query".to_string(),
            });
        }

        let best_section = if text.is_some() {
            section_similarities(query, candidate).into_iter().next()
        } else {
            None
        };

        Ok(ModalityScores {
            structured,
            text,
            metadata: metadata_similarity(&query.metadata, &candidate.metadata, self.adjacency.as_ref()),
            best_section,
        })
    }
}

fn recover_missing(score: Result<f32>) -> Result<Option<f32>> {
    match score {
        Ok(s) => Ok(Some(s)),
        Err(Error::MissingModality(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
