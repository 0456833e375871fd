//! Deal representations
//!
//! A [`DealRepresentation`] is the immutable, multi-part view of one deal:
//! a pre-normalized structured feature vector, zero or more text vectors
//! keyed by source section, and categorical metadata. It is stamped with the
//! representation-version of the scheme that produced it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::vector::Vector;

/// Section labels produced by the document pipeline.
pub mod sections {
    pub const OVERVIEW: &str = "overview";
    pub const MEMO: &str = "memo";
    pub const BUSINESS: &str = "business";
    pub const MARKET: &str = "market";
    pub const FINANCIAL: &str = "financial";
    pub const NOTES: &str = "notes";

    /// Primary-vector priority: investment memo, business overview, CIM overall.
    pub const PRIMARY_PRIORITY: [&str; 3] = [MEMO, BUSINESS, OVERVIEW];
}

/// One comparable facet of a representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Structured,
    Text,
    Metadata,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modality::Structured => "structured",
            Modality::Text => "text",
            Modality::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// Outcome of a historical deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Invested,
    Passed,
    Exited,
    WrittenOff,
    #[default]
    Unknown,
}

/// Comparison form of a sector, geography or deal-type code. Stored codes
/// keep their original case for display.
pub fn code_key(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Categorical metadata; mandatory on every representation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DealMetadata {
    pub sector: String,
    pub geography: String,
    pub deal_type: String,
    pub year: i32,
    #[serde(default)]
    pub outcome: Outcome,
}

impl DealMetadata {
    pub fn new(sector: &str, geography: &str, deal_type: &str, year: i32) -> Self {
        Self {
            sector: sector.to_string(),
            geography: geography.to_string(),
            deal_type: deal_type.to_string(),
            year,
            outcome: Outcome::Unknown,
        }
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn same_sector(&self, other: &DealMetadata) -> bool {
        code_key(&self.sector) == code_key(&other.sector)
    }

    pub fn same_geography(&self, other: &DealMetadata) -> bool {
        code_key(&self.geography) == code_key(&other.geography)
    }

    #[must_use]
    pub(crate) fn trimmed(mut self) -> Self {
        for code in [&mut self.sector, &mut self.geography, &mut self.deal_type] {
            let trimmed = code.trim();
            if trimmed.len() != code.len() {
                *code = trimmed.to_string();
            }
        }
        self
    }
}

/// A complete (normalized) deal representation.
///
/// Presence is explicit: an absent structured vector is `None` and absent
/// text sections are listed in `absent_sections`, never stored as zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealRepresentation {
    pub id: String,
    pub structured: Option<Vector>,
    /// Structured feature indices that were imputed by the normalizer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imputed_fields: Vec<usize>,
    #[serde(default)]
    pub text: BTreeMap<String, Vector>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub absent_sections: BTreeSet<String>,
    pub metadata: DealMetadata,
    pub version: String,
}

impl DealRepresentation {
    #[inline]
    pub fn has_structured(&self) -> bool {
        self.structured.is_some()
    }

    #[inline]
    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    /// The designated primary text vector and its section label.
    ///
    /// Priority is memo, business, overview; otherwise the first section in
    /// label order.
    pub fn primary_text(&self) -> Option<(&str, &Vector)> {
        for label in sections::PRIMARY_PRIORITY {
            if let Some((key, vector)) = self.text.get_key_value(label) {
                return Some((key.as_str(), vector));
            }
        }
        self.text
            .iter()
            .next()
            .map(|(key, vector)| (key.as_str(), vector))
    }

    pub fn section(&self, label: &str) -> Option<&Vector> {
        self.text.get(label)
    }

    pub fn modalities(&self) -> Vec<Modality> {
        let mut present = Vec::with_capacity(3);
        if self.has_structured() {
            present.push(Modality::Structured);
        }
        if self.has_text() {
            present.push(Modality::Text);
        }
        present.push(Modality::Metadata);
        present
    }
}

/// Raw, possibly partial input as handed over by the ingestion side or a
/// search caller. Normalized into a [`DealRepresentation`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRepresentation {
    #[serde(default)]
    pub id: Option<String>,
    /// Structured fields; `null` entries are individually missing fields
    #[serde(default)]
    pub structured: Option<Vec<Option<f32>>>,
    /// Text vectors by section label; `null` marks a known-absent section
    #[serde(default)]
    pub text: BTreeMap<String, Option<Vec<f32>>>,
    pub metadata: DealMetadata,
    #[serde(default)]
    pub version: Option<String>,
}

/// Dimensions fixed by one representation-version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepresentationScheme {
    pub version: String,
    pub struct_dim: usize,
    pub text_dim: usize,
}

impl RepresentationScheme {
    pub fn new(version: &str, struct_dim: usize, text_dim: usize) -> Self {
        Self {
            version: version.to_string(),
            struct_dim,
            text_dim,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep_with_sections(labels: &[&str]) -> DealRepresentation {
        let text = labels
            .iter()
            .map(|l| (l.to_string(), Vector::new(vec![1.0, 0.0])))
            .collect();
        DealRepresentation {
            id: "d1".to_string(),
            structured: None,
            imputed_fields: Vec::new(),
            text,
            absent_sections: BTreeSet::new(),
            metadata: DealMetadata::new("SaaS", "US", "Growth", 2022),
            version: "v1".to_string(),
        }
    }

    #[test]
    fn test_primary_prefers_memo() {
        let rep = rep_with_sections(&[sections::OVERVIEW, sections::MEMO, sections::BUSINESS]);
        assert_eq!(rep.primary_text().unwrap().0, sections::MEMO);
    }

    #[test]
    fn test_primary_falls_back_to_business_then_overview() {
        let rep = rep_with_sections(&[sections::OVERVIEW, sections::BUSINESS]);
        assert_eq!(rep.primary_text().unwrap().0, sections::BUSINESS);

        let rep = rep_with_sections(&[sections::MARKET, sections::OVERVIEW]);
        assert_eq!(rep.primary_text().unwrap().0, sections::OVERVIEW);
    }

    #[test]
    fn test_primary_uses_any_section_last() {
        let rep = rep_with_sections(&[sections::NOTES, sections::MARKET]);
        assert_eq!(rep.primary_text().unwrap().0, sections::MARKET);
        assert!(rep_with_sections(&[]).primary_text().is_none());
    }

    #[test]
    fn test_metadata_always_listed() {
        let rep = rep_with_sections(&[]);
        assert_eq!(rep.modalities(), vec![Modality::Metadata]);
    }

    #[test]
    fn test_raw_deserialize_with_nulls() {
        let raw: RawRepresentation = serde_json::from_value(serde_json::json!({
            "structured": [7.0, null, 0.3],
            "text": {"memo": null, "overview": [0.1, 0.2]},
            "metadata": {"sector": "SaaS", "geography": "US", "deal_type": "Growth", "year": 2023}
        }))
        .unwrap();
        assert_eq!(raw.structured.as_ref().unwrap()[1], None);
        assert!(raw.text["memo"].is_none());
        assert_eq!(raw.metadata.outcome, Outcome::Unknown);
    }
}
