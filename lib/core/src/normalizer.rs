//! Representation normalizer
//!
//! Turns a [`RawRepresentation`] into a [`DealRepresentation`] whose vectors
//! agree with a known [`RepresentationScheme`]. Records must carry a
//! structured vector; queries only need one usable modality.

use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{Error, Result};
use crate::representation::{DealRepresentation, RawRepresentation, RepresentationScheme};
use crate::vector::Vector;

/// Value used for individually missing structured fields. Features are
/// standardised upstream, so zero is the population mean.
pub const DEFAULT_FILL_VALUE: f32 = 0.0;

#[derive(Debug, Clone)]
pub struct Normalizer {
    schemes: AHashMap<String, RepresentationScheme>,
    current: String,
    fill_value: f32,
}

impl Normalizer {
    pub fn new(scheme: RepresentationScheme) -> Self {
        let current = scheme.version.clone();
        let mut schemes = AHashMap::new();
        schemes.insert(current.clone(), scheme);
        Self {
            schemes,
            current,
            fill_value: DEFAULT_FILL_VALUE,
        }
    }

    /// Register an additional (older) scheme that raw input may still be stamped with.
    #[must_use]
    pub fn with_scheme(mut self, scheme: RepresentationScheme) -> Self {
        self.schemes.insert(scheme.version.clone(), scheme);
        self
    }

    #[must_use]
    pub fn with_fill_value(mut self, fill_value: f32) -> Self {
        self.fill_value = fill_value;
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current
    }

    pub fn current_scheme(&self) -> &RepresentationScheme {
        // the current scheme is inserted in `new` and never removed
        &self.schemes[&self.current]
    }

    pub fn scheme(&self, version: &str) -> Option<&RepresentationScheme> {
        self.schemes.get(version)
    }

    /// Normalize a stored deal record. Fails when the structured vector is
    /// absent, since structured data is mandatory for records.
    pub fn normalize(&self, raw: RawRepresentation) -> Result<DealRepresentation> {
        let id = raw.id.clone().ok_or_else(|| Error::IncompleteRepresentation {
            id: String::from("<unnamed>"),
            reason: "record has no identifier".to_string(),
        })?;
        let rep = self.build(id, raw)?;
        if !rep.has_structured() {
            return Err(Error::IncompleteRepresentation {
                id: rep.id,
                reason: "structured vector is absent".to_string(),
            });
        }
        Ok(rep)
    }

    /// Normalize a (partial) search query. Only fails when neither a
    /// structured nor any text vector survives.
    pub fn normalize_query(&self, raw: RawRepresentation) -> Result<DealRepresentation> {
        let id = raw.id.clone().unwrap_or_default();
        let rep = self.build(id, raw)?;
        if !rep.has_structured() && !rep.has_text() {
            return Err(Error::IncompleteRepresentation {
                id: rep.id,
                reason: "no structured or text vector present".to_string(),
            });
        }
        Ok(rep)
    }

    /// Check an already-normalized representation (e.g. one handed back by
    /// the candidate store) against the current scheme.
    pub fn validate(&self, rep: &DealRepresentation) -> Result<()> {
        if rep.version != self.current {
            return Err(Error::VersionMismatch {
                expected: self.current.clone(),
                actual: rep.version.clone(),
            });
        }
        let scheme = self.current_scheme();
        if let Some(structured) = &rep.structured {
            if structured.dim() != scheme.struct_dim {
                return Err(Error::InvalidDimension {
                    field: "structured".to_string(),
                    expected: scheme.struct_dim,
                    actual: structured.dim(),
                });
            }
        }
        for (label, vector) in &rep.text {
            if vector.dim() != scheme.text_dim {
                return Err(Error::InvalidDimension {
                    field: format!("text.{label}"),
                    expected: scheme.text_dim,
                    actual: vector.dim(),
                });
            }
        }
        Ok(())
    }

    fn build(&self, id: String, raw: RawRepresentation) -> Result<DealRepresentation> {
        let version = raw.version.unwrap_or_else(|| self.current.clone());
        let scheme = self
            .schemes
            .get(&version)
            .ok_or_else(|| Error::VersionMismatch {
                expected: self.current.clone(),
                actual: version.clone(),
            })?;

        let (structured, imputed_fields) = match raw.structured {
            Some(fields) => self.complete_structured(&id, fields, scheme.struct_dim)?,
            None => (None, Vec::new()),
        };

        let mut text = BTreeMap::new();
        let mut absent_sections = BTreeSet::new();
        for (label, values) in raw.text {
            let Some(values) = values.filter(|v| !v.is_empty()) else {
                absent_sections.insert(label);
                continue;
            };
            if values.len() != scheme.text_dim {
                return Err(Error::InvalidDimension {
                    field: format!("text.{label}"),
                    expected: scheme.text_dim,
                    actual: values.len(),
                });
            }
            let vector = Vector::new(values);
            // a zero or non-finite embedding carries no direction
            if !vector.is_finite() || vector.norm() <= f32::EPSILON {
                debug!("Deal {}: text section '{}' has no usable direction", id, label);
                absent_sections.insert(label);
                continue;
            }
            text.insert(label, vector);
        }

        Ok(DealRepresentation {
            id,
            structured,
            imputed_fields,
            text,
            absent_sections,
            metadata: raw.metadata.trimmed(),
            version,
        })
    }

    fn complete_structured(
        &self,
        id: &str,
        fields: Vec<Option<f32>>,
        dim: usize,
    ) -> Result<(Option<Vector>, Vec<usize>)> {
        if fields.len() != dim {
            return Err(Error::InvalidDimension {
                field: "structured".to_string(),
                expected: dim,
                actual: fields.len(),
            });
        }

        let mut imputed = Vec::new();
        let data: Vec<f32> = fields
            .into_iter()
            .enumerate()
            .map(|(i, value)| match value {
                Some(v) if v.is_finite() => v,
                _ => {
                    imputed.push(i);
                    self.fill_value
                }
            })
            .collect();

        if imputed.len() == dim {
            debug!("Deal {}: every structured field missing, treating vector as absent", id);
            return Ok((None, Vec::new()));
        }
        if !imputed.is_empty() {
            debug!("Deal {}: imputed {} structured field(s)", id, imputed.len());
        }
        Ok((Some(Vector::new(data)), imputed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::representation::DealMetadata;

    fn normalizer() -> Normalizer {
        Normalizer::new(RepresentationScheme::new("v2", 3, 2))
            .with_scheme(RepresentationScheme::new("v1", 2, 2))
    }

    fn raw(structured: Option<Vec<Option<f32>>>) -> RawRepresentation {
        RawRepresentation {
            id: Some("deal-1".to_string()),
            structured,
            text: BTreeMap::new(),
            metadata: DealMetadata::new("SaaS", "US", "Growth", 2021),
            version: None,
        }
    }

    #[test]
    fn test_structured_is_mandatory_for_records() {
        let n = normalizer();
        let err = n.normalize(raw(None)).unwrap_err();
        assert!(matches!(err, Error::IncompleteRepresentation { .. }));
    }

    #[test]
    fn test_all_missing_fields_count_as_absent() {
        let n = normalizer();
        let err = n.normalize(raw(Some(vec![None, None, None]))).unwrap_err();
        assert!(matches!(err, Error::IncompleteRepresentation { .. }));
    }

    #[test]
    fn test_partial_fields_are_imputed() {
        let n = normalizer();
        let rep = n
            .normalize(raw(Some(vec![Some(7.0), None, Some(f32::NAN)])))
            .unwrap();
        assert_eq!(rep.imputed_fields, vec![1, 2]);
        assert_eq!(rep.structured.unwrap().as_slice(), &[7.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_sections_recorded_not_zero_filled() {
        let n = normalizer();
        let mut r = raw(Some(vec![Some(1.0), Some(2.0), Some(3.0)]));
        r.text.insert("memo".to_string(), None);
        r.text.insert("overview".to_string(), Some(vec![0.0, 0.0]));
        r.text.insert("business".to_string(), Some(vec![0.6, 0.8]));

        let rep = n.normalize(r).unwrap();
        assert_eq!(rep.text.len(), 1);
        assert!(rep.absent_sections.contains("memo"));
        assert!(rep.absent_sections.contains("overview"));
        assert_eq!(rep.primary_text().unwrap().0, "business");
    }

    #[test]
    fn test_metadata_codes_trimmed() {
        let n = normalizer();
        let mut query = raw(Some(vec![Some(1.0), Some(0.0), Some(2.0)]));
        query.metadata = DealMetadata::new(" SaaS ", "US\n", "Growth", 2021);
        let deal = n.normalize_query(query).unwrap();
        assert_eq!(deal.metadata.sector, "SaaS");
        assert_eq!(deal.metadata.geography, "US");
        assert!(deal.metadata.same_sector(&DealMetadata::new("saas", "us", "Buyout", 2020)));
    }

    #[test]
    fn test_query_may_be_text_only() {
        let n = normalizer();
        let mut r = raw(None);
        r.text.insert("overview".to_string(), Some(vec![1.0, 0.0]));
        let rep = n.normalize_query(r).unwrap();
        assert!(!rep.has_structured());
        assert!(rep.has_text());

        let empty = raw(None);
        assert!(matches!(
            n.normalize_query(empty),
            Err(Error::IncompleteRepresentation { .. })
        ));
    }

    #[test]
    fn test_dimension_and_version_checks() {
        let n = normalizer();
        let err = n.normalize(raw(Some(vec![Some(1.0)]))).unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { expected: 3, actual: 1, .. }));

        let mut r = raw(Some(vec![Some(1.0), Some(2.0), Some(3.0)]));
        r.version = Some("v9".to_string());
        assert!(matches!(n.normalize(r), Err(Error::VersionMismatch { .. })));
    }

    #[test]
    fn test_validate_rejects_older_scheme() {
        let n = normalizer();
        let mut r = raw(Some(vec![Some(1.0), Some(2.0)]));
        r.version = Some("v1".to_string());
        let old = n.normalize(r).unwrap();
        assert!(matches!(n.validate(&old), Err(Error::VersionMismatch { .. })));
    }
}
