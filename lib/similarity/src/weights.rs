//! Weight profiles
//!
//! A [`WeightProfile`] fixes `w_struct` and `w_text` for one [`ProfileKey`].
//! Profiles are immutable once published; tuning only ever creates a new
//! version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{ProfileKey, SimilarityContext};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightProfile {
    pub key: ProfileKey,
    pub w_struct: f32,
    pub w_text: f32,
    /// Monotonic per key, starting at 1 for the seeded preset
    pub version: u64,
    pub effective_from: DateTime<Utc>,
}

impl WeightProfile {
    pub fn new(key: ProfileKey, w_struct: f32, w_text: f32, version: u64) -> Result<Self, WeightError> {
        validate_weights(w_struct, w_text)?;
        Ok(Self {
            key,
            w_struct,
            w_text,
            version,
            effective_from: Utc::now(),
        })
    }

    /// The built-in preset for a context, at version 1.
    pub fn preset(context: SimilarityContext) -> Self {
        let (w_struct, w_text) = preset_weights(context);
        Self {
            key: ProfileKey::preset(context),
            w_struct,
            w_text,
            version: 1,
            effective_from: Utc::now(),
        }
    }

    /// Every context preset, in [`SimilarityContext::ALL`] order.
    pub fn presets() -> Vec<Self> {
        SimilarityContext::ALL.into_iter().map(Self::preset).collect()
    }

    /// A successor of this profile with new weights and the next version.
    pub fn successor(&self, w_struct: f32, w_text: f32, version: u64) -> Result<Self, WeightError> {
        if version <= self.version {
            return Err(WeightError::StaleVersion {
                current: self.version,
                proposed: version,
            });
        }
        Self::new(self.key.clone(), w_struct, w_text, version)
    }

    /// Identifier stamped onto every scored candidate, e.g. `screening@v3`.
    pub fn version_id(&self) -> String {
        format!("{}@v{}", self.key, self.version)
    }
}

/// Preset `(w_struct, w_text)` per context
pub fn preset_weights(context: SimilarityContext) -> (f32, f32) {
    match context {
        SimilarityContext::Screening => (0.7, 0.3),
        SimilarityContext::RiskAssessment => (0.2, 0.7),
        SimilarityContext::ExitPotential => (0.5, 0.5),
        SimilarityContext::StrategicFit => (0.1, 0.8),
        SimilarityContext::Default => (0.4, 0.6),
    }
}

/// Both weights in [0, 1] and their sum at most 1.
pub fn validate_weights(w_struct: f32, w_text: f32) -> Result<(), WeightError> {
    for (name, value) in [("w_struct", w_struct), ("w_text", w_text)] {
        if !value.is_finite() {
            return Err(WeightError::NotFinite(name));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(WeightError::OutOfRange { name, value });
        }
    }
    let sum = w_struct + w_text;
    if sum > 1.0 + 1e-6 {
        return Err(WeightError::SumTooLarge(sum));
    }
    if sum <= 0.0 {
        return Err(WeightError::ZeroTotalWeight);
    }
    Ok(())
}

/// Project arbitrary weights back into the valid region.
pub fn project_weights(w_struct: f32, w_text: f32) -> (f32, f32) {
    let s = if w_struct.is_finite() { w_struct.clamp(0.0, 1.0) } else { 0.0 };
    let t = if w_text.is_finite() { w_text.clamp(0.0, 1.0) } else { 0.0 };
    let sum = s + t;
    if sum > 1.0 {
        (s / sum, t / sum)
    } else if sum <= 0.0 {
        (0.5, 0.5)
    } else {
        (s, t)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WeightError {
    #[error("Weight '{name}' = {value} is outside [0, 1]")]
    OutOfRange { name: &'static str, value: f32 },

    #[error("Weight '{0}' is not finite")]
    NotFinite(&'static str),

    #[error("w_struct + w_text = {0} exceeds 1")]
    SumTooLarge(f32),

    #[error("Total weight cannot be zero")]
    ZeroTotalWeight,

    #[error("Version {proposed} does not follow current version {current}")]
    StaleVersion { current: u64, proposed: u64 },
}

impl From<WeightError> for dealsim_core::Error {
    fn from(e: WeightError) -> Self {
        dealsim_core::Error::InvalidWeights(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for profile in WeightProfile::presets() {
            assert!(validate_weights(profile.w_struct, profile.w_text).is_ok());
            assert_eq!(profile.version, 1);
        }
        let default = WeightProfile::preset(SimilarityContext::Default);
        assert_eq!((default.w_struct, default.w_text), (0.4, 0.6));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            validate_weights(1.2, 0.0),
            Err(WeightError::OutOfRange { name: "w_struct", .. })
        ));
        assert!(matches!(validate_weights(0.7, 0.6), Err(WeightError::SumTooLarge(_))));
        assert!(matches!(validate_weights(0.0, 0.0), Err(WeightError::ZeroTotalWeight)));
        assert!(matches!(validate_weights(f32::NAN, 0.1), Err(WeightError::NotFinite(_))));
    }

    #[test]
    fn test_projection() {
        let (s, t) = project_weights(0.9, 0.6);
        assert!((s + t - 1.0).abs() < 1e-6);
        assert!(s > t);

        assert_eq!(project_weights(-0.2, 0.5), (0.0, 0.5));
        assert!(validate_weights(s, t).is_ok());
    }

    #[test]
    fn test_successor_requires_newer_version() {
        let base = WeightProfile::preset(SimilarityContext::Screening);
        let next = base.successor(0.6, 0.35, 2).unwrap();
        assert_eq!(next.key, base.key);
        assert_eq!(next.version_id(), "screening@v2");
        assert!(matches!(
            base.successor(0.6, 0.35, 1),
            Err(WeightError::StaleVersion { .. })
        ));
    }
}
