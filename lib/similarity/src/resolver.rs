//! Weight resolver
//!
//! Maps a context and optional caller to exactly one [`WeightProfile`]
//! snapshot. Resolution never fails: a broken personalization lookup falls
//! back to the context preset, and a missing preset to the `default` one.

use ahash::AHashMap;
use dealsim_core::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::{ProfileKey, SimilarityContext};
use crate::weights::WeightProfile;

/// Read side of the published weight profiles
pub trait ProfileSource: Send + Sync {
    /// Currently active profile for `key`, if one has been published.
    fn active(&self, key: &ProfileKey) -> Result<Option<Arc<WeightProfile>>>;
}

/// A resolved profile, bound for the lifetime of one request
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub profile: Arc<WeightProfile>,
    pub personalized: bool,
    /// The requested context, which differs from `profile.key.context` when
    /// resolution fell through to `default`
    pub requested: SimilarityContext,
}

pub struct WeightResolver {
    source: Arc<dyn ProfileSource>,
}

impl WeightResolver {
    pub fn new(source: Arc<dyn ProfileSource>) -> Self {
        Self { source }
    }

    pub fn resolve(&self, context: SimilarityContext, caller: Option<&str>) -> ResolvedProfile {
        // an invalid caller id can never have a published profile
        if let Some(key) = caller.and_then(|c| ProfileKey::personalized(context, c).ok()) {
            match self.source.active(&key) {
                Ok(Some(profile)) => {
                    debug!("Resolved personalized profile {}", profile.version_id());
                    return ResolvedProfile {
                        profile,
                        personalized: true,
                        requested: context,
                    };
                }
                Ok(None) => {}
                Err(e) => warn!("Personalized profile lookup for {} failed: {}", key, e),
            }
        }

        for key in [
            ProfileKey::preset(context),
            ProfileKey::preset(SimilarityContext::Default),
        ] {
            match self.source.active(&key) {
                Ok(Some(profile)) => {
                    return ResolvedProfile {
                        profile,
                        personalized: false,
                        requested: context,
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Profile lookup for {} failed: {}", key, e),
            }
        }

        ResolvedProfile {
            profile: Arc::new(WeightProfile::preset(context)),
            personalized: false,
            requested: context,
        }
    }
}

/// Fixed in-memory profiles; seeded with the built-in presets
pub struct StaticProfiles {
    profiles: RwLock<AHashMap<ProfileKey, Arc<WeightProfile>>>,
}

impl Default for StaticProfiles {
    fn default() -> Self {
        let profiles = WeightProfile::presets()
            .into_iter()
            .map(|p| (p.key.clone(), Arc::new(p)))
            .collect();
        Self {
            profiles: RwLock::new(profiles),
        }
    }
}

impl StaticProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            profiles: RwLock::new(AHashMap::new()),
        }
    }

    pub fn insert(&self, profile: WeightProfile) {
        self.profiles
            .write()
            .insert(profile.key.clone(), Arc::new(profile));
    }
}

impl ProfileSource for StaticProfiles {
    fn active(&self, key: &ProfileKey) -> Result<Option<Arc<WeightProfile>>> {
        Ok(self.profiles.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealsim_core::Error;

    struct FailingPersonalization(StaticProfiles);

    impl ProfileSource for FailingPersonalization {
        fn active(&self, key: &ProfileKey) -> Result<Option<Arc<WeightProfile>>> {
            if key.is_personalized() {
                return Err(Error::Storage("unavailable".to_string()));
            }
            self.0.active(key)
        }
    }

    #[test]
    fn test_personalized_wins() {
        let profiles = StaticProfiles::new();
        let key = ProfileKey::personalized(SimilarityContext::Screening, "alice").unwrap();
        profiles.insert(WeightProfile::new(key, 0.9, 0.1, 3).unwrap());

        let resolver = WeightResolver::new(Arc::new(profiles));
        let resolved = resolver.resolve(SimilarityContext::Screening, Some("alice"));
        assert!(resolved.personalized);
        assert_eq!(resolved.profile.w_struct, 0.9);

        let other = resolver.resolve(SimilarityContext::Screening, Some("bob"));
        assert!(!other.personalized);
        assert_eq!(other.profile.w_struct, 0.7);
    }

    #[test]
    fn test_missing_preset_falls_back_to_default() {
        let profiles = StaticProfiles::empty();
        profiles.insert(WeightProfile::new(ProfileKey::preset(SimilarityContext::Default), 0.3, 0.3, 2).unwrap());
        let resolver = WeightResolver::new(Arc::new(profiles));

        let resolved = resolver.resolve(SimilarityContext::ExitPotential, None);
        assert_eq!(resolved.profile.key.context, SimilarityContext::Default);
        assert_eq!(resolved.profile.version, 2);
        assert_eq!(resolved.requested, SimilarityContext::ExitPotential);
    }

    #[test]
    fn test_lookup_failure_does_not_block() {
        let resolver = WeightResolver::new(Arc::new(FailingPersonalization(StaticProfiles::new())));
        let resolved = resolver.resolve(SimilarityContext::RiskAssessment, Some("alice"));
        assert!(!resolved.personalized);
        assert_eq!((resolved.profile.w_struct, resolved.profile.w_text), (0.2, 0.7));
    }

    #[test]
    fn test_empty_source_uses_builtin() {
        let resolver = WeightResolver::new(Arc::new(StaticProfiles::empty()));
        let resolved = resolver.resolve(SimilarityContext::StrategicFit, None);
        assert_eq!(resolved.profile.w_text, 0.8);
    }
}
