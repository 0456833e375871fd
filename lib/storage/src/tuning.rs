//! Tuning job
//!
//! Re-fits `w_struct`/`w_text` per context, and per caller once a caller has
//! enough feedback, with a pairwise logistic objective over the score
//! snapshots carried by feedback events. A candidate profile is published
//! only when held-out precision@k does not regress.

use dealsim_core::Error;
use dealsim_similarity::{project_weights, ProfileKey, SimilarityContext, WeightProfile};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::feedback::{FeedbackEvent, ScoreSnapshot};
use crate::registry::WeightRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// New events that trigger a run
    pub event_threshold: usize,
    pub interval_secs: u64,
    /// Feedback window consumed per run
    pub window_days: i64,
    pub learning_rate: f32,
    pub epochs: usize,
    /// Sharpness of the pairwise logistic loss
    pub margin_scale: f32,
    pub holdout_fraction: f32,
    pub precision_k: usize,
    pub implicit_negatives: usize,
    /// Below this many direct positives, proxy signals are mixed in
    pub cold_start_min: usize,
    pub personalization_min: usize,
    pub seed: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            event_threshold: 200,
            interval_secs: 6 * 60 * 60,
            window_days: 90,
            learning_rate: 0.05,
            epochs: 100,
            margin_scale: 10.0,
            holdout_fraction: 0.2,
            precision_k: 5,
            implicit_negatives: 1,
            cold_start_min: 20,
            personalization_min: 50,
            seed: 0x5eed,
        }
    }
}

/// Cold-start positive pair supplied by the ingestion side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    /// Both deals were evaluated by the same team
    SameTeam,
    /// The candidate was cited as a comp in the query deal's memo
    CitedInMemo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySignal {
    pub query_id: String,
    pub candidate_id: String,
    pub context: SimilarityContext,
    pub kind: ProxyKind,
    pub scores: ScoreSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TuningStatus {
    Published { version: u64 },
    Rejected { candidate_precision: f32, current_precision: f32 },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyOutcome {
    pub key: ProfileKey,
    pub status: TuningStatus,
    pub w_struct: f32,
    pub w_text: f32,
    pub training_pairs: usize,
    pub proxies_used: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuningReport {
    pub window_events: usize,
    pub outcomes: Vec<KeyOutcome>,
}

impl TuningReport {
    pub fn published(&self) -> impl Iterator<Item = &KeyOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, TuningStatus::Published { .. }))
    }

    pub fn rejected(&self) -> impl Iterator<Item = &KeyOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, TuningStatus::Rejected { .. }))
    }
}

#[derive(Debug, Clone)]
struct Example {
    query_id: String,
    candidate_id: String,
    positive: bool,
    scores: ScoreSnapshot,
}

fn fused(w_struct: f32, w_text: f32, s: &ScoreSnapshot) -> f32 {
    let total = w_struct + w_text;
    let (ws, wt) = match (s.s_struct, s.s_text) {
        (Some(_), Some(_)) => (w_struct, w_text),
        (Some(_), None) => (total, 0.0),
        (None, Some(_)) => (0.0, total),
        (None, None) => (0.0, 0.0),
    };
    ws * s.s_struct.unwrap_or(0.0) + wt * s.s_text.unwrap_or(0.0) + s.s_meta
}

/// Component-wise score difference; a component missing on either side is 0.
fn diff(p: &ScoreSnapshot, n: &ScoreSnapshot) -> (f32, f32) {
    let d = |a: Option<f32>, b: Option<f32>| match (a, b) {
        (Some(a), Some(b)) => a - b,
        _ => 0.0,
    };
    (d(p.s_struct, n.s_struct), d(p.s_text, n.s_text))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub struct TuningJob {
    config: TuningConfig,
}

impl TuningJob {
    pub fn new(config: TuningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    /// Tune every key with feedback in `events` (oldest first) and publish
    /// the candidates that hold up on the held-out slice.
    pub fn run(&self, events: &[FeedbackEvent], proxies: &[ProxySignal], registry: &WeightRegistry) -> TuningReport {
        let mut report = TuningReport {
            window_events: events.len(),
            outcomes: Vec::new(),
        };

        let mut keys: BTreeSet<ProfileKey> = BTreeSet::new();
        let mut per_caller: HashMap<(SimilarityContext, &str), usize> = HashMap::new();
        for event in events {
            keys.insert(ProfileKey::preset(event.context));
            if let Some(caller) = event.caller_id.as_deref() {
                *per_caller.entry((event.context, caller)).or_insert(0) += 1;
            }
        }
        for proxy in proxies {
            keys.insert(ProfileKey::preset(proxy.context));
        }
        for ((context, caller), count) in per_caller {
            if count < self.config.personalization_min {
                continue;
            }
            match ProfileKey::personalized(context, caller) {
                Ok(key) => {
                    keys.insert(key);
                }
                Err(e) => warn!("Not personalizing {}: {}", caller, e),
            }
        }

        for key in keys {
            let outcome = self.tune_key(&key, events, proxies, registry);
            report.outcomes.push(outcome);
        }

        info!(
            "Tuning run over {} events: {} published, {} rejected",
            report.window_events,
            report.published().count(),
            report.rejected().count()
        );
        report
    }

    fn tune_key(
        &self,
        key: &ProfileKey,
        events: &[FeedbackEvent],
        proxies: &[ProxySignal],
        registry: &WeightRegistry,
    ) -> KeyOutcome {
        let current = registry
            .current(key)
            .or_else(|| registry.current(&ProfileKey::preset(key.context)))
            .unwrap_or_else(|| std::sync::Arc::new(WeightProfile::preset(key.context)));

        let skipped = |reason: &str, pairs: usize, proxies_used: usize| KeyOutcome {
            key: key.clone(),
            status: TuningStatus::Skipped {
                reason: reason.to_string(),
            },
            w_struct: current.w_struct,
            w_text: current.w_text,
            training_pairs: pairs,
            proxies_used,
        };

        let mut examples: Vec<Example> = events
            .iter()
            .filter(|e| e.context == key.context)
            .filter(|e| key.caller.is_none() || e.caller_id == key.caller)
            .filter_map(|e| {
                let scores = e.scores?;
                let positive = e.label.is_positive();
                if !positive && !e.label.is_negative() {
                    return None;
                }
                Some(Example {
                    query_id: e.query_id.clone(),
                    candidate_id: e.candidate_id.clone(),
                    positive,
                    scores,
                })
            })
            .collect();

        let direct_positives = examples.iter().filter(|e| e.positive).count();
        let mut proxies_used = 0;
        if direct_positives < self.config.cold_start_min {
            for proxy in proxies.iter().filter(|p| p.context == key.context) {
                examples.push(Example {
                    query_id: proxy.query_id.clone(),
                    candidate_id: proxy.candidate_id.clone(),
                    positive: true,
                    scores: proxy.scores,
                });
                proxies_used += 1;
            }
        }

        // query groups in order of first appearance
        let mut order: Vec<&str> = Vec::new();
        let mut groups: BTreeMap<&str, Vec<&Example>> = BTreeMap::new();
        for example in &examples {
            let group = groups.entry(example.query_id.as_str()).or_default();
            if group.is_empty() {
                order.push(example.query_id.as_str());
            }
            group.push(example);
        }
        if order.len() < 2 {
            return skipped("fewer than two labeled queries", 0, proxies_used);
        }

        let holdout_len = ((order.len() as f32 * self.config.holdout_fraction).ceil() as usize)
            .clamp(1, order.len() - 1);
        let (train_ids, holdout_ids) = order.split_at(order.len() - holdout_len);

        let pairs = self.training_pairs(train_ids, &groups);
        if pairs.is_empty() {
            return skipped("no positive/negative pairs in training slice", 0, proxies_used);
        }

        let (w_struct, w_text) = self.fit(current.w_struct, current.w_text, &pairs);

        let holdout: Vec<&Vec<&Example>> = holdout_ids.iter().filter_map(|q| groups.get(q)).collect();
        let (Some(before), Some(after)) = (
            self.precision_at_k(current.w_struct, current.w_text, &holdout),
            self.precision_at_k(w_struct, w_text, &holdout),
        ) else {
            return skipped("no positives in held-out slice", pairs.len(), proxies_used);
        };

        if (w_struct - current.w_struct).abs() < 1e-4 && (w_text - current.w_text).abs() < 1e-4 {
            return skipped("weights unchanged", pairs.len(), proxies_used);
        }

        if after < before {
            let err = Error::TuningRegression {
                key: key.to_string(),
                candidate: after,
                current: before,
            };
            warn!("Rejected tuned weights ({:.3}, {:.3}): {}", w_struct, w_text, err);
            return KeyOutcome {
                key: key.clone(),
                status: TuningStatus::Rejected {
                    candidate_precision: after,
                    current_precision: before,
                },
                w_struct,
                w_text,
                training_pairs: pairs.len(),
                proxies_used,
            };
        }

        match registry.publish(key, w_struct, w_text) {
            Ok(profile) => KeyOutcome {
                key: key.clone(),
                status: TuningStatus::Published {
                    version: profile.version,
                },
                w_struct,
                w_text,
                training_pairs: pairs.len(),
                proxies_used,
            },
            Err(e) => {
                warn!("Publishing tuned profile {} failed: {}", key, e);
                skipped(&format!("publish failed: {e}"), pairs.len(), proxies_used)
            }
        }
    }

    /// Explicit pairs within each query plus sampled implicit negatives
    /// drawn from other queries' candidates.
    fn training_pairs(
        &self,
        train_ids: &[&str],
        groups: &BTreeMap<&str, Vec<&Example>>,
    ) -> Vec<(ScoreSnapshot, ScoreSnapshot)> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let pool: Vec<&Example> = train_ids
            .iter()
            .filter_map(|q| groups.get(q))
            .flatten()
            .copied()
            .collect();

        let mut pairs = Vec::new();
        for query_id in train_ids {
            let Some(group) = groups.get(query_id) else {
                continue;
            };
            let positives: Vec<&Example> = group.iter().copied().filter(|e| e.positive).collect();
            let negatives: Vec<&Example> = group.iter().copied().filter(|e| !e.positive).collect();
            let positive_ids: BTreeSet<&str> = positives.iter().map(|e| e.candidate_id.as_str()).collect();

            let implicit: Vec<&Example> = pool
                .iter()
                .copied()
                .filter(|e| e.query_id != *query_id && !positive_ids.contains(e.candidate_id.as_str()))
                .collect();

            for p in &positives {
                for n in &negatives {
                    pairs.push((p.scores, n.scores));
                }
                for n in implicit.choose_multiple(&mut rng, self.config.implicit_negatives) {
                    pairs.push((p.scores, n.scores));
                }
            }
        }
        debug!("Built {} training pairs", pairs.len());
        pairs
    }

    /// Gradient ascent on the pairwise log-likelihood, projected back into
    /// the valid weight region after every step.
    fn fit(&self, w_struct: f32, w_text: f32, pairs: &[(ScoreSnapshot, ScoreSnapshot)]) -> (f32, f32) {
        let scale = self.config.margin_scale;
        let (mut ws, mut wt) = (w_struct, w_text);
        let n = pairs.len() as f32;

        for _ in 0..self.config.epochs {
            let (mut gs, mut gt) = (0.0f32, 0.0f32);
            for (p, q) in pairs {
                let (ds, dt) = diff(p, q);
                let margin = ws * ds + wt * dt;
                let g = sigmoid(-scale * margin) * scale;
                gs += g * ds;
                gt += g * dt;
            }
            let (s, t) = project_weights(
                ws + self.config.learning_rate * gs / n,
                wt + self.config.learning_rate * gt / n,
            );
            ws = s;
            wt = t;
        }
        (ws, wt)
    }

    /// Mean precision@k over held-out queries that have at least one positive.
    fn precision_at_k(&self, w_struct: f32, w_text: f32, holdout: &[&Vec<&Example>]) -> Option<f32> {
        let mut total = 0.0f32;
        let mut counted = 0usize;
        for group in holdout {
            if !group.iter().any(|e| e.positive) {
                continue;
            }
            let mut ranked: Vec<(f32, bool, &str)> = group
                .iter()
                .map(|e| (fused(w_struct, w_text, &e.scores), e.positive, e.candidate_id.as_str()))
                .collect();
            ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.2.cmp(b.2)));
            let k = self.config.precision_k.min(ranked.len()).max(1);
            let hits = ranked.iter().take(k).filter(|r| r.1).count();
            total += hits as f32 / k as f32;
            counted += 1;
        }
        (counted > 0).then(|| total / counted as f32)
    }
}

impl Default for TuningJob {
    fn default() -> Self {
        Self::new(TuningConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackLabel;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn snap(s: f32, t: f32) -> ScoreSnapshot {
        ScoreSnapshot {
            s_struct: Some(s),
            s_text: Some(t),
            s_meta: 0.2,
            s_final: 0.0,
        }
    }

    fn event(q: usize, c: &str, label: FeedbackLabel, scores: ScoreSnapshot, offset: i64) -> FeedbackEvent {
        FeedbackEvent::new(&format!("q{q:02}"), c, label, SimilarityContext::Default)
            .with_scores(scores)
            .with_timestamp(Utc::now() + Duration::seconds(offset))
    }

    /// Ten queries; training queries reward structured agreement.
    fn structured_favouring(holdout_pos: ScoreSnapshot, holdout_neg: ScoreSnapshot) -> Vec<FeedbackEvent> {
        let mut events = Vec::new();
        let mut t = 0;
        for q in 0..10 {
            let (pos, neg) = if q < 8 {
                (snap(0.9, 0.5), snap(0.3, 0.6))
            } else {
                (holdout_pos, holdout_neg)
            };
            events.push(event(q, "p", FeedbackLabel::Useful, pos, t));
            events.push(event(q, "n", FeedbackLabel::NotUseful, neg, t + 1));
            t += 2;
        }
        events
    }

    fn job() -> TuningJob {
        TuningJob::new(TuningConfig {
            precision_k: 1,
            ..Default::default()
        })
    }

    #[test]
    fn test_publishes_when_holdout_agrees() {
        let dir = TempDir::new().unwrap();
        let registry = WeightRegistry::open(dir.path()).unwrap();
        let events = structured_favouring(snap(0.9, 0.5), snap(0.3, 0.6));

        let report = job().run(&events, &[], &registry);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, TuningStatus::Published { version: 2 });
        assert!(outcome.w_struct > 0.4, "w_struct = {}", outcome.w_struct);
        assert!(outcome.w_struct + outcome.w_text <= 1.0 + 1e-5);

        let active = registry.current(&ProfileKey::preset(SimilarityContext::Default)).unwrap();
        assert_eq!(active.version, 2);
    }

    #[test]
    fn test_regression_keeps_current_version() {
        let dir = TempDir::new().unwrap();
        let registry = WeightRegistry::open(dir.path()).unwrap();
        // held-out queries reward text agreement instead
        let events = structured_favouring(snap(0.3, 0.9), snap(0.9, 0.2));

        let report = job().run(&events, &[], &registry);
        assert!(matches!(report.outcomes[0].status, TuningStatus::Rejected { .. }));
        let active = registry.current(&ProfileKey::preset(SimilarityContext::Default)).unwrap();
        assert_eq!(active.version, 1);
    }

    #[test]
    fn test_cold_start_uses_proxies() {
        let dir = TempDir::new().unwrap();
        let registry = WeightRegistry::open(dir.path()).unwrap();
        let events: Vec<_> = (0..4)
            .map(|q| event(q, "n", FeedbackLabel::NotUseful, snap(0.3, 0.6), q as i64))
            .collect();
        let proxies: Vec<_> = (0..4)
            .map(|q| ProxySignal {
                query_id: format!("q{q:02}"),
                candidate_id: "p".to_string(),
                context: SimilarityContext::Default,
                kind: ProxyKind::CitedInMemo,
                scores: snap(0.9, 0.5),
            })
            .collect();

        let report = job().run(&events, &proxies, &registry);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.proxies_used, 4);
        assert!(outcome.training_pairs > 0);
    }

    #[test]
    fn test_too_little_feedback_is_skipped() {
        let dir = TempDir::new().unwrap();
        let registry = WeightRegistry::open(dir.path()).unwrap();
        let events = vec![event(0, "p", FeedbackLabel::Useful, snap(0.9, 0.5), 0)];
        let report = job().run(&events, &[], &registry);
        assert!(matches!(report.outcomes[0].status, TuningStatus::Skipped { .. }));
        assert_eq!(report.published().count(), 0);
    }

    #[test]
    fn test_personalized_key_needs_enough_events() {
        let dir = TempDir::new().unwrap();
        let registry = WeightRegistry::open(dir.path()).unwrap();
        let events: Vec<_> = structured_favouring(snap(0.9, 0.5), snap(0.3, 0.6))
            .into_iter()
            .map(|e| e.with_caller("alice"))
            .collect();

        let tuner = TuningJob::new(TuningConfig {
            personalization_min: 20,
            precision_k: 1,
            ..Default::default()
        });
        let report = tuner.run(&events, &[], &registry);
        assert!(report
            .outcomes
            .iter()
            .any(|o| o.key == ProfileKey::personalized(SimilarityContext::Default, "alice").unwrap()));

        let other_dir = TempDir::new().unwrap();
        let other_registry = WeightRegistry::open(other_dir.path()).unwrap();
        let strict = TuningJob::new(TuningConfig {
            personalization_min: 21,
            ..Default::default()
        });
        let report = strict.run(&events, &[], &other_registry);
        assert_eq!(report.outcomes.len(), 1);
    }
}
