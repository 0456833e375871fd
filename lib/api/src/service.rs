//! Query orchestration
//!
//! `search` runs normalize -> retrieve -> score -> rank -> fallback ->
//! attribution against one weight-profile snapshot. Feedback and profile
//! operations go straight to the storage layer.

use chrono::{DateTime, Utc};
use dealsim_core::{
    CandidateFilter, CandidateStore, DealRepresentation, Error, InMemoryDealStore, Normalizer,
    RawRepresentation, Result, RetrievedCandidate,
};
use dealsim_similarity::{
    annotate, Attribution, FallbackInfo, FallbackPolicy, FallbackState, ProfileKey, RankedResultSet,
    Ranker, ResultStats, Scorer, SectorAdjacency, SimilarityContext, WeightProfile, CONFLICTING_SIGNALS,
    LIMITED_COMPS, RETRIEVAL_TIMEOUT_WARNING, validate_caller_id,
};
use dealsim_storage::{
    AppendOutcome, FeedbackEvent, FeedbackLabel, FeedbackLog, FeedbackStats, ScoreSnapshot,
    TuningScheduler, WeightRegistry,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::escalation::{EscalationRequest, EscalationSink, LoggingEscalationSink};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: RawRepresentation,
    /// Explicit context; detected from `query_text` when absent
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub query_text: Option<String>,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub threshold_override: Option<f32>,
    #[serde(default)]
    pub filter: CandidateFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub query_id: String,
    pub candidate_id: String,
    /// `+1`, `-1`, `useful`, `not_useful`, `pin`, `reject` or `override`
    pub label: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Client-side timestamp; resubmitting with the same value is a no-op
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub query_id: String,
    pub candidate_id: String,
    pub timestamp: DateTime<Utc>,
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub deals: usize,
    pub active_profiles: usize,
    pub feedback_events: usize,
    pub representation_version: String,
}

/// Recent result sets by query id, oldest evicted first
struct ResultCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Arc<RankedResultSet>>,
}

impl ResultCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, result: Arc<RankedResultSet>) {
        let id = result.query_id.clone();
        if self.entries.insert(id.clone(), result).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn get(&self, query_id: &str) -> Option<Arc<RankedResultSet>> {
        self.entries.get(query_id).cloned()
    }
}

pub struct SimilarityService {
    config: ServiceConfig,
    normalizer: Normalizer,
    store: Arc<dyn CandidateStore>,
    deals: Option<Arc<InMemoryDealStore>>,
    registry: Arc<WeightRegistry>,
    feedback: Arc<FeedbackLog>,
    escalation: Arc<dyn EscalationSink>,
    scheduler: Option<Arc<TuningScheduler>>,
    scorer: Scorer,
    ranker: Ranker,
    policy: FallbackPolicy,
    results: Mutex<ResultCache>,
}

impl SimilarityService {
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn CandidateStore>,
        registry: Arc<WeightRegistry>,
        feedback: Arc<FeedbackLog>,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(config.representation.scheme()),
            ranker: Ranker::new(config.ranker.clone()),
            policy: FallbackPolicy::new(config.fallback.clone()),
            results: Mutex::new(ResultCache::new(config.result_cache_size)),
            scorer: Scorer::default(),
            escalation: Arc::new(LoggingEscalationSink::new()),
            deals: None,
            scheduler: None,
            store,
            registry,
            feedback,
            config,
        }
    }

    /// Service backed by the in-memory deal store and storage under
    /// `config.data_dir`.
    pub fn open(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(WeightRegistry::open(config.profiles_path())?);
        let feedback = Arc::new(FeedbackLog::open(config.feedback_path())?);
        let deals = Arc::new(InMemoryDealStore::new());
        Ok(Self::new(config, deals.clone(), registry, feedback).with_deal_store(deals))
    }

    /// Use `deals` both for retrieval and for `upsert_deal`.
    #[must_use]
    pub fn with_deal_store(mut self, deals: Arc<InMemoryDealStore>) -> Self {
        self.store = deals.clone();
        self.deals = Some(deals);
        self
    }

    #[must_use]
    pub fn with_escalation(mut self, sink: Arc<dyn EscalationSink>) -> Self {
        self.escalation = sink;
        self
    }

    #[must_use]
    pub fn with_adjacency(mut self, adjacency: Arc<dyn SectorAdjacency>) -> Self {
        self.scorer = Scorer::new(adjacency);
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<TuningScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WeightRegistry> {
        &self.registry
    }

    pub fn feedback_log(&self) -> &Arc<FeedbackLog> {
        &self.feedback
    }

    pub async fn search(&self, request: SearchRequest) -> Result<RankedResultSet> {
        let context = resolve_context(request.context.as_deref(), request.query_text.as_deref())?;
        let threshold = match request.threshold_override {
            Some(t) if t.is_finite() && (0.0..=1.0).contains(&t) => t,
            Some(t) => {
                return Err(Error::InvalidConfig(format!(
                    "threshold override {t} outside [0, 1]"
                )))
            }
            None => self.policy.config().confidence_threshold,
        };
        let k = request
            .k
            .unwrap_or(self.config.default_k)
            .clamp(1, self.config.max_k);

        if let Some(caller) = request.caller_id.as_deref() {
            validate_caller_id(caller)?;
        }

        let query = self.normalizer.normalize_query(request.query)?;
        let query_id = if query.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            query.id.clone()
        };
        let caller = request.caller_id.as_deref();

        let resolved = self.registry.resolve(context, caller);
        let profile = resolved.profile;
        let signals = self.feedback.signals_for(caller, Some(&query_id));
        debug!(
            "Query {} resolved {} (personalized: {})",
            query_id,
            profile.version_id(),
            resolved.personalized
        );

        let mut warnings = Vec::new();
        let fetch = k.saturating_mul(self.config.retrieval.overfetch);
        let mut retrieved = self.retrieve(&query, &request.filter, fetch, &mut warnings).await?;

        let (scored, mut skipped) = self.ranker.score_candidates(&self.scorer, &query, &retrieved, &profile);
        let mut considered = scored.len() + skipped.len();
        let mut outcome = self.ranker.rank(scored, &signals, k);
        let mut confidence = self.policy.assess(&outcome.ranked, outcome.max_final, threshold);

        let mut fallback = FallbackInfo {
            state: self.policy.next_state(FallbackState::Normal, &confidence),
            ..Default::default()
        };

        // a timed-out store is not asked again for the relaxed search
        if fallback.state == FallbackState::AdjacentSearch && warnings.is_empty() {
            let expanded = self.expanded_sectors(&query, &request.filter);
            debug!("Query {} retrying over sectors {:?}", query_id, expanded);
            let relaxed = request.filter.clone().with_sector_scope(expanded.clone());
            retrieved.extend(self.retrieve(&query, &relaxed, fetch, &mut warnings).await?);

            let (scored, retry_skipped) =
                self.ranker.score_candidates(&self.scorer, &query, &retrieved, &profile);
            considered = scored.len() + retry_skipped.len();
            skipped = retry_skipped;
            outcome = self.ranker.rank(scored, &signals, k);
            confidence = self.policy.assess(&outcome.ranked, outcome.max_final, threshold);
            fallback.state = self.policy.next_state(FallbackState::AdjacentSearch, &confidence);
            fallback.expanded_sectors = expanded.into_iter().collect();
        }

        let low_confidence = confidence.is_low();
        if low_confidence {
            fallback.annotations.push(LIMITED_COMPS.to_string());
        }
        if fallback.state == FallbackState::Escalated {
            let escalation = EscalationRequest {
                query_id: query_id.clone(),
                context,
                caller_id: request.caller_id.clone(),
                sector: query.metadata.sector.clone(),
                expanded_sectors: fallback.expanded_sectors.clone(),
                max_final: outcome.max_final,
                threshold,
                raised_at: Utc::now(),
            };
            match self.escalation.escalate(&escalation).await {
                Ok(ticket) => fallback.escalation_ticket = Some(ticket),
                Err(e) => {
                    warn!("Escalation for query {} failed: {}", query_id, e);
                    warnings.push(format!("escalation_failed: {e}"));
                }
            }
        }

        let mut ranked = outcome.ranked;
        if self.policy.flag_conflicts(&mut ranked) > 0 {
            fallback.annotations.push(CONFLICTING_SIGNALS.to_string());
        }
        annotate(&mut ranked);
        let stats = ResultStats::compute(&ranked, considered, skipped.len());

        let result = RankedResultSet {
            query_id,
            context,
            caller_id: request.caller_id,
            profile_version: profile.version_id(),
            candidates: ranked,
            max_final: outcome.max_final,
            threshold,
            low_confidence,
            fallback,
            warnings,
            skipped,
            stats,
            created_at: Utc::now(),
        };
        info!(
            "Query {} ({}) returned {} of {} candidates, best {:.3}, state {:?}",
            result.query_id,
            result.profile_version,
            result.candidates.len(),
            considered,
            result.max_final,
            result.fallback.state
        );

        self.results.lock().insert(Arc::new(result.clone()));
        Ok(result)
    }

    /// One retry after a timeout, then an empty, degraded retrieval.
    async fn retrieve(
        &self,
        query: &DealRepresentation,
        filter: &CandidateFilter,
        k: usize,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<RetrievedCandidate>> {
        let timeout = self.config.retrieval.timeout();
        for attempt in 0..2 {
            match tokio::time::timeout(timeout, self.store.retrieve_candidates(query, filter, k)).await {
                Ok(result) => return result,
                Err(_) if attempt == 0 => {
                    warn!("Candidate retrieval timed out after {:?}, retrying", timeout);
                    tokio::time::sleep(self.config.retrieval.retry_backoff()).await;
                }
                Err(_) => {}
            }
        }

        warn!("{}; returning a degraded result", Error::RetrievalTimeout(timeout));
        if !warnings.iter().any(|w| w == RETRIEVAL_TIMEOUT_WARNING) {
            warnings.push(RETRIEVAL_TIMEOUT_WARNING.to_string());
        }
        Ok(Vec::new())
    }

    /// The current sector scope (or the query's own sector) plus siblings.
    fn expanded_sectors(&self, query: &DealRepresentation, filter: &CandidateFilter) -> BTreeSet<String> {
        let mut base = filter.sector_scope().cloned().unwrap_or_default();
        if base.is_empty() && !query.metadata.sector.is_empty() {
            base.insert(query.metadata.sector.clone());
        }
        let adjacency = self.scorer.adjacency();
        let siblings: Vec<String> = base.iter().flat_map(|s| adjacency.siblings(s)).collect();
        base.extend(siblings);
        base
    }

    pub fn submit_feedback(&self, request: FeedbackRequest) -> Result<FeedbackAck> {
        if request.query_id.is_empty() || request.candidate_id.is_empty() {
            return Err(Error::InvalidConfig("feedback needs a query id and a candidate id".into()));
        }
        let label: FeedbackLabel = request.label.parse()?;
        let last = self.last_result(&request.query_id);

        let context = match request.context.as_deref() {
            Some(c) => c.parse()?,
            None => last.as_ref().map(|r| r.context).unwrap_or_default(),
        };
        let caller = request
            .caller_id
            .or_else(|| last.as_ref().and_then(|r| r.caller_id.clone()));
        if let Some(caller) = caller.as_deref() {
            validate_caller_id(caller)?;
        }

        let mut event = FeedbackEvent::new(&request.query_id, &request.candidate_id, label, context);
        if let Some(timestamp) = request.timestamp {
            event = event.with_timestamp(timestamp);
        }
        if let Some(caller) = caller.as_deref() {
            event = event.with_caller(caller);
        }
        if let Some(candidate) = last.as_ref().and_then(|r| r.candidate(&request.candidate_id)) {
            event = event.with_scores(ScoreSnapshot::from(candidate));
        }
        event.notes = request.notes;

        let timestamp = event.timestamp;
        let duplicate = self.feedback.append(event)? == AppendOutcome::Duplicate;
        if !duplicate {
            if let Some(scheduler) = &self.scheduler {
                scheduler.record_events(1);
            }
        }

        Ok(FeedbackAck {
            query_id: request.query_id,
            candidate_id: request.candidate_id,
            timestamp,
            duplicate,
        })
    }

    pub fn last_result(&self, query_id: &str) -> Option<Arc<RankedResultSet>> {
        self.results.lock().get(query_id)
    }

    /// Breakdown of a candidate in the most recent result set for `query_id`.
    pub fn get_attribution(&self, query_id: &str, candidate_id: &str) -> Option<Attribution> {
        let result = self.last_result(query_id)?;
        let candidate = result.candidate(candidate_id)?;
        Some(
            candidate
                .attribution
                .clone()
                .unwrap_or_else(|| Attribution::from_candidate(candidate)),
        )
    }

    pub fn list_weight_profile_versions(&self, context: &str, caller: Option<&str>) -> Result<Vec<WeightProfile>> {
        self.registry.list_versions(&profile_key(context, caller)?)
    }

    pub fn rollback_weight_profile(
        &self,
        context: &str,
        caller: Option<&str>,
        version: u64,
    ) -> Result<Arc<WeightProfile>> {
        self.registry.rollback(&profile_key(context, caller)?, version)
    }

    /// Normalize and store one deal; true when it replaced an existing one.
    pub fn upsert_deal(&self, raw: RawRepresentation) -> Result<bool> {
        let deals = self.writable_store()?;
        let deal = self.normalizer.normalize(raw)?;
        Ok(deals.upsert(deal))
    }

    /// All-or-nothing: nothing is stored if any record fails to normalize.
    pub fn upsert_deals(&self, raws: Vec<RawRepresentation>) -> Result<usize> {
        let deals = self.writable_store()?;
        let normalized = raws
            .into_iter()
            .map(|raw| self.normalizer.normalize(raw))
            .collect::<Result<Vec<_>>>()?;
        let count = normalized.len();
        deals.batch_upsert(normalized);
        Ok(count)
    }

    /// A stored deal in normalized form; `None` when the id is unknown.
    pub fn get_deal(&self, deal_id: &str) -> Result<Option<Arc<DealRepresentation>>> {
        Ok(self.writable_store()?.get(deal_id))
    }

    fn writable_store(&self) -> Result<&Arc<InMemoryDealStore>> {
        self.deals
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("candidate store does not accept deals".into()))
    }

    pub fn feedback_stats(&self, context: Option<&str>) -> Result<FeedbackStats> {
        let context = context.map(str::parse::<SimilarityContext>).transpose()?;
        Ok(self.feedback.stats(context))
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            deals: self.store.len(),
            active_profiles: self.registry.active_count(),
            feedback_events: self.feedback.len(),
            representation_version: self.normalizer.current_version().to_string(),
        }
    }
}

fn resolve_context(explicit: Option<&str>, query_text: Option<&str>) -> Result<SimilarityContext> {
    match (explicit, query_text) {
        (Some(context), _) => context.parse(),
        (None, Some(text)) => Ok(SimilarityContext::detect(text)),
        (None, None) => Ok(SimilarityContext::Default),
    }
}

fn profile_key(context: &str, caller: Option<&str>) -> Result<ProfileKey> {
    let context: SimilarityContext = context.parse()?;
    Ok(match caller {
        Some(caller) => ProfileKey::personalized(context, caller)?,
        None => ProfileKey::preset(context),
    })
}
