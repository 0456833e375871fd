//! Candidate store contract and an in-memory reference implementation.

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::Result;
use crate::filter::{CandidateFilter, Filter};
use crate::representation::DealRepresentation;

/// One candidate handed back by the vector/metadata store.
///
/// `approx_distance` is advisory; callers always re-score exactly.
#[derive(Debug, Clone)]
pub struct RetrievedCandidate {
    pub id: String,
    pub representation: Arc<DealRepresentation>,
    pub approx_distance: f32,
}

#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn retrieve_candidates(
        &self,
        query: &DealRepresentation,
        filter: &CandidateFilter,
        k: usize,
    ) -> Result<Vec<RetrievedCandidate>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exact linear-scan store keyed by deal id
#[derive(Default)]
pub struct InMemoryDealStore {
    deals: RwLock<AHashMap<String, Arc<DealRepresentation>>>,
}

impl InMemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a deal; returns true when it replaced an existing one.
    pub fn upsert(&self, deal: DealRepresentation) -> bool {
        let id = deal.id.clone();
        self.deals.write().insert(id, Arc::new(deal)).is_some()
    }

    pub fn batch_upsert(&self, deals: impl IntoIterator<Item = DealRepresentation>) {
        let mut guard = self.deals.write();
        for deal in deals {
            guard.insert(deal.id.clone(), Arc::new(deal));
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<DealRepresentation>> {
        self.deals.read().get(id).cloned()
    }

    pub fn delete(&self, id: &str) -> bool {
        self.deals.write().remove(id).is_some()
    }

    fn approx_distance(query: &DealRepresentation, deal: &DealRepresentation) -> f32 {
        if let (Some(a), Some(b)) = (&query.structured, &deal.structured) {
            if let Some(d) = a.l2_distance(b) {
                return d;
            }
        }
        if let (Some((_, a)), Some((_, b))) = (query.primary_text(), deal.primary_text()) {
            if let Some(cos) = a.cosine_similarity(b) {
                return 1.0 - cos;
            }
        }
        f32::MAX
    }
}

#[async_trait]
impl CandidateStore for InMemoryDealStore {
    async fn retrieve_candidates(
        &self,
        query: &DealRepresentation,
        filter: &CandidateFilter,
        k: usize,
    ) -> Result<Vec<RetrievedCandidate>> {
        let deals = self.deals.read();
        let mut results: Vec<RetrievedCandidate> = deals
            .values()
            .filter(|deal| deal.id != query.id && filter.matches(deal))
            .map(|deal| RetrievedCandidate {
                id: deal.id.clone(),
                representation: Arc::clone(deal),
                approx_distance: Self::approx_distance(query, deal),
            })
            .collect();

        results.sort_by(|a, b| {
            a.approx_distance
                .total_cmp(&b.approx_distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(k);
        Ok(results)
    }

    fn len(&self) -> usize {
        self.deals.read().len()
    }
}
