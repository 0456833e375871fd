//! Sector adjacency
//!
//! Partial credit between related sector codes, and the sibling set used
//! when a low-confidence search is retried with a relaxed sector filter.

use ahash::AHashMap;
use dealsim_core::code_key;
use serde::{Deserialize, Serialize};

pub trait SectorAdjacency: Send + Sync {
    /// Affinity in [0, 1]; 1 for identical codes.
    fn affinity(&self, a: &str, b: &str) -> f32;

    /// Sectors considered siblings of `sector`, excluding itself.
    fn siblings(&self, sector: &str) -> Vec<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjacencyEdge {
    pub a: String,
    pub b: String,
    pub affinity: f32,
}

/// Symmetric lookup table of sector pairs. Lookups ignore case; siblings
/// come back under the name first inserted.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyTable {
    edges: AHashMap<String, AHashMap<String, f32>>,
    names: AHashMap<String, String>,
}

impl AdjacencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = AdjacencyEdge>) -> Self {
        let mut table = Self::new();
        for edge in edges {
            table.insert(&edge.a, &edge.b, edge.affinity);
        }
        table
    }

    #[must_use]
    pub fn with_pair(mut self, a: &str, b: &str, affinity: f32) -> Self {
        self.insert(a, b, affinity);
        self
    }

    pub fn insert(&mut self, a: &str, b: &str, affinity: f32) {
        let (ka, kb) = (code_key(a), code_key(b));
        if ka == kb {
            return;
        }
        let affinity = affinity.clamp(0.0, 1.0);
        self.names.entry(ka.clone()).or_insert_with(|| a.trim().to_string());
        self.names.entry(kb.clone()).or_insert_with(|| b.trim().to_string());
        self.edges.entry(ka.clone()).or_default().insert(kb.clone(), affinity);
        self.edges.entry(kb).or_default().insert(ka, affinity);
    }

    pub fn len(&self) -> usize {
        self.edges.values().map(|m| m.len()).sum::<usize>() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// A small default table of commonly substituted sector families.
    pub fn standard() -> Self {
        Self::new()
            .with_pair("SaaS", "Fintech", 0.5)
            .with_pair("SaaS", "Healthcare IT", 0.5)
            .with_pair("SaaS", "Cybersecurity", 0.6)
            .with_pair("Fintech", "Financial Services", 0.6)
            .with_pair("Healthcare IT", "Healthcare Services", 0.5)
            .with_pair("Consumer", "Retail", 0.6)
            .with_pair("Industrials", "Business Services", 0.4)
            .with_pair("Energy", "Industrials", 0.3)
    }
}

impl SectorAdjacency for AdjacencyTable {
    fn affinity(&self, a: &str, b: &str) -> f32 {
        let (ka, kb) = (code_key(a), code_key(b));
        if ka == kb {
            return 1.0;
        }
        self.edges
            .get(&ka)
            .and_then(|m| m.get(&kb))
            .copied()
            .unwrap_or(0.0)
    }

    fn siblings(&self, sector: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .edges
            .get(&code_key(sector))
            .map(|m| {
                m.iter()
                    .filter(|(_, affinity)| **affinity > 0.0)
                    .filter_map(|(key, _)| self.names.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default();
        out.sort();
        out
    }
}
