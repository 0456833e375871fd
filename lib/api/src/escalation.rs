//! Hand-off of no-good-match queries to manual review.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealsim_core::Result;
use dealsim_similarity::SimilarityContext;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;
use uuid::Uuid;

/// What the reviewer needs to pick up an escalated query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub query_id: String,
    pub context: SimilarityContext,
    pub caller_id: Option<String>,
    pub sector: String,
    pub expanded_sectors: Vec<String>,
    pub max_final: f32,
    pub threshold: f32,
    pub raised_at: DateTime<Utc>,
}

/// External review queue. Returns an opaque ticket reference.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn escalate(&self, request: &EscalationRequest) -> Result<String>;
}

const DEFAULT_RETAINED_TICKETS: usize = 256;

/// Logs escalations and keeps the most recent ones in memory; stands in for
/// a real review queue.
pub struct LoggingEscalationSink {
    retained: usize,
    raised: Mutex<VecDeque<(String, EscalationRequest)>>,
}

impl Default for LoggingEscalationSink {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_TICKETS)
    }
}

impl LoggingEscalationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retained` tickets, dropping the oldest first.
    pub fn with_retention(retained: usize) -> Self {
        Self {
            retained,
            raised: Mutex::new(VecDeque::new()),
        }
    }

    /// Retained tickets, oldest first.
    pub fn tickets(&self) -> Vec<(String, EscalationRequest)> {
        self.raised.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl EscalationSink for LoggingEscalationSink {
    async fn escalate(&self, request: &EscalationRequest) -> Result<String> {
        let ticket = format!("esc-{}", Uuid::new_v4());
        warn!(
            "Escalating query {} ({}, sector {}): best score {:.3} below {:.2}, ticket {}",
            request.query_id, request.context, request.sector, request.max_final, request.threshold, ticket
        );
        if self.retained > 0 {
            let mut raised = self.raised.lock();
            if raised.len() == self.retained {
                raised.pop_front();
            }
            raised.push_back((ticket.clone(), request.clone()));
        }
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> EscalationRequest {
        EscalationRequest {
            query_id: "q1".to_string(),
            context: SimilarityContext::Screening,
            caller_id: None,
            sector: "SaaS".to_string(),
            expanded_sectors: vec!["Fintech".to_string()],
            max_final: 0.41,
            threshold: 0.6,
            raised_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_logging_sink_issues_unique_tickets() {
        let sink = LoggingEscalationSink::new();
        let request = request();

        let a = sink.escalate(&request).await.unwrap();
        let b = sink.escalate(&request).await.unwrap();
        assert!(a.starts_with("esc-"));
        assert_ne!(a, b);
        assert_eq!(sink.tickets().len(), 2);
    }

    #[tokio::test]
    async fn test_retained_tickets_are_bounded() {
        let sink = LoggingEscalationSink::with_retention(3);
        let mut issued = Vec::new();
        for _ in 0..10 {
            issued.push(sink.escalate(&request()).await.unwrap());
        }

        let kept: Vec<String> = sink.tickets().into_iter().map(|(ticket, _)| ticket).collect();
        assert_eq!(kept, issued[7..].to_vec());

        let silent = LoggingEscalationSink::with_retention(0);
        assert!(silent.escalate(&request()).await.unwrap().starts_with("esc-"));
        assert!(silent.tickets().is_empty());
    }
}
