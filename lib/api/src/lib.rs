pub mod config;
pub mod escalation;
pub mod rest;
pub mod service;

pub use config::{RepresentationConfig, RetrievalConfig, ServiceConfig};
pub use escalation::{EscalationRequest, EscalationSink, LoggingEscalationSink};
pub use rest::RestApi;
pub use service::{FeedbackAck, FeedbackRequest, HealthStatus, SearchRequest, SimilarityService};
