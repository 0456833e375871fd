pub mod feedback;
pub mod registry;
pub mod scheduler;
pub mod tuning;
pub mod wal;

pub use feedback::{AppendOutcome, FeedbackEvent, FeedbackLabel, FeedbackLog, FeedbackStats, ScoreSnapshot};
pub use registry::WeightRegistry;
pub use scheduler::TuningScheduler;
pub use tuning::{
    KeyOutcome, ProxyKind, ProxySignal, TuningConfig, TuningJob, TuningReport, TuningStatus,
};
pub use wal::WriteAheadLog;
