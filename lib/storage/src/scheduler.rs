// Background tuning worker: runs the tuning job when enough feedback has
// accumulated or the interval elapses, off the query path.

use chrono::{Duration as ChronoDuration, Utc};
use dealsim_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::feedback::FeedbackLog;
use crate::registry::WeightRegistry;
use crate::tuning::{ProxySignal, TuningJob, TuningReport};

#[derive(Default)]
struct SchedulerState {
    pending_events: usize,
    triggered: bool,
    running: bool,
    runs: u64,
    last_report: Option<TuningReport>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    condvar: Condvar,
}

pub struct TuningScheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    event_threshold: usize,
}

impl TuningScheduler {
    pub fn spawn(
        job: TuningJob,
        feedback: Arc<FeedbackLog>,
        registry: Arc<WeightRegistry>,
        proxies: Vec<ProxySignal>,
    ) -> Result<Self> {
        let event_threshold = job.config().event_threshold.max(1);
        let interval = Duration::from_secs(job.config().interval_secs.max(1));
        let window = ChronoDuration::days(job.config().window_days.max(1));

        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                running: true,
                ..Default::default()
            }),
            condvar: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("tuning-worker".to_string())
            .spawn(move || {
                let mut next_run = Instant::now() + interval;
                loop {
                    let mut state = worker.state.lock();
                    while state.running && !state.triggered && state.pending_events < event_threshold {
                        let now = Instant::now();
                        if now >= next_run {
                            break;
                        }
                        worker.condvar.wait_for(&mut state, next_run - now);
                    }
                    if !state.running {
                        break;
                    }
                    state.triggered = false;
                    state.pending_events = 0;
                    drop(state);

                    let now = Utc::now();
                    // end bound is exclusive; include events stamped this instant
                    let events = feedback.range_scan(now - window, now + ChronoDuration::seconds(1));
                    debug!("Tuning worker picked up {} events", events.len());
                    let report = job.run(&events, &proxies, &registry);
                    next_run = Instant::now() + interval;

                    let mut state = worker.state.lock();
                    state.runs += 1;
                    state.last_report = Some(report);
                    worker.condvar.notify_all();
                }
                info!("Tuning worker stopped");
            })
            .map_err(Error::Io)?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
            event_threshold,
        })
    }

    /// Count newly logged events; wakes the worker at the threshold.
    pub fn record_events(&self, count: usize) {
        let mut state = self.shared.state.lock();
        state.pending_events += count;
        if state.pending_events >= self.event_threshold {
            self.shared.condvar.notify_all();
        }
    }

    pub fn trigger_now(&self) {
        let mut state = self.shared.state.lock();
        state.triggered = true;
        self.shared.condvar.notify_all();
    }

    pub fn runs(&self) -> u64 {
        self.shared.state.lock().runs
    }

    pub fn last_report(&self) -> Option<TuningReport> {
        self.shared.state.lock().last_report.clone()
    }

    /// Block until at least `runs` runs completed or `timeout` elapsed.
    pub fn wait_for_runs(&self, runs: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.runs < runs {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.shared.condvar.wait_for(&mut state, deadline - now);
        }
        true
    }

    /// Stop the worker and wait for an in-flight run to finish.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
            self.shared.condvar.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TuningScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
