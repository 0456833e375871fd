//! Feedback logger
//!
//! Append-only store of analyst feedback. Events are written to a JSON-lines
//! [`WriteAheadLog`] and indexed in memory by `(timestamp, query, candidate)`
//! for deduplication and range scans, with secondary indexes by caller and
//! by query for the ranker's feedback signals. The log is replayed on open.

use chrono::{DateTime, Utc};
use dealsim_core::{Error, Result};
use dealsim_similarity::{FeedbackSignals, ScoredCandidate, SimilarityContext};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::wal::WriteAheadLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLabel {
    Useful,
    NotUseful,
    Pin,
    Reject,
    /// Analyst manually selected the deal as a comp
    Override,
}

impl FeedbackLabel {
    pub fn is_positive(&self) -> bool {
        matches!(self, FeedbackLabel::Useful | FeedbackLabel::Pin | FeedbackLabel::Override)
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, FeedbackLabel::NotUseful | FeedbackLabel::Reject)
    }
}

impl FromStr for FeedbackLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "+1" => return Ok(FeedbackLabel::Useful),
            "-1" => return Ok(FeedbackLabel::NotUseful),
            _ => {}
        }
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "useful" => Ok(FeedbackLabel::Useful),
            "not_useful" => Ok(FeedbackLabel::NotUseful),
            "pin" | "pinned" => Ok(FeedbackLabel::Pin),
            "reject" | "rejected" => Ok(FeedbackLabel::Reject),
            "override" => Ok(FeedbackLabel::Override),
            other => Err(Error::InvalidConfig(format!("unknown feedback label '{other}'"))),
        }
    }
}

/// Scores of the result the feedback refers to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub s_struct: Option<f32>,
    pub s_text: Option<f32>,
    pub s_meta: f32,
    pub s_final: f32,
}

impl From<&ScoredCandidate> for ScoreSnapshot {
    fn from(c: &ScoredCandidate) -> Self {
        Self {
            s_struct: c.s_struct,
            s_text: c.s_text,
            s_meta: c.s_meta,
            s_final: c.s_final,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub query_id: String,
    pub candidate_id: String,
    pub label: FeedbackLabel,
    pub context: SimilarityContext,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub scores: Option<ScoreSnapshot>,
}

impl FeedbackEvent {
    pub fn new(query_id: &str, candidate_id: &str, label: FeedbackLabel, context: SimilarityContext) -> Self {
        Self {
            query_id: query_id.to_string(),
            candidate_id: candidate_id.to_string(),
            label,
            context,
            timestamp: Utc::now(),
            caller_id: None,
            notes: None,
            scores: None,
        }
    }

    #[must_use]
    pub fn with_caller(mut self, caller_id: &str) -> Self {
        self.caller_id = Some(caller_id.to_string());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_scores(mut self, scores: ScoreSnapshot) -> Self {
        self.scores = Some(scores);
        self
    }

    fn key(&self) -> EventKey {
        (self.timestamp, self.query_id.clone(), self.candidate_id.clone())
    }
}

/// Dedup and ordering key
type EventKey = (DateTime<Utc>, String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: usize,
    pub useful: usize,
    pub not_useful: usize,
    pub pinned: usize,
    pub rejected: usize,
    pub overridden: usize,
}

impl FeedbackStats {
    fn record(&mut self, label: FeedbackLabel) {
        self.total += 1;
        match label {
            FeedbackLabel::Useful => self.useful += 1,
            FeedbackLabel::NotUseful => self.not_useful += 1,
            FeedbackLabel::Pin => self.pinned += 1,
            FeedbackLabel::Reject => self.rejected += 1,
            FeedbackLabel::Override => self.overridden += 1,
        }
    }
}

#[derive(Default)]
struct EventIndex {
    events: BTreeMap<EventKey, FeedbackEvent>,
    by_caller: HashMap<String, Vec<EventKey>>,
    by_query: HashMap<String, Vec<EventKey>>,
}

impl EventIndex {
    /// False when an event with the same key is already indexed.
    fn insert(&mut self, event: FeedbackEvent) -> bool {
        let key = event.key();
        if self.events.contains_key(&key) {
            return false;
        }
        if let Some(caller) = &event.caller_id {
            self.by_caller.entry(caller.clone()).or_default().push(key.clone());
        }
        self.by_query
            .entry(event.query_id.clone())
            .or_default()
            .push(key.clone());
        self.events.insert(key, event);
        true
    }

    fn keys_for<'a>(map: &'a HashMap<String, Vec<EventKey>>, id: Option<&str>) -> &'a [EventKey] {
        id.and_then(|id| map.get(id)).map(Vec::as_slice).unwrap_or_default()
    }
}

pub struct FeedbackLog {
    wal: WriteAheadLog,
    index: RwLock<EventIndex>,
}

impl FeedbackLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let wal = WriteAheadLog::open(path.as_ref()).map_err(|e| Error::Persistence(e.to_string()))?;
        let records = wal.replay().map_err(|e| Error::Persistence(e.to_string()))?;

        let mut index = EventIndex::default();
        for (n, record) in records.iter().enumerate() {
            match serde_json::from_str::<FeedbackEvent>(record) {
                Ok(event) => {
                    index.insert(event);
                }
                Err(e) => warn!("Skipping unreadable feedback record {}: {}", n + 1, e),
            }
        }
        info!(
            "Feedback log {} opened with {} events",
            wal.path().display(),
            index.events.len()
        );

        Ok(Self {
            wal,
            index: RwLock::new(index),
        })
    }

    /// Append an event unless one with the same (query, candidate,
    /// timestamp) is already stored. The event is durable on return.
    pub fn append(&self, event: FeedbackEvent) -> Result<AppendOutcome> {
        let mut index = self.index.write();
        if index.events.contains_key(&event.key()) {
            debug!("Duplicate feedback for {} -> {}", event.query_id, event.candidate_id);
            return Ok(AppendOutcome::Duplicate);
        }

        let line = serde_json::to_vec(&event)?;
        self.wal
            .append(&line)
            .map_err(|e| Error::Persistence(e.to_string()))?;
        index.insert(event);
        Ok(AppendOutcome::Appended)
    }

    /// Events with `from <= timestamp < to`, oldest first.
    pub fn range_scan(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<FeedbackEvent> {
        if from >= to {
            return Vec::new();
        }
        let lower = (from, String::new(), String::new());
        self.index
            .read()
            .events
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(|(key, _)| key.0 < to)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Every event, oldest first.
    pub fn scan_all(&self) -> Vec<FeedbackEvent> {
        self.index.read().events.values().cloned().collect()
    }

    pub fn stats(&self, context: Option<SimilarityContext>) -> FeedbackStats {
        let mut stats = FeedbackStats::default();
        for event in self.index.read().events.values() {
            if context.map_or(true, |c| c == event.context) {
                stats.record(event.label);
            }
        }
        stats
    }

    /// Positive and rejection counts per candidate from the caller's own
    /// history or from earlier feedback on the same query.
    pub fn signals_for(&self, caller_id: Option<&str>, query_id: Option<&str>) -> FeedbackSignals {
        let mut signals = FeedbackSignals::new();
        let index = self.index.read();
        // an event matching both caller and query counts once
        let keys: BTreeSet<&EventKey> = EventIndex::keys_for(&index.by_caller, caller_id)
            .iter()
            .chain(EventIndex::keys_for(&index.by_query, query_id))
            .collect();
        for event in keys.into_iter().filter_map(|key| index.events.get(key)) {
            match event.label {
                label if label.is_positive() => signals.add_positive(&event.candidate_id),
                FeedbackLabel::Reject => signals.add_rejection(&event.candidate_id),
                _ => {}
            }
        }
        signals
    }

    pub fn len(&self) -> usize {
        self.index.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn log(dir: &TempDir) -> FeedbackLog {
        FeedbackLog::open(dir.path().join("feedback.jsonl")).unwrap()
    }

    #[test]
    fn test_duplicate_submission_stored_once() {
        let dir = TempDir::new().unwrap();
        let feedback = log(&dir);
        let event = FeedbackEvent::new("q1", "d1", FeedbackLabel::Useful, SimilarityContext::Default);

        assert_eq!(feedback.append(event.clone()).unwrap(), AppendOutcome::Appended);
        assert_eq!(feedback.append(event.clone()).unwrap(), AppendOutcome::Duplicate);
        assert_eq!(feedback.len(), 1);

        // a later timestamp is a new event
        let later = event.with_timestamp(Utc::now() + Duration::seconds(1));
        assert_eq!(feedback.append(later).unwrap(), AppendOutcome::Appended);
        assert_eq!(feedback.len(), 2);
    }

    #[test]
    fn test_replay_on_open() {
        let dir = TempDir::new().unwrap();
        let ts = Utc::now();
        {
            let feedback = log(&dir);
            feedback
                .append(
                    FeedbackEvent::new("q1", "d1", FeedbackLabel::Pin, SimilarityContext::Screening)
                        .with_timestamp(ts),
                )
                .unwrap();
        }
        let reopened = log(&dir);
        assert_eq!(reopened.len(), 1);
        let dup = FeedbackEvent::new("q1", "d1", FeedbackLabel::Pin, SimilarityContext::Screening).with_timestamp(ts);
        assert_eq!(reopened.append(dup).unwrap(), AppendOutcome::Duplicate);
    }

    #[test]
    fn test_range_scan_is_half_open() {
        let dir = TempDir::new().unwrap();
        let feedback = log(&dir);
        let t0 = Utc::now();
        for i in 0..5 {
            feedback
                .append(
                    FeedbackEvent::new("q", &format!("d{i}"), FeedbackLabel::Useful, SimilarityContext::Default)
                        .with_timestamp(t0 + Duration::seconds(i)),
                )
                .unwrap();
        }

        let window = feedback.range_scan(t0 + Duration::seconds(1), t0 + Duration::seconds(3));
        let ids: Vec<_> = window.iter().map(|e| e.candidate_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);
        assert!(feedback.range_scan(t0, t0).is_empty());
        // scanning never consumes
        assert_eq!(feedback.len(), 5);
    }

    #[test]
    fn test_stats_by_context() {
        let dir = TempDir::new().unwrap();
        let feedback = log(&dir);
        let t0 = Utc::now();
        let labels = [
            (FeedbackLabel::Useful, SimilarityContext::Screening),
            (FeedbackLabel::NotUseful, SimilarityContext::Screening),
            (FeedbackLabel::Override, SimilarityContext::Screening),
            (FeedbackLabel::Reject, SimilarityContext::Default),
        ];
        for (i, (label, context)) in labels.into_iter().enumerate() {
            feedback
                .append(FeedbackEvent::new("q", "d", label, context).with_timestamp(t0 + Duration::seconds(i as i64)))
                .unwrap();
        }

        let screening = feedback.stats(Some(SimilarityContext::Screening));
        assert_eq!(screening.total, 3);
        assert_eq!(screening.overridden, 1);
        assert_eq!(screening.rejected, 0);
        assert_eq!(feedback.stats(None).total, 4);
    }

    #[test]
    fn test_signals_for_caller() {
        let dir = TempDir::new().unwrap();
        let feedback = log(&dir);
        let t0 = Utc::now();
        let events = [
            ("alice", "d1", FeedbackLabel::Useful),
            ("alice", "d1", FeedbackLabel::Pin),
            ("alice", "d2", FeedbackLabel::Reject),
            ("alice", "d3", FeedbackLabel::NotUseful),
            ("bob", "d4", FeedbackLabel::Useful),
        ];
        for (i, (caller, candidate, label)) in events.into_iter().enumerate() {
            feedback
                .append(
                    FeedbackEvent::new("q", candidate, label, SimilarityContext::Default)
                        .with_caller(caller)
                        .with_timestamp(t0 + Duration::seconds(i as i64)),
                )
                .unwrap();
        }

        let signals = feedback.signals_for(Some("alice"), None);
        assert!((signals.adjustment("d1", 0.05, 0.15) - 0.10).abs() < 1e-6);
        assert!((signals.adjustment("d2", 0.05, 0.15) + 0.05).abs() < 1e-6);
        assert_eq!(signals.adjustment("d3", 0.05, 0.15), 0.0);
        assert_eq!(signals.adjustment("d4", 0.05, 0.15), 0.0);
        assert!(feedback.signals_for(None, None).is_empty());
    }

    #[test]
    fn test_signals_for_query_counts_each_event_once() {
        let dir = TempDir::new().unwrap();
        let feedback = log(&dir);
        let t0 = Utc::now();
        let events = [
            ("q1", "alice", "d1", FeedbackLabel::Pin),
            ("q1", "bob", "d2", FeedbackLabel::Useful),
            ("q2", "bob", "d3", FeedbackLabel::Useful),
        ];
        for (i, (query, caller, candidate, label)) in events.into_iter().enumerate() {
            feedback
                .append(
                    FeedbackEvent::new(query, candidate, label, SimilarityContext::Default)
                        .with_caller(caller)
                        .with_timestamp(t0 + Duration::seconds(i as i64)),
                )
                .unwrap();
        }

        // alice's own pin on q1 matches by caller and by query
        let signals = feedback.signals_for(Some("alice"), Some("q1"));
        assert!((signals.adjustment("d1", 0.05, 0.15) - 0.05).abs() < 1e-6);
        assert!((signals.adjustment("d2", 0.05, 0.15) - 0.05).abs() < 1e-6);
        assert_eq!(signals.adjustment("d3", 0.05, 0.15), 0.0);

        let reopened = log(&dir);
        let signals = reopened.signals_for(None, Some("q2"));
        assert!((signals.adjustment("d3", 0.05, 0.15) - 0.05).abs() < 1e-6);
        assert!(reopened.signals_for(Some("carol"), Some("q9")).is_empty());
    }

    #[test]
    fn test_event_after_torn_record_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feedback.jsonl");
        let t0 = Utc::now();
        {
            let feedback = log(&dir);
            feedback
                .append(FeedbackEvent::new("q1", "d1", FeedbackLabel::Useful, SimilarityContext::Default).with_timestamp(t0))
                .unwrap();
        }
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(br#"{"query_id":"q2","cand"#).unwrap();
        }
        {
            let feedback = log(&dir);
            assert_eq!(feedback.len(), 1);
            let ack = FeedbackEvent::new("q3", "d3", FeedbackLabel::Pin, SimilarityContext::Default)
                .with_timestamp(t0 + Duration::seconds(1));
            assert_eq!(feedback.append(ack).unwrap(), AppendOutcome::Appended);
            assert_eq!(feedback.len(), 2);
        }

        let reopened = log(&dir);
        assert_eq!(reopened.len(), 2);
        let ids: Vec<_> = reopened.scan_all().into_iter().map(|e| e.query_id).collect();
        assert_eq!(ids, vec!["q1", "q3"]);
    }

    #[test]
    fn test_parse_label() {
        assert_eq!("not-useful".parse::<FeedbackLabel>().unwrap(), FeedbackLabel::NotUseful);
        assert_eq!("+1".parse::<FeedbackLabel>().unwrap(), FeedbackLabel::Useful);
        assert!("maybe".parse::<FeedbackLabel>().is_err());
    }
}
