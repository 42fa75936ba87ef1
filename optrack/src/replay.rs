//! Feed replay
//!
//! Reads a JSON-lines feed of operation events and drives an
//! [`OperationTracker`] with them, the way a live transport would.
//!
//! Start events carry a feed-local `ref`; later events address the
//! operation by that ref. Events for refs that were never started reach the
//! tracker as unknown ids and are ignored there.
//!
//! ```text
//! {"event":"start","ref":"idx","operation":{"type":"indexing","repository_id":"repoA","total_files":10}}
//! {"event":"progress","ref":"idx","progress":0.5,"details":{"type":"indexing","files_processed":5}}
//! {"event":"complete","ref":"idx"}
//! ```

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use optrack_core::notifications::Delivery;
use optrack_core::types::{
    DetailsPatch, NewOperation, OperationDetails, OperationStatus, OperationUpdate,
};
use optrack_core::{Error, NotificationEvent, NotificationGate, OperationTracker, Result};

/// One line of the feed
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FeedEvent {
    Start {
        #[serde(rename = "ref")]
        reference: String,
        operation: OperationDetails,
        #[serde(default)]
        connecting: bool,
        #[serde(default)]
        progress: Option<f64>,
        #[serde(default)]
        message: Option<String>,
    },
    Progress {
        #[serde(rename = "ref")]
        reference: String,
        #[serde(default)]
        progress: Option<f64>,
        #[serde(default)]
        status: Option<OperationStatus>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        details: Option<DetailsPatch>,
    },
    Complete {
        #[serde(rename = "ref")]
        reference: String,
        #[serde(default)]
        result: Option<DetailsPatch>,
    },
    Error {
        #[serde(rename = "ref")]
        reference: String,
        message: String,
    },
    Cancel {
        #[serde(rename = "ref")]
        reference: String,
    },
    Clear {
        #[serde(rename = "ref")]
        reference: String,
    },
}

impl FeedEvent {
    pub fn reference(&self) -> &str {
        match self {
            FeedEvent::Start { reference, .. }
            | FeedEvent::Progress { reference, .. }
            | FeedEvent::Complete { reference, .. }
            | FeedEvent::Error { reference, .. }
            | FeedEvent::Cancel { reference }
            | FeedEvent::Clear { reference } => reference,
        }
    }
}

/// Parse a feed, skipping blank lines and `#` comments
pub fn parse_feed<R: BufRead>(reader: R) -> Result<Vec<FeedEvent>> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str(trimmed).map_err(|e| Error::Feed {
            line: idx + 1,
            message: e.to_string(),
        })?;
        events.push(event);
    }
    Ok(events)
}

/// A notification the gate let through
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub event: NotificationEvent,
    pub operation_id: String,
    pub reference: String,
    pub summary: String,
    pub sound: bool,
    pub desktop: bool,
}

/// Applies feed events to a tracker and collects gated notifications
pub struct Replayer {
    tracker: Arc<OperationTracker>,
    gate: NotificationGate,
    /// Feed ref → tracker id
    ids: HashMap<String, String>,
    /// Last progress notification per operation id
    last_progress: HashMap<String, DateTime<Utc>>,
    notices: Vec<Notice>,
    applied: usize,
    ignored: usize,
}

impl Replayer {
    pub fn new(tracker: Arc<OperationTracker>, gate: NotificationGate) -> Self {
        Self {
            tracker,
            gate,
            ids: HashMap::new(),
            last_progress: HashMap::new(),
            notices: Vec::new(),
            applied: 0,
            ignored: 0,
        }
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Events that changed tracker state
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Events the tracker ignored (unknown ref or terminal operation)
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    /// Tracker id for a feed ref; unknown refs pass through unchanged
    pub fn id_for(&self, reference: &str) -> String {
        self.ids
            .get(reference)
            .cloned()
            .unwrap_or_else(|| reference.to_string())
    }

    pub fn apply_all(&mut self, events: Vec<FeedEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    pub fn apply(&mut self, event: FeedEvent) {
        let reference = event.reference().to_string();
        let (applied, notification) = match event {
            FeedEvent::Start {
                reference,
                operation,
                connecting,
                progress,
                message,
            } => {
                let mut new = NewOperation::new(operation);
                new.connecting = connecting;
                new.progress = progress.unwrap_or(0.0);
                new.message = message;
                let id = self.tracker.start(new);
                if let Some(previous) = self.ids.insert(reference.clone(), id) {
                    tracing::warn!(reference = %reference, previous = %previous, "Feed ref reused for a new operation");
                }
                (true, Some(NotificationEvent::Start))
            }
            FeedEvent::Progress {
                reference,
                progress,
                status,
                message,
                details,
            } => {
                let update = OperationUpdate {
                    progress,
                    status,
                    message,
                    details,
                };
                let applied = self.tracker.update(&self.id_for(&reference), update);
                (applied, Some(NotificationEvent::Progress))
            }
            FeedEvent::Complete { reference, result } => {
                let applied = self.tracker.complete(&self.id_for(&reference), result);
                (applied, Some(NotificationEvent::Complete))
            }
            FeedEvent::Error { reference, message } => {
                let applied = self.tracker.error(&self.id_for(&reference), message);
                (applied, Some(NotificationEvent::Error))
            }
            FeedEvent::Cancel { reference } => {
                (self.tracker.cancel(&self.id_for(&reference)), None)
            }
            FeedEvent::Clear { reference } => (self.tracker.clear(&self.id_for(&reference)), None),
        };

        if !applied {
            self.ignored += 1;
            tracing::debug!(reference = %reference, "Feed event ignored by tracker");
            return;
        }
        self.applied += 1;

        if let Some(event) = notification {
            self.maybe_notify(event, &reference);
        }
    }

    fn maybe_notify(&mut self, event: NotificationEvent, reference: &str) {
        let id = self.id_for(reference);
        let now = Utc::now();
        let last = self.last_progress.get(&id).copied();
        if !self.gate.should_notify(event, last, now) {
            return;
        }
        let Some(Delivery { sound, desktop }) = self.gate.delivery() else {
            return;
        };
        let Some(op) = self.tracker.get(&id) else {
            return;
        };
        if event == NotificationEvent::Progress {
            self.last_progress.insert(id.clone(), now);
        }

        let resource = op.owning_resource().unwrap_or("-");
        let summary = match event {
            NotificationEvent::Start => format!("{} {} started", op.kind(), resource),
            NotificationEvent::Progress => format!(
                "{} {} at {}",
                op.kind(),
                resource,
                optrack_core::format::format_progress(op.progress)
            ),
            NotificationEvent::Complete => format!(
                "{} {} completed in {}",
                op.kind(),
                resource,
                optrack_core::format::format_duration_opt(op.duration())
            ),
            NotificationEvent::Error => format!(
                "{} {} failed: {}",
                op.kind(),
                resource,
                op.error.as_deref().unwrap_or("unknown error")
            ),
        };

        self.notices.push(Notice {
            event,
            operation_id: id,
            reference: reference.to_string(),
            summary,
            sound,
            desktop,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optrack_core::notifications::{NotificationConfig, NotificationConfigUpdate};
    use optrack_core::OperationKind;

    const FEED: &str = r#"
# indexing run
{"event":"start","ref":"idx","operation":{"type":"indexing","repository_id":"repoA","total_files":10}}
{"event":"progress","ref":"idx","progress":0.5,"details":{"type":"indexing","files_processed":5}}
{"event":"complete","ref":"idx","result":{"type":"indexing","files_processed":10}}
{"event":"start","ref":"q","operation":{"type":"query","question":"why?"},"connecting":true}
{"event":"progress","ref":"q","status":"running","details":{"type":"query","phase":"streaming","streamed_tokens":12}}
{"event":"error","ref":"q","message":"stream closed"}
{"event":"cancel","ref":"ghost"}
"#;

    fn replay(feed: &str, gate: NotificationGate) -> Replayer {
        let events = parse_feed(feed.as_bytes()).unwrap();
        let mut replayer = Replayer::new(Arc::new(OperationTracker::new()), gate);
        replayer.apply_all(events);
        replayer
    }

    #[test]
    fn test_parse_feed_skips_comments_and_blanks() {
        let events = parse_feed(FEED.as_bytes()).unwrap();
        assert_eq!(events.len(), 7);
        assert_eq!(events[0].reference(), "idx");
    }

    #[test]
    fn test_parse_feed_reports_line() {
        let err = parse_feed("\n{\"event\":\"start\"}\n".as_bytes()).unwrap_err();
        match err {
            Error::Feed { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_replay_drives_tracker() {
        let replayer = replay(FEED, NotificationGate::default());
        let tracker = replayer.tracker();

        assert_eq!(replayer.applied(), 6);
        assert_eq!(replayer.ignored(), 1);

        let history = tracker.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, OperationKind::Query);
        assert_eq!(history[0].status, OperationStatus::Error);
        assert_eq!(history[1].metadata["files_processed"], 10);

        let query = tracker.get(&replayer.id_for("q")).unwrap();
        assert_eq!(query.error.as_deref(), Some("stream closed"));
    }

    #[test]
    fn test_default_gate_notices() {
        let replayer = replay(FEED, NotificationGate::default());
        let events: Vec<_> = replayer.notices().iter().map(|n| n.event).collect();

        // progress notifications are off by default
        assert_eq!(
            events,
            vec![
                NotificationEvent::Start,
                NotificationEvent::Complete,
                NotificationEvent::Start,
                NotificationEvent::Error,
            ]
        );
        assert!(replayer.notices()[3].summary.contains("stream closed"));
    }

    #[test]
    fn test_progress_notices_are_throttled() {
        let mut gate = NotificationGate::new(NotificationConfig::default());
        gate.update_config(NotificationConfigUpdate {
            on_start: Some(false),
            on_complete: Some(false),
            on_progress: Some(true),
            progress_interval: Some(3600),
            ..Default::default()
        });
        let feed = r#"
{"event":"start","ref":"r","operation":{"type":"research","topic":"caching","total_stages":3}}
{"event":"progress","ref":"r","progress":0.3}
{"event":"progress","ref":"r","progress":0.6}
{"event":"complete","ref":"r"}
"#;
        let replayer = replay(feed, gate);

        assert_eq!(replayer.notices().len(), 1);
        assert_eq!(replayer.notices()[0].event, NotificationEvent::Progress);
        assert!(replayer.notices()[0].summary.ends_with("30%"));
    }
}
