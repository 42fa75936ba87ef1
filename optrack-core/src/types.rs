//! Core domain types for optrack
//!
//! These types describe one tracked long-running backend operation as
//! observed by a client.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Operation** | One tracked backend task (indexing, generation, query, research) |
//! | **Kind** | The discriminator selecting which [`OperationDetails`] variant a record carries |
//! | **Owning resource** | The repository (or other target) an operation concerns |
//! | **Terminal** | `completed`, `error` or `cancelled`; no further mutation is accepted |
//!
//! Records are immutable snapshots. The tracker never mutates a stored
//! [`Operation`] in place; it builds a new copy (see [`Operation::patched`])
//! and swaps it in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Operation kind
// ============================================

/// Kinds of backend operation the tracker knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Repository indexing
    Indexing,
    /// Documentation-set generation
    Generation,
    /// Retrieval-augmented query streaming
    Query,
    /// Multi-iteration research
    Research,
}

impl OperationKind {
    /// Every kind, in declaration order
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Indexing,
        OperationKind::Generation,
        OperationKind::Query,
        OperationKind::Research,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Indexing => "indexing",
            OperationKind::Generation => "generation",
            OperationKind::Query => "query",
            OperationKind::Research => "research",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indexing" => Ok(OperationKind::Indexing),
            "generation" => Ok(OperationKind::Generation),
            "query" => Ok(OperationKind::Query),
            "research" => Ok(OperationKind::Research),
            _ => Err(format!("unknown operation kind: {}", s)),
        }
    }
}

// ============================================
// Status state machine
// ============================================

/// Lifecycle status of an operation
///
/// ```text
/// idle ──▶ connecting ──▶ running ──▶ completed | error | cancelled
///              └──────────────────────▶ completed | error | cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Implicit state before start; never stored by the tracker
    Idle,
    /// Waiting for the remote system to accept the work
    Connecting,
    /// Work in progress
    Running,
    Completed,
    Error,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Idle => "idle",
            OperationStatus::Connecting => "connecting",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Error => "error",
            OperationStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, error or cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Error | OperationStatus::Cancelled
        )
    }

    /// Connecting or running
    pub fn is_in_flight(&self) -> bool {
        matches!(self, OperationStatus::Connecting | OperationStatus::Running)
    }

    /// Position along the lifecycle; transitions only ever increase it.
    fn rank(&self) -> u8 {
        match self {
            OperationStatus::Idle => 0,
            OperationStatus::Connecting => 1,
            OperationStatus::Running => 2,
            OperationStatus::Completed | OperationStatus::Error | OperationStatus::Cancelled => 3,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Terminal states have no outgoing transitions, and staying in the
    /// same in-flight state is not a transition.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(OperationStatus::Idle),
            "connecting" => Ok(OperationStatus::Connecting),
            "running" => Ok(OperationStatus::Running),
            "completed" => Ok(OperationStatus::Completed),
            "error" => Ok(OperationStatus::Error),
            "cancelled" => Ok(OperationStatus::Cancelled),
            _ => Err(format!("unknown operation status: {}", s)),
        }
    }
}

// ============================================
// Type-specific details
// ============================================

/// Repository indexing progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingDetails {
    /// Repository being indexed
    pub repository_id: String,
    pub files_processed: u64,
    pub total_files: u64,
    /// File currently being processed, if reported
    pub current_file: Option<String>,
}

/// Documentation-set generation progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDetails {
    /// Repository the documentation is generated for
    pub repository_id: String,
    pub steps_completed: u64,
    pub total_steps: u64,
    pub current_step: Option<String>,
    pub pages_generated: u64,
    pub sections_generated: u64,
}

/// Phase of a retrieval-augmented query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPhase {
    /// Looking up relevant context
    #[default]
    Retrieving,
    /// Waiting for the first answer token
    Generating,
    /// Answer tokens are arriving
    Streaming,
}

impl QueryPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryPhase::Retrieving => "retrieving",
            QueryPhase::Generating => "generating",
            QueryPhase::Streaming => "streaming",
        }
    }
}

/// Retrieval-augmented query progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDetails {
    /// Repository the question is scoped to; `None` for cross-repository queries
    pub repository_id: Option<String>,
    pub question: String,
    pub phase: QueryPhase,
    pub streamed_tokens: u64,
    pub sources_found: u64,
}

/// Multi-iteration research progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchDetails {
    pub repository_id: Option<String>,
    pub topic: String,
    pub stages_completed: u64,
    pub total_stages: u64,
    pub current_stage: Option<String>,
}

/// Kind-specific payload of an operation.
///
/// The variant *is* the operation kind; fields of one kind are only
/// reachable after matching on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationDetails {
    Indexing(IndexingDetails),
    Generation(GenerationDetails),
    Query(QueryDetails),
    Research(ResearchDetails),
}

impl OperationDetails {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationDetails::Indexing(_) => OperationKind::Indexing,
            OperationDetails::Generation(_) => OperationKind::Generation,
            OperationDetails::Query(_) => OperationKind::Query,
            OperationDetails::Research(_) => OperationKind::Research,
        }
    }

    /// Key of the resource this operation belongs to, if the variant has one
    pub fn owning_resource(&self) -> Option<&str> {
        match self {
            OperationDetails::Indexing(d) => Some(d.repository_id.as_str()),
            OperationDetails::Generation(d) => Some(d.repository_id.as_str()),
            OperationDetails::Query(d) => d.repository_id.as_deref(),
            OperationDetails::Research(d) => d.repository_id.as_deref(),
        }
    }

    /// Apply a kind-specific patch.
    ///
    /// Returns `false` (and leaves `self` untouched) when the patch is for a
    /// different kind.
    pub fn apply(&mut self, patch: &DetailsPatch) -> bool {
        match (self, patch) {
            (OperationDetails::Indexing(d), DetailsPatch::Indexing(p)) => {
                set(&mut d.files_processed, p.files_processed);
                set(&mut d.total_files, p.total_files);
                set_some(&mut d.current_file, &p.current_file);
            }
            (OperationDetails::Generation(d), DetailsPatch::Generation(p)) => {
                set(&mut d.steps_completed, p.steps_completed);
                set(&mut d.total_steps, p.total_steps);
                set_some(&mut d.current_step, &p.current_step);
                set(&mut d.pages_generated, p.pages_generated);
                set(&mut d.sections_generated, p.sections_generated);
            }
            (OperationDetails::Query(d), DetailsPatch::Query(p)) => {
                set(&mut d.phase, p.phase);
                set(&mut d.streamed_tokens, p.streamed_tokens);
                set(&mut d.sources_found, p.sources_found);
            }
            (OperationDetails::Research(d), DetailsPatch::Research(p)) => {
                set(&mut d.stages_completed, p.stages_completed);
                set(&mut d.total_stages, p.total_stages);
                set_some(&mut d.current_stage, &p.current_stage);
            }
            _ => return false,
        }
        true
    }

    /// Kind-specific summary archived with a history entry
    pub fn metadata(&self) -> serde_json::Value {
        match self {
            OperationDetails::Indexing(d) => serde_json::json!({
                "files_processed": d.files_processed,
                "total_files": d.total_files,
            }),
            OperationDetails::Generation(d) => serde_json::json!({
                "steps_completed": d.steps_completed,
                "total_steps": d.total_steps,
                "pages_generated": d.pages_generated,
                "sections_generated": d.sections_generated,
            }),
            OperationDetails::Query(d) => serde_json::json!({
                "question": d.question,
                "phase": d.phase.as_str(),
                "streamed_tokens": d.streamed_tokens,
                "sources_found": d.sources_found,
            }),
            OperationDetails::Research(d) => serde_json::json!({
                "topic": d.topic,
                "stages_completed": d.stages_completed,
                "total_stages": d.total_stages,
            }),
        }
    }
}

fn set<T: Copy>(field: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *field = v;
    }
}

fn set_some(field: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value {
        *field = Some(v.clone());
    }
}

// ============================================
// Patches
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexingPatch {
    pub files_processed: Option<u64>,
    pub total_files: Option<u64>,
    pub current_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationPatch {
    pub steps_completed: Option<u64>,
    pub total_steps: Option<u64>,
    pub current_step: Option<String>,
    pub pages_generated: Option<u64>,
    pub sections_generated: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPatch {
    pub phase: Option<QueryPhase>,
    pub streamed_tokens: Option<u64>,
    pub sources_found: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchPatch {
    pub stages_completed: Option<u64>,
    pub total_stages: Option<u64>,
    pub current_stage: Option<String>,
}

/// Partial update of kind-specific fields. `None` fields are left as is.
///
/// The owning resource and the query/topic text are fixed at start and
/// cannot be patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetailsPatch {
    Indexing(IndexingPatch),
    Generation(GenerationPatch),
    Query(QueryPatch),
    Research(ResearchPatch),
}

impl DetailsPatch {
    pub fn kind(&self) -> OperationKind {
        match self {
            DetailsPatch::Indexing(_) => OperationKind::Indexing,
            DetailsPatch::Generation(_) => OperationKind::Generation,
            DetailsPatch::Query(_) => OperationKind::Query,
            DetailsPatch::Research(_) => OperationKind::Research,
        }
    }
}

/// Partial update applied by [`OperationTracker::update`](crate::OperationTracker::update)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationUpdate {
    /// New progress fraction; clamped into `[0.0, 1.0]`, ignored if not finite
    pub progress: Option<f64>,
    /// Forward in-flight transition (e.g. connecting → running).
    /// Backward and terminal targets are ignored.
    pub status: Option<OperationStatus>,
    /// Latest human-readable status line
    pub message: Option<String>,
    pub details: Option<DetailsPatch>,
}

impl OperationUpdate {
    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: DetailsPatch) -> Self {
        self.details = Some(details);
        self
    }
}

// ============================================
// Operation record
// ============================================

/// Everything the caller supplies when starting an operation.
///
/// The tracker assigns `id`, `start_time` and the initial status.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub details: OperationDetails,
    /// Initial progress; clamped like updates
    pub progress: f64,
    pub message: Option<String>,
    /// Start in `connecting` rather than `running`
    pub connecting: bool,
}

impl NewOperation {
    pub fn new(details: OperationDetails) -> Self {
        Self {
            details,
            progress: 0.0,
            message: None,
            connecting: false,
        }
    }

    pub fn indexing(repository_id: impl Into<String>, total_files: u64) -> Self {
        Self::new(OperationDetails::Indexing(IndexingDetails {
            repository_id: repository_id.into(),
            total_files,
            ..Default::default()
        }))
    }

    pub fn generation(repository_id: impl Into<String>, total_steps: u64) -> Self {
        Self::new(OperationDetails::Generation(GenerationDetails {
            repository_id: repository_id.into(),
            total_steps,
            ..Default::default()
        }))
    }

    pub fn query(repository_id: Option<String>, question: impl Into<String>) -> Self {
        Self::new(OperationDetails::Query(QueryDetails {
            repository_id,
            question: question.into(),
            ..Default::default()
        }))
    }

    pub fn research(
        repository_id: Option<String>,
        topic: impl Into<String>,
        total_stages: u64,
    ) -> Self {
        Self::new(OperationDetails::Research(ResearchDetails {
            repository_id,
            topic: topic.into(),
            total_stages,
            ..Default::default()
        }))
    }

    /// Start in `connecting`; a later update moves it to `running`.
    pub fn connecting(mut self) -> Self {
        self.connecting = true;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A tracked operation snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier, assigned at start and never reused
    pub id: String,
    pub status: OperationStatus,
    /// Fraction complete in `[0.0, 1.0]`
    pub progress: f64,
    pub start_time: DateTime<Utc>,
    /// Set exactly once, on the terminal transition
    pub end_time: Option<DateTime<Utc>>,
    /// Failure message; only set when `status` is `error`
    pub error: Option<String>,
    /// Latest status line reported by the remote system
    pub message: Option<String>,
    pub details: OperationDetails,
}

impl Operation {
    pub(crate) fn started(id: String, new: NewOperation, now: DateTime<Utc>) -> Self {
        let status = if new.connecting {
            OperationStatus::Connecting
        } else {
            OperationStatus::Running
        };
        Self {
            id,
            status,
            progress: clamp_progress(new.progress).unwrap_or(0.0),
            start_time: now,
            end_time: None,
            error: None,
            message: new.message,
            details: new.details,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.details.kind()
    }

    pub fn owning_resource(&self) -> Option<&str> {
        self.details.owning_resource()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time between start and end, once terminal
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Copy of this record with `update` merged in.
    ///
    /// Returns `None` when the record is terminal; such records are frozen.
    pub fn patched(&self, update: &OperationUpdate) -> Option<Operation> {
        if self.is_terminal() {
            return None;
        }

        let mut next = self.clone();

        if let Some(progress) = update.progress.and_then(clamp_progress) {
            next.progress = progress;
        }

        if let Some(status) = update.status {
            if status.is_in_flight() && self.status.can_transition_to(status) {
                next.status = status;
            } else if status != self.status {
                tracing::debug!(
                    id = %self.id,
                    from = %self.status,
                    to = %status,
                    "Ignoring illegal status change in update"
                );
            }
        }

        if let Some(message) = &update.message {
            next.message = Some(message.clone());
        }

        if let Some(patch) = &update.details {
            if !next.details.apply(patch) {
                tracing::debug!(
                    id = %self.id,
                    kind = %self.kind(),
                    patch_kind = %patch.kind(),
                    "Ignoring details patch for a different operation kind"
                );
            }
        }

        Some(next)
    }

    /// Copy of this record moved into terminal `status`.
    ///
    /// Returns `None` when the record is already terminal.
    pub(crate) fn finished(
        &self,
        status: OperationStatus,
        now: DateTime<Utc>,
        error: Option<String>,
    ) -> Option<Operation> {
        debug_assert!(status.is_terminal());
        if !self.status.can_transition_to(status) {
            return None;
        }

        let mut next = self.clone();
        next.status = status;
        next.end_time = Some(now);
        next.error = if status == OperationStatus::Error {
            error
        } else {
            None
        };
        if status == OperationStatus::Completed {
            next.progress = 1.0;
        }
        Some(next)
    }
}

/// Clamp a progress value into `[0.0, 1.0]`; non-finite values are rejected.
pub fn clamp_progress(progress: f64) -> Option<f64> {
    progress.is_finite().then(|| progress.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use OperationStatus::*;

        assert!(Connecting.can_transition_to(Running));
        assert!(Connecting.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Error));

        assert!(!Running.can_transition_to(Connecting));
        assert!(!Running.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Error));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(!Error.can_transition_to(Completed));
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("compile".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_owning_resource_by_variant() {
        let indexing = NewOperation::indexing("repoA", 10).details;
        assert_eq!(indexing.owning_resource(), Some("repoA"));

        let scoped = NewOperation::query(Some("repoB".to_string()), "why?").details;
        assert_eq!(scoped.owning_resource(), Some("repoB"));

        let global = NewOperation::research(None, "auth flow", 3).details;
        assert_eq!(global.owning_resource(), None);
    }

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(0.25), Some(0.25));
        assert_eq!(clamp_progress(-0.5), Some(0.0));
        assert_eq!(clamp_progress(1.7), Some(1.0));
        assert_eq!(clamp_progress(f64::NAN), None);
        assert_eq!(clamp_progress(f64::INFINITY), None);
    }

    #[test]
    fn test_details_patch_kind_mismatch_is_ignored() {
        let mut details = NewOperation::indexing("repoA", 10).details;
        let before = details.clone();

        let applied = details.apply(&DetailsPatch::Query(QueryPatch {
            streamed_tokens: Some(42),
            ..Default::default()
        }));

        assert!(!applied);
        assert_eq!(details, before);
    }

    #[test]
    fn test_patched_leaves_original_untouched() {
        let op = Operation::started(
            "op-1".to_string(),
            NewOperation::indexing("repoA", 10),
            Utc::now(),
        );

        let update = OperationUpdate::progress(0.5).with_details(DetailsPatch::Indexing(
            IndexingPatch {
                files_processed: Some(5),
                current_file: Some("src/lib.rs".to_string()),
                ..Default::default()
            },
        ));
        let next = op.patched(&update).unwrap();

        assert_eq!(op.progress, 0.0);
        assert_eq!(next.progress, 0.5);
        match &next.details {
            OperationDetails::Indexing(d) => {
                assert_eq!(d.files_processed, 5);
                assert_eq!(d.total_files, 10);
                assert_eq!(d.current_file.as_deref(), Some("src/lib.rs"));
            }
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_update_cannot_move_status_backwards_or_to_terminal() {
        let op = Operation::started(
            "op-1".to_string(),
            NewOperation::generation("repoA", 4),
            Utc::now(),
        );
        assert_eq!(op.status, OperationStatus::Running);

        let back = op
            .patched(&OperationUpdate::default().with_status(OperationStatus::Connecting))
            .unwrap();
        assert_eq!(back.status, OperationStatus::Running);

        let terminal = op
            .patched(&OperationUpdate::default().with_status(OperationStatus::Completed))
            .unwrap();
        assert_eq!(terminal.status, OperationStatus::Running);
        assert!(terminal.end_time.is_none());
    }

    #[test]
    fn test_finished_sets_end_time_once() {
        let start = Utc::now();
        let op = Operation::started(
            "op-1".to_string(),
            NewOperation::research(None, "caching", 3),
            start,
        );
        let end = start + chrono::Duration::seconds(90);

        let failed = op
            .finished(OperationStatus::Error, end, Some("boom".to_string()))
            .unwrap();
        assert_eq!(failed.end_time, Some(end));
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.duration(), Some(chrono::Duration::seconds(90)));

        assert!(failed
            .finished(OperationStatus::Completed, end, None)
            .is_none());
        assert!(failed.patched(&OperationUpdate::progress(0.9)).is_none());
    }
}
