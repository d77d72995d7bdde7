use std::fmt;

use uuid::Uuid;

use super::progress::ProgressEvent;

/// Lifecycle of one export run. Transitions only move forward; `Failed`
/// is terminal and reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Authenticating,
    RunningStep(usize),
    AwaitingArtifact,
    Downloading,
    Done,
    Failed,
}

impl JobState {
    fn rank(&self) -> usize {
        match self {
            JobState::Idle => 0,
            JobState::Authenticating => 1,
            JobState::RunningStep(ordinal) => 2 + ordinal,
            JobState::AwaitingArtifact => usize::MAX - 3,
            JobState::Downloading => usize::MAX - 2,
            JobState::Done => usize::MAX - 1,
            JobState::Failed => usize::MAX,
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => f.write_str("idle"),
            JobState::Authenticating => f.write_str("authenticating"),
            JobState::RunningStep(ordinal) => write!(f, "running_step({ordinal})"),
            JobState::AwaitingArtifact => f.write_str("awaiting_artifact"),
            JobState::Downloading => f.write_str("downloading"),
            JobState::Done => f.write_str("done"),
            JobState::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: Uuid,
    state: JobState,
    last_event: Option<ProgressEvent>,
    error: Option<String>,
}

impl ExportJob {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: JobState::Idle,
            last_event: None,
            error: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn last_event(&self) -> Option<&ProgressEvent> {
        self.last_event.as_ref()
    }

    pub fn record_event(&mut self, event: &ProgressEvent) {
        self.last_event = Some(event.clone());
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Moves the job forward. Backward transitions and transitions out of
    /// a terminal state are ignored rather than honored.
    pub fn advance(&mut self, next: JobState) {
        if self.state.terminal() {
            return;
        }
        if next.rank() > self.state.rank() {
            self.state = next;
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.state == JobState::Done {
            return;
        }
        self.state = JobState::Failed;
        self.error = Some(reason.into());
    }
}

impl Default for ExportJob {
    fn default() -> Self {
        Self::new()
    }
}
