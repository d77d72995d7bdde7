mod auth;
mod credentials;
mod download;
mod error;
mod job;
mod orchestrator;
mod progress;
mod steps;
mod telemetry;
mod transfer;
pub mod wizard;

pub use auth::SessionAuthenticator;
pub use credentials::{normalize_base_url, Credentials};
pub use download::{guess_content_type, ArtifactSource, DownloadWaiter};
pub use error::{ExportError, ExportResult, FailureClass};
pub use job::{ExportJob, JobState};
pub use orchestrator::{drive_export, DownloadPlan, ExportOptions, ExportOrchestrator};
pub use progress::{ProgressEvent, ProgressKind, ProgressSink};
pub use steps::{SequencerOptions, StepAction, StepCheck, StepDefinition, StepSequencer};
pub use telemetry::{ExportTelemetry, FailureRecord, RunRecord, TelemetryError};
pub use transfer::{
    client_for_cookies, fetch_artifact, ArtifactFetcher, DownloadArtifact, SessionArtifactFetcher,
};
