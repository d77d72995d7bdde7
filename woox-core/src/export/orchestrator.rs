use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::browser::{
    BrowserKind, DrivenPage, DrivenSession, LaunchOverrides, RetryPolicy, SessionLauncher,
};
use crate::config::{DownloadStrategyKind, ExportConfig, SettlePolicy};

use super::auth::SessionAuthenticator;
use super::credentials::Credentials;
use super::download::{guess_content_type, ArtifactSource, DownloadWaiter};
use super::error::{ExportError, ExportResult};
use super::job::{ExportJob, JobState};
use super::progress::{ProgressEvent, ProgressSink};
use super::steps::{SequencerOptions, StepDefinition, StepSequencer};
use super::telemetry::{ExportTelemetry, FailureRecord, RunRecord};
use super::transfer::{ArtifactFetcher, DownloadArtifact, SessionArtifactFetcher};
use super::wizard;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub browser: BrowserKind,
    pub headless: Option<bool>,
    /// Embed the base64 artifact payload in the terminal `done` event.
    /// Off by default to keep the progress channel lightweight.
    pub embed_payload: bool,
}

/// How the finished artifact is expected to surface.
#[derive(Debug, Clone)]
pub enum DownloadPlan {
    UiLink { locators: Vec<String> },
    CaptureDir { dir: PathBuf, settle: SettlePolicy },
}

/// Composes authentication, the step sequence, the artifact wait, and the
/// cookie-transferred fetch into the public export operation. One
/// orchestrator run owns one job and one driven session.
pub struct ExportOrchestrator {
    config: Arc<ExportConfig>,
    telemetry: Arc<ExportTelemetry>,
}

impl ExportOrchestrator {
    pub fn new(config: Arc<ExportConfig>, telemetry: Arc<ExportTelemetry>) -> Self {
        Self { config, telemetry }
    }

    pub async fn run(
        &self,
        credentials: &Credentials,
        options: &ExportOptions,
        sink: &ProgressSink,
    ) -> ExportResult<DownloadArtifact> {
        let started = Instant::now();
        let mut job = ExportJob::new();
        info!(job_id = %job.id, site = %credentials.base_url(), "starting export job");

        let result = self.execute(credentials, options, sink, &mut job).await;

        let duration_ms = started.elapsed().as_millis() as i64;
        let site = credentials.base_url().to_string();
        match &result {
            Ok(_) => {
                let record = RunRecord {
                    timestamp: Utc::now(),
                    job_id: job.id.to_string(),
                    site,
                    success: true,
                    duration_ms,
                    error: None,
                };
                if let Err(err) = self.telemetry.record_run(&record) {
                    warn!(error = %err, "failed to record run telemetry");
                }
            }
            Err(err) => {
                let failure = FailureRecord {
                    timestamp: Utc::now(),
                    job_id: job.id.to_string(),
                    site: site.clone(),
                    phase: phase_of(err).to_string(),
                    class: err.class().as_str().to_string(),
                    message: err.to_string(),
                };
                if let Err(telemetry_err) = self.telemetry.record_failure(&failure) {
                    warn!(error = %telemetry_err, "failed to record failure telemetry");
                }
                let record = RunRecord {
                    timestamp: Utc::now(),
                    job_id: job.id.to_string(),
                    site,
                    success: false,
                    duration_ms,
                    error: Some(err.to_string()),
                };
                if let Err(telemetry_err) = self.telemetry.record_run(&record) {
                    warn!(error = %telemetry_err, "failed to record run telemetry");
                }
            }
        }
        result
    }

    async fn execute(
        &self,
        credentials: &Credentials,
        options: &ExportOptions,
        sink: &ProgressSink,
        job: &mut ExportJob,
    ) -> ExportResult<DownloadArtifact> {
        debug!(browser = %options.browser, "preparing driven session");

        // Job-scoped capture directory: never shared between jobs, so one
        // job cannot pick up another's artifact.
        let capture_dir = match tempfile::Builder::new().prefix("woox-capture-").tempdir() {
            Ok(dir) => dir,
            Err(err) => return Err(report(sink, job, err.into())),
        };

        let launcher = SessionLauncher::new(self.config.chromium.clone());
        let overrides = LaunchOverrides {
            headless: options.headless,
        };
        let session = match launcher.launch(overrides, capture_dir.path()).await {
            Ok(session) => session,
            Err(err) => return Err(report(sink, job, err.into())),
        };

        let outcome = self
            .run_session(&session, credentials, options, sink, job, capture_dir.path())
            .await;

        if let Err(err) = session.shutdown().await {
            warn!(error = %err, "browser shutdown failed after export");
        }
        outcome
    }

    async fn run_session(
        &self,
        session: &DrivenSession,
        credentials: &Credentials,
        options: &ExportOptions,
        sink: &ProgressSink,
        job: &mut ExportJob,
        capture_path: &Path,
    ) -> ExportResult<DownloadArtifact> {
        let page = match session.new_page().await {
            Ok(page) => page,
            Err(err) => return Err(report(sink, job, err.into())),
        };
        let wizard_url = match credentials.admin_url(&self.config.wizard.admin_page) {
            Ok(url) => url,
            Err(err) => return Err(report(sink, job, err)),
        };

        let retry = RetryPolicy::new(&self.config.retry);
        let steps = wizard::subscription_export_steps(
            &self.config.selectors,
            &self.config.wizard,
            &self.config.timeouts,
            &retry,
            &wizard_url,
        );
        let plan = match self.config.download.strategy {
            DownloadStrategyKind::UiLink => DownloadPlan::UiLink {
                locators: self.config.selectors.download_links.clone(),
            },
            DownloadStrategyKind::CaptureDir => DownloadPlan::CaptureDir {
                dir: capture_path.to_path_buf(),
                settle: self.config.download.settle,
            },
        };
        let fetcher = SessionArtifactFetcher::new(&page, credentials.base_url().clone());

        drive_export(
            &page,
            &self.config,
            credentials,
            &steps,
            &plan,
            &fetcher,
            sink,
            job,
            options.embed_payload,
        )
        .await
    }
}

/// The flow core, generic over the page and fetcher seams. Emits every
/// wire event for the run: one `progress` per completed step, then either
/// one `done` or exactly one `error`, never both.
#[allow(clippy::too_many_arguments)]
pub async fn drive_export(
    page: &dyn DrivenPage,
    config: &ExportConfig,
    credentials: &Credentials,
    steps: &[StepDefinition],
    plan: &DownloadPlan,
    fetcher: &dyn ArtifactFetcher,
    sink: &ProgressSink,
    job: &mut ExportJob,
    embed_payload: bool,
) -> ExportResult<DownloadArtifact> {
    match run_flow(page, config, credentials, steps, plan, fetcher, job, sink).await {
        Ok(artifact) => {
            let data = embed_payload.then(|| BASE64.encode(&artifact.bytes));
            let event = ProgressEvent::done(
                "export completed",
                artifact.filename.clone(),
                artifact.content_type.clone(),
                data,
            );
            job.record_event(&event);
            sink.emit(event);
            job.advance(JobState::Done);
            info!(job_id = %job.id, bytes = artifact.bytes.len(), "export finished");
            Ok(artifact)
        }
        Err(err) => {
            let event = ProgressEvent::error(err.to_string());
            job.record_event(&event);
            sink.emit(event);
            job.fail(err.to_string());
            warn!(job_id = %job.id, error = %err, "export failed");
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_flow(
    page: &dyn DrivenPage,
    config: &ExportConfig,
    credentials: &Credentials,
    steps: &[StepDefinition],
    plan: &DownloadPlan,
    fetcher: &dyn ArtifactFetcher,
    job: &mut ExportJob,
    sink: &ProgressSink,
) -> ExportResult<DownloadArtifact> {
    job.advance(JobState::Authenticating);
    let authenticator = SessionAuthenticator::new(&config.selectors, &config.timeouts);
    authenticator.login(page, credentials).await?;

    let sequencer = StepSequencer::new(SequencerOptions {
        default_step_timeout: config.timeouts.step(),
        poll_interval: config.timeouts.poll_interval(),
        ..SequencerOptions::default()
    });
    sequencer.run(page, steps, sink, job).await?;

    job.advance(JobState::AwaitingArtifact);
    let waiter = DownloadWaiter::new(config.timeouts.poll_interval(), config.timeouts.artifact_wait());
    let source = match plan {
        DownloadPlan::UiLink { locators } => {
            ArtifactSource::Href(waiter.wait_for_link(page, locators).await?)
        }
        DownloadPlan::CaptureDir { dir, settle } => {
            ArtifactSource::File(waiter.wait_for_file(dir, *settle).await?)
        }
    };

    job.advance(JobState::Downloading);
    match source {
        ArtifactSource::Href(href) => fetcher.fetch(&href).await,
        ArtifactSource::File(path) => read_capture_file(&path).await,
    }
}

async fn read_capture_file(path: &Path) -> ExportResult<DownloadArtifact> {
    let bytes = tokio::fs::read(path).await?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string());
    let content_type = filename.as_deref().and_then(guess_content_type);
    Ok(DownloadArtifact {
        bytes,
        filename,
        content_type,
    })
}

fn report(sink: &ProgressSink, job: &mut ExportJob, err: ExportError) -> ExportError {
    let event = ProgressEvent::error(err.to_string());
    job.record_event(&event);
    sink.emit(event);
    job.fail(err.to_string());
    err
}

fn phase_of(err: &ExportError) -> &str {
    match err {
        ExportError::AuthenticationFailed(_) => "login",
        ExportError::StepFailed { step, .. } => step,
        ExportError::ArtifactTimeout(_) => "awaiting-artifact",
        ExportError::DownloadFailed(_) | ExportError::Http(_) => "download",
        ExportError::Configuration(_) => "configuration",
        ExportError::Browser(_) => "browser",
        ExportError::Io(_) => "io",
    }
}
