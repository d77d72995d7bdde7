use std::time::Duration;

use futures::future::LocalBoxFuture;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::browser::DrivenPage;

use super::error::{ExportError, ExportResult};
use super::job::{ExportJob, JobState};
use super::progress::{ProgressEvent, ProgressSink};

pub type StepAction = Box<dyn for<'a> Fn(&'a dyn DrivenPage) -> LocalBoxFuture<'a, ExportResult<()>>>;
pub type StepCheck = Box<dyn for<'a> Fn(&'a dyn DrivenPage) -> LocalBoxFuture<'a, ExportResult<bool>>>;

/// One named unit of UI interaction plus a verifiable post-condition.
/// Steps are data: a concrete workflow is an ordered list of these,
/// supplied by the caller, so the sequencer stays generic.
pub struct StepDefinition {
    pub name: String,
    pub action: StepAction,
    pub post_condition: StepCheck,
    pub timeout: Option<Duration>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, action: StepAction, post_condition: StepCheck) -> Self {
        Self {
            name: name.into(),
            action,
            post_condition,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SequencerOptions {
    /// Percent band allocated to the step sequence; `done` claims 100.
    pub pct_floor: u8,
    pub pct_span: u8,
    pub default_step_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            pct_floor: 0,
            pct_span: 90,
            default_step_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// The core state machine: executes each step's action, then holds the
/// step open until its post-condition verifies. A post-condition that
/// never holds fails the run with the step's name attached; there is no
/// skipping ahead and no rollback.
pub struct StepSequencer {
    options: SequencerOptions,
}

impl StepSequencer {
    pub fn new(options: SequencerOptions) -> Self {
        Self { options }
    }

    pub async fn run(
        &self,
        page: &dyn DrivenPage,
        steps: &[StepDefinition],
        sink: &ProgressSink,
        job: &mut ExportJob,
    ) -> ExportResult<()> {
        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            let ordinal = index + 1;
            job.advance(JobState::RunningStep(ordinal));
            debug!(step = %step.name, ordinal, total, "executing step");

            (step.action)(page).await.map_err(|err| wrap(&step.name, err))?;
            self.verify_post_condition(page, step).await?;

            let pct = self.percent(ordinal, total);
            info!(step = %step.name, pct, "step completed");
            let event = ProgressEvent::progress(
                step.name.as_str(),
                pct,
                format!("completed step {ordinal}/{total}: {}", step.name),
            );
            job.record_event(&event);
            sink.emit(event);
        }
        Ok(())
    }

    async fn verify_post_condition(
        &self,
        page: &dyn DrivenPage,
        step: &StepDefinition,
    ) -> ExportResult<()> {
        let timeout = step.timeout.unwrap_or(self.options.default_step_timeout);
        let deadline = Instant::now() + timeout;
        loop {
            if (step.post_condition)(page)
                .await
                .map_err(|err| wrap(&step.name, err))?
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExportError::step(
                    &step.name,
                    format!("post-condition did not hold within {}s", timeout.as_secs()),
                ));
            }
            sleep(self.options.poll_interval).await;
        }
    }

    fn percent(&self, ordinal: usize, total: usize) -> u8 {
        if total == 0 {
            return self.options.pct_floor;
        }
        let span = self.options.pct_span as usize;
        let pct = self.options.pct_floor as usize + ordinal * span / total;
        pct.min(100) as u8
    }
}

fn wrap(step: &str, err: ExportError) -> ExportError {
    match err {
        already @ ExportError::StepFailed { .. } => already,
        other => ExportError::step(step, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_strictly_increasing_over_ordinals() {
        let sequencer = StepSequencer::new(SequencerOptions::default());
        for total in 1..=20usize {
            let mut last = 0u8;
            for ordinal in 1..=total {
                let pct = sequencer.percent(ordinal, total);
                assert!(pct > last, "pct not increasing at {ordinal}/{total}");
                assert!(pct <= 100);
                last = pct;
            }
            assert_eq!(last, 90, "final step should land on the band ceiling");
        }
    }

    #[test]
    fn percent_respects_configured_band() {
        let sequencer = StepSequencer::new(SequencerOptions {
            pct_floor: 10,
            pct_span: 80,
            ..SequencerOptions::default()
        });
        assert_eq!(sequencer.percent(1, 4), 30);
        assert_eq!(sequencer.percent(4, 4), 90);
    }
}
