use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::browser::DrivenPage;
use crate::config::SettlePolicy;

use super::error::{ExportError, ExportResult};

/// Suffixes browsers append while a transfer is still in flight.
const IN_PROGRESS_SUFFIXES: [&str; 3] = [".crdownload", ".part", ".tmp"];

/// Where a finished artifact was observed: a capture URL exposed in the
/// page, or a settled file in the job's capture directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    Href(String),
    File(PathBuf),
}

/// Polls for the side effect of a completed export job, bounded by the
/// artifact wait window. Both strategies poll at a fixed interval and fail
/// with `ArtifactTimeout` when nothing settles in time.
#[derive(Debug, Clone)]
pub struct DownloadWaiter {
    poll_interval: Duration,
    max_wait: Duration,
}

impl DownloadWaiter {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            max_wait,
        }
    }

    /// UI-link strategy: succeeds on the first sighting of a visible link
    /// carrying a capture href, trying each locator strategy in order.
    pub async fn wait_for_link(
        &self,
        page: &dyn DrivenPage,
        locators: &[String],
    ) -> ExportResult<String> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            for selector in locators {
                let state = page.element_state(selector).await?;
                if state.present && state.visible {
                    if let Some(href) = page.attribute(selector, "href").await? {
                        if !href.trim().is_empty() {
                            info!(selector, "download link appeared");
                            return Ok(href);
                        }
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(ExportError::ArtifactTimeout(self.max_wait));
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Filesystem strategy: waits for a settled file in the job-scoped
    /// capture directory and returns the most recently modified one.
    pub async fn wait_for_file(
        &self,
        dir: &Path,
        settle: SettlePolicy,
    ) -> ExportResult<PathBuf> {
        let deadline = Instant::now() + self.max_wait;
        let mut previous_sizes: HashMap<PathBuf, u64> = HashMap::new();
        loop {
            let candidates = scan_candidates(dir)?;
            let settled: Vec<&FileCandidate> = candidates
                .iter()
                .filter(|candidate| match settle {
                    SettlePolicy::FinalName => !candidate.in_progress,
                    // Size unchanged across two consecutive polls is the
                    // readiness signal; the name is not consulted.
                    SettlePolicy::SizeStable => {
                        previous_sizes.get(&candidate.path) == Some(&candidate.size)
                    }
                })
                .collect();

            if let Some(winner) = settled.iter().max_by_key(|candidate| candidate.modified) {
                info!(path = %winner.path.display(), "capture file settled");
                return Ok(winner.path.clone());
            }

            previous_sizes = candidates
                .iter()
                .map(|candidate| (candidate.path.clone(), candidate.size))
                .collect();

            if Instant::now() >= deadline {
                debug!(dir = %dir.display(), "capture directory never settled");
                return Err(ExportError::ArtifactTimeout(self.max_wait));
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[derive(Debug)]
struct FileCandidate {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
    in_progress: bool,
}

fn scan_candidates(dir: &Path) -> ExportResult<Vec<FileCandidate>> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let in_progress = IN_PROGRESS_SUFFIXES
            .iter()
            .any(|suffix| name.ends_with(suffix));
        candidates.push(FileCandidate {
            path: entry.path(),
            size: metadata.len(),
            modified: metadata.modified()?,
            in_progress,
        });
    }
    Ok(candidates)
}

/// Extension-based fallback for artifacts read straight from disk, where
/// no transport supplies a content type.
pub fn guess_content_type(filename: &str) -> Option<String> {
    let extension = filename.rsplit('.').next()?.to_lowercase();
    let guessed = match extension.as_str() {
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "txt" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => return None,
    };
    Some(guessed.to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, SystemTime};

    use tempfile::tempdir;

    use super::*;

    fn waiter(max_wait_ms: u64) -> DownloadWaiter {
        DownloadWaiter::new(
            Duration::from_millis(20),
            Duration::from_millis(max_wait_ms),
        )
    }

    #[tokio::test]
    async fn ignores_in_progress_file_until_renamed() {
        let dir = tempdir().unwrap();
        let partial = dir.path().join("subscriptions.csv.crdownload");
        fs::write(&partial, b"partial").unwrap();

        let dir_path = dir.path().to_path_buf();
        let rename_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            fs::rename(
                dir_path.join("subscriptions.csv.crdownload"),
                dir_path.join("subscriptions.csv"),
            )
            .unwrap();
        });

        let found = waiter(2_000)
            .wait_for_file(dir.path(), SettlePolicy::FinalName)
            .await
            .unwrap();
        rename_task.await.unwrap();
        assert_eq!(found.file_name().unwrap(), "subscriptions.csv");
    }

    #[tokio::test]
    async fn picks_most_recently_modified_final_file() {
        let dir = tempdir().unwrap();
        let older = dir.path().join("export-old.csv");
        let newer = dir.path().join("export-new.csv");
        fs::write(&older, b"old").unwrap();
        fs::write(&newer, b"new").unwrap();

        let now = SystemTime::now();
        fs::File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(now - Duration::from_secs(120))
            .unwrap();
        fs::File::options()
            .write(true)
            .open(&newer)
            .unwrap()
            .set_modified(now)
            .unwrap();

        let found = waiter(500)
            .wait_for_file(dir.path(), SettlePolicy::FinalName)
            .await
            .unwrap();
        assert_eq!(found, newer);
    }

    #[tokio::test]
    async fn size_stable_policy_needs_two_matching_polls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.csv");
        fs::write(&path, b"complete contents").unwrap();

        let started = std::time::Instant::now();
        let found = waiter(2_000)
            .wait_for_file(dir.path(), SettlePolicy::SizeStable)
            .await
            .unwrap();
        assert_eq!(found, path);
        // The first poll only records sizes; settling happens on the second.
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn size_stable_policy_ignores_a_still_growing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.csv");
        fs::write(&path, b"chunk-one").unwrap();

        let grow_path = path.clone();
        let grow_task = tokio::spawn(async move {
            // Keep the size moving for a few polls, then stop.
            for round in 0..3u32 {
                tokio::time::sleep(Duration::from_millis(25)).await;
                let mut contents = fs::read(&grow_path).unwrap();
                contents.extend_from_slice(format!("-chunk-{round}").as_bytes());
                fs::write(&grow_path, contents).unwrap();
            }
        });

        let found = waiter(3_000)
            .wait_for_file(dir.path(), SettlePolicy::SizeStable)
            .await
            .unwrap();
        grow_task.await.unwrap();
        assert_eq!(found, path);
        // Whatever size settled, it settled: two consecutive polls agreed.
        let final_len = fs::metadata(&path).unwrap().len();
        assert!(final_len >= b"chunk-one".len() as u64);
    }

    #[tokio::test]
    async fn times_out_when_nothing_settles() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("export.csv.part"), b"never done").unwrap();

        let result = waiter(100)
            .wait_for_file(dir.path(), SettlePolicy::FinalName)
            .await;
        assert!(matches!(result, Err(ExportError::ArtifactTimeout(_))));
    }

    #[test]
    fn guesses_common_artifact_types() {
        assert_eq!(guess_content_type("export.csv").as_deref(), Some("text/csv"));
        assert_eq!(guess_content_type("export.zip").as_deref(), Some("application/zip"));
        assert_eq!(guess_content_type("export.bin"), None);
    }
}
