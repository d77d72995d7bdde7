use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportConfig {
    pub chromium: ChromiumSection,
    pub timeouts: TimeoutsSection,
    pub retry: RetrySection,
    pub download: DownloadSection,
    pub wizard: WizardSection,
    pub selectors: SelectorSection,
    pub observability: ObservabilitySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window: [u32; 2],
    pub nav_timeout_seconds: u64,
}

/// Layered timeouts: per-interaction, per-step, and the overall artifact
/// wait window are configured independently so an exceeded deadline can be
/// reported against the phase that owns it.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsSection {
    pub interaction_seconds: u64,
    pub step_seconds: u64,
    pub artifact_wait_seconds: u64,
    pub poll_interval_ms: u64,
}

impl TimeoutsSection {
    pub fn interaction(&self) -> Duration {
        Duration::from_secs(self.interaction_seconds)
    }

    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_seconds)
    }

    pub fn artifact_wait(&self) -> Duration {
        Duration::from_secs(self.artifact_wait_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStrategyKind {
    UiLink,
    CaptureDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlePolicy {
    FinalName,
    SizeStable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    pub strategy: DownloadStrategyKind,
    pub settle: SettlePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WizardSection {
    pub admin_page: String,
    pub status: String,
    pub status_labels: Vec<String>,
    pub columns: Vec<String>,
    pub meta_fields: Vec<String>,
}

/// Locator tables for the login surface and the export wizard. UI wording
/// and markup drift is absorbed here instead of in the sequencer; entries
/// holding a list are ordered locator strategies tried in sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSection {
    pub login_user: String,
    pub login_pass: String,
    pub login_remember: String,
    pub login_submit: String,
    pub login_error: String,
    pub post_type_card: String,
    pub method_step_button: String,
    pub new_export_radio: String,
    pub filter_step_button: String,
    pub status_dropdown: Vec<String>,
    pub status_option: Vec<String>,
    pub status_chip: String,
    pub token_remove: String,
    pub mapping_step_button: String,
    pub mapping_table: String,
    pub column_checkboxes: String,
    pub meta_box_header: String,
    pub advanced_step_button: String,
    pub export_buttons: Vec<String>,
    pub loader_box: String,
    pub download_links: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    pub failure_log: String,
    pub runs_db: String,
}

pub fn load_export_config<P: AsRef<Path>>(path: P) -> Result<ExportConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/woox.toml");
        let config = load_export_config(path).expect("fixture config should parse");
        assert_eq!(config.download.strategy, DownloadStrategyKind::UiLink);
        assert_eq!(config.download.settle, SettlePolicy::FinalName);
        assert!(config.retry.max_attempts >= 1);
        assert!(!config.selectors.export_buttons.is_empty());
        assert!(config.wizard.columns.contains(&"subscription_status".to_string()));
        assert!(config.timeouts.artifact_wait_seconds > config.timeouts.step_seconds);
    }
}
