use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::error::{BrowserError, BrowserResult};
use super::page::CdpPage;

/// Engine requested by the caller. Only Chromium is drivable through CDP;
/// the variant exists so an unsupported request fails before launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserKind {
    Chromium,
}

impl Default for BrowserKind {
    fn default() -> Self {
        BrowserKind::Chromium
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("chromium")
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = BrowserError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "chrome" | "chromium" => Ok(BrowserKind::Chromium),
            other => Err(BrowserError::Configuration(format!(
                "unsupported browser '{other}', only chromium is available"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

/// Launches one Chromium instance per export job. The session is passed
/// explicitly through every component; there is no shared global driver.
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    config: Arc<ChromiumSection>,
}

impl SessionLauncher {
    pub fn new(config: ChromiumSection) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn launch(
        &self,
        overrides: LaunchOverrides,
        capture_dir: &Path,
    ) -> BrowserResult<DrivenSession> {
        let headless = overrides.headless.unwrap_or(self.config.headless);
        let chromium_config = self.build_chromium_config(headless)?;
        info!(
            headless,
            capture_dir = %capture_dir.display(),
            "launching chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let session = DrivenSession {
            browser,
            handler_task: Some(handler_task),
            capture_dir: capture_dir.to_path_buf(),
        };
        session.allow_downloads().await?;
        Ok(session)
    }

    fn build_chromium_config(&self, headless: bool) -> BrowserResult<ChromiumConfig> {
        let [width, height] = self.config.window;
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width,
            height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: width >= height,
            has_touch: false,
        });

        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        builder = builder.request_timeout(Duration::from_secs(self.config.nav_timeout_seconds));

        let mut args = vec![
            format!("--window-size={width},{height}"),
            "--disable-dev-shm-usage".to_string(),
            "--password-store=basic".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

/// One authenticated browser session driving one linear export flow.
#[derive(Debug)]
pub struct DrivenSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    capture_dir: PathBuf,
}

impl DrivenSession {
    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    pub async fn new_page(&self) -> BrowserResult<CdpPage> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        Ok(CdpPage::new(page))
    }

    /// Routes finished downloads into the job-scoped capture directory,
    /// the CDP equivalent of the download preferences the exporter sets on
    /// a locally driven browser profile.
    async fn allow_downloads(&self) -> BrowserResult<()> {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(self.capture_dir.to_string_lossy().to_string())
            .build()
            .map_err(BrowserError::Configuration)?;
        self.browser.execute(params).await?;
        Ok(())
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("shutting down chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for DrivenSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("DrivenSession dropped without explicit shutdown");
            }
        }
    }
}
