use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::browser::{interact, ClickOutcome, DrivenPage};
use crate::config::{SelectorSection, TimeoutsSection};

use super::credentials::Credentials;
use super::error::{ExportError, ExportResult};

const GENERIC_REJECTION: &str = "WordPress rejected the sign-in or requires additional \
verification. Check the username, password, and any extra validation steps.";

/// Drives the wp-login form and classifies the outcome: success when the
/// admin area is reached, `AuthenticationFailed` with the site's own error
/// text (or a generic reason) when the login surface bounces us back.
pub struct SessionAuthenticator<'a> {
    selectors: &'a SelectorSection,
    timeouts: &'a TimeoutsSection,
}

impl<'a> SessionAuthenticator<'a> {
    pub fn new(selectors: &'a SelectorSection, timeouts: &'a TimeoutsSection) -> Self {
        Self {
            selectors,
            timeouts,
        }
    }

    pub async fn login(
        &self,
        page: &dyn DrivenPage,
        credentials: &Credentials,
    ) -> ExportResult<()> {
        let login_url = credentials.login_url()?;
        info!(url = %login_url, user = %credentials.username(), "authenticating");
        page.navigate(login_url.as_str()).await?;

        let interaction = self.timeouts.interaction();
        let poll = self.timeouts.poll_interval();
        interact::wait_document_ready(page, interaction, poll).await?;
        interact::wait_interactable(page, &self.selectors.login_user, interaction, poll).await?;

        page.fill(&self.selectors.login_user, credentials.username())
            .await?;
        page.fill(&self.selectors.login_pass, credentials.secret())
            .await?;

        // Remember-me keeps the cookies alive for the artifact fetch; the
        // checkbox is optional on customized login screens.
        match page.element_state(&self.selectors.login_remember).await {
            Ok(state) if state.present && state.visible => {
                if let Err(err) = page.set_checked(&self.selectors.login_remember, true).await {
                    debug!(error = %err, "remember-me checkbox not clickable, continuing");
                }
            }
            Ok(_) => {}
            Err(err) => debug!(error = %err, "remember-me lookup failed, continuing"),
        }

        self.submit(page).await?;
        self.await_admin_marker(page).await
    }

    async fn submit(&self, page: &dyn DrivenPage) -> ExportResult<()> {
        match page.click(&self.selectors.login_submit).await? {
            ClickOutcome::Clicked => Ok(()),
            ClickOutcome::Intercepted => {
                if page.force_click(&self.selectors.login_submit).await? {
                    Ok(())
                } else {
                    page.press_key(&self.selectors.login_pass, "Enter").await?;
                    Ok(())
                }
            }
            ClickOutcome::Missing => {
                // Some themes replace the submit button; Enter on the
                // password field submits the form either way.
                page.press_key(&self.selectors.login_pass, "Enter").await?;
                Ok(())
            }
        }
    }

    async fn await_admin_marker(&self, page: &dyn DrivenPage) -> ExportResult<()> {
        let deadline = Instant::now() + self.timeouts.step();
        let poll = self.timeouts.poll_interval();
        loop {
            let url = page.current_url().await?;
            if url.contains("/wp-admin") {
                info!("admin area reached");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(self.classify_rejection(page, &url).await?);
            }
            sleep(poll).await;
        }
    }

    async fn classify_rejection(
        &self,
        page: &dyn DrivenPage,
        url: &str,
    ) -> ExportResult<ExportError> {
        if url.contains("wp-login.php") {
            let reason = match page.inner_text(&self.selectors.login_error).await? {
                Some(text) if !text.trim().is_empty() => text.trim().to_string(),
                _ => GENERIC_REJECTION.to_string(),
            };
            return Ok(ExportError::AuthenticationFailed(reason));
        }
        Ok(ExportError::step(
            "login",
            format!("admin landmark did not appear (stuck on {url})"),
        ))
    }
}
