use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

use super::error::{BrowserError, BrowserResult};
use super::page::{ClickOutcome, DrivenPage};

/// Blocks until the document load signal is terminal or the timeout lapses.
/// A timeout is not an error here; the caller decides what a still-loading
/// page means for its step.
pub async fn wait_document_ready(
    page: &dyn DrivenPage,
    timeout: Duration,
    poll: Duration,
) -> BrowserResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if page.document_ready().await? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        sleep(poll).await;
    }
}

/// Waits for jQuery-driven pages to drain their request queue. Pages
/// without jQuery report idle immediately.
pub async fn wait_ajax_idle(
    page: &dyn DrivenPage,
    timeout: Duration,
    poll: Duration,
) -> BrowserResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let active = page
            .eval("(window.jQuery && jQuery.active) ? jQuery.active : 0")
            .await?;
        if active.as_u64().unwrap_or(0) == 0 {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Ok(());
        }
        sleep(poll).await;
    }
}

/// Polls until the element is present, visible, enabled, and has a
/// non-zero layout area. Fails with `ElementNotReady` on timeout.
pub async fn wait_interactable(
    page: &dyn DrivenPage,
    selector: &str,
    timeout: Duration,
    poll: Duration,
) -> BrowserResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let state = page.element_state(selector).await?;
        if state.interactable() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::ElementNotReady(selector.to_string()));
        }
        sleep(poll).await;
    }
}

/// Direct interaction first, forced activation if the click is
/// intercepted by an overlay. Only element absence is an error.
pub async fn click_robust(page: &dyn DrivenPage, selector: &str) -> BrowserResult<()> {
    page.scroll_into_view(selector).await?;
    match page.click(selector).await? {
        ClickOutcome::Clicked => Ok(()),
        ClickOutcome::Intercepted => {
            trace!(selector, "direct click intercepted, forcing activation");
            if page.force_click(selector).await? {
                Ok(())
            } else {
                Err(BrowserError::ElementMissing(selector.to_string()))
            }
        }
        ClickOutcome::Missing => {
            // CDP element lookup can lag DOM mutation; the JS path doubles
            // as a second locator attempt before giving up.
            if page.force_click(selector).await? {
                Ok(())
            } else {
                Err(BrowserError::ElementMissing(selector.to_string()))
            }
        }
    }
}

/// Ordered locator strategies for one logical target, evaluated in
/// sequence until one resolves to an interactable element.
pub async fn first_interactable(
    page: &dyn DrivenPage,
    candidates: &[String],
    timeout: Duration,
    poll: Duration,
) -> BrowserResult<String> {
    let deadline = Instant::now() + timeout;
    loop {
        for selector in candidates {
            let state = page.element_state(selector).await?;
            if state.interactable() {
                return Ok(selector.clone());
            }
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::ElementNotReady(format!(
                "none of {} locator strategies resolved",
                candidates.len()
            )));
        }
        sleep(poll).await;
    }
}
