use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use super::error::{BrowserError, BrowserResult};

/// Snapshot of a single element's readiness, as observed in the page.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ElementState {
    pub present: bool,
    pub visible: bool,
    pub enabled: bool,
    pub checked: bool,
    pub area: f64,
}

impl ElementState {
    pub fn interactable(&self) -> bool {
        self.present && self.visible && self.enabled && self.area > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Clicked,
    Intercepted,
    Missing,
}

/// Authentication cookie lifted out of the driven session so the artifact
/// can be fetched over plain HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Seam between the automation logic and the page actually being driven.
///
/// Everything above this trait (authenticator, sequencer, download waiter)
/// is written against it, so tests drive the same code paths with mock
/// pages instead of a live Chromium session.
#[async_trait(?Send)]
pub trait DrivenPage {
    async fn navigate(&self, url: &str) -> BrowserResult<()>;
    async fn current_url(&self) -> BrowserResult<String>;
    async fn document_ready(&self) -> BrowserResult<bool>;
    async fn element_state(&self, selector: &str) -> BrowserResult<ElementState>;
    async fn click(&self, selector: &str) -> BrowserResult<ClickOutcome>;
    async fn force_click(&self, selector: &str) -> BrowserResult<bool>;
    async fn scroll_into_view(&self, selector: &str) -> BrowserResult<()>;
    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()>;
    async fn set_checked(&self, selector: &str, checked: bool) -> BrowserResult<bool>;
    async fn press_key(&self, selector: &str, key: &str) -> BrowserResult<()>;
    async fn inner_text(&self, selector: &str) -> BrowserResult<Option<String>>;
    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>>;
    async fn eval(&self, script: &str) -> BrowserResult<Value>;
    async fn cookies(&self) -> BrowserResult<Vec<SessionCookie>>;
}

/// Production [`DrivenPage`] backed by a chromiumoxide page.
#[derive(Debug)]
pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    fn quote(selector: &str) -> String {
        // serde_json string escaping doubles as JS string escaping here.
        serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string())
    }

    async fn eval_into<T>(&self, script: &str) -> BrowserResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| BrowserError::Unexpected(format!("failed to decode page state: {err}")))
    }
}

#[async_trait(?Send)]
impl DrivenPage for CdpPage {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn document_ready(&self) -> BrowserResult<bool> {
        self.eval_into("document.readyState === 'complete'").await
    }

    async fn element_state(&self, selector: &str) -> BrowserResult<ElementState> {
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) {{
        return {{ present: false, visible: false, enabled: false, checked: false, area: 0 }};
    }}
    const st = window.getComputedStyle(el);
    const r = el.getBoundingClientRect();
    const hidden = st.visibility === 'hidden' || st.display === 'none' || st.pointerEvents === 'none';
    const disabledAttr = el.getAttribute('disabled');
    return {{
        present: true,
        visible: !hidden,
        enabled: !el.disabled && disabledAttr !== 'true' && disabledAttr !== 'disabled',
        checked: el.checked === true,
        area: r.width * r.height,
    }};
}})()"#,
            sel = Self::quote(selector)
        );
        self.eval_into(&script).await
    }

    async fn click(&self, selector: &str) -> BrowserResult<ClickOutcome> {
        let element = match self.page.find_element(selector).await {
            Ok(element) => element,
            Err(err) => {
                trace!(selector, error = %err, "element lookup failed before click");
                return Ok(ClickOutcome::Missing);
            }
        };
        match element.click().await {
            Ok(_) => Ok(ClickOutcome::Clicked),
            Err(err) => {
                trace!(selector, error = %err, "direct click rejected");
                Ok(ClickOutcome::Intercepted)
            }
        }
    }

    async fn force_click(&self, selector: &str) -> BrowserResult<bool> {
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return false;
    el.click();
    return true;
}})()"#,
            sel = Self::quote(selector)
        );
        self.eval_into(&script).await
    }

    async fn scroll_into_view(&self, selector: &str) -> BrowserResult<()> {
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    if (el) el.scrollIntoView({{ block: 'center' }});
    return true;
}})()"#,
            sel = Self::quote(selector)
        );
        self.eval_into::<bool>(&script).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()> {
        let clear = format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return false;
    el.value = '';
    return true;
}})()"#,
            sel = Self::quote(selector)
        );
        if !self.eval_into::<bool>(&clear).await? {
            return Err(BrowserError::ElementMissing(selector.to_string()));
        }
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementMissing(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| BrowserError::Interaction {
                selector: selector.to_string(),
                reason: format!("focus failed: {err}"),
            })?;
        element
            .type_str(value)
            .await
            .map_err(|err| BrowserError::Interaction {
                selector: selector.to_string(),
                reason: format!("typing failed: {err}"),
            })?;
        Ok(())
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> BrowserResult<bool> {
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return false;
    if (el.checked !== {want}) el.click();
    return true;
}})()"#,
            sel = Self::quote(selector),
            want = checked
        );
        self.eval_into(&script).await
    }

    async fn press_key(&self, selector: &str, key: &str) -> BrowserResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementMissing(selector.to_string()))?;
        element
            .press_key(key)
            .await
            .map_err(|err| BrowserError::Interaction {
                selector: selector.to_string(),
                reason: format!("key press failed: {err}"),
            })?;
        Ok(())
    }

    async fn inner_text(&self, selector: &str) -> BrowserResult<Option<String>> {
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    return el ? (el.innerText || el.textContent || '') : null;
}})()"#,
            sel = Self::quote(selector)
        );
        self.eval_into(&script).await
    }

    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>> {
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    return el ? el.getAttribute({attr}) : null;
}})()"#,
            sel = Self::quote(selector),
            attr = Self::quote(name)
        );
        self.eval_into(&script).await
    }

    async fn eval(&self, script: &str) -> BrowserResult<Value> {
        self.eval_into(script).await
    }

    async fn cookies(&self) -> BrowserResult<Vec<SessionCookie>> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|cookie| SessionCookie {
                name: cookie.name,
                value: cookie.value,
                domain: cookie.domain,
                path: cookie.path,
            })
            .collect())
    }
}
