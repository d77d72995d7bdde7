use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::redirect::Policy;
use tracing::{debug, info};
use url::Url;

use crate::browser::{DrivenPage, SessionCookie};

use super::download::guess_content_type;
use super::error::{ExportError, ExportResult};

/// The exported file, produced exactly once per successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Retrieves the artifact behind a capture href. The production impl rides
/// on the driven session's cookies; tests substitute their own.
#[async_trait(?Send)]
pub trait ArtifactFetcher {
    async fn fetch(&self, href: &str) -> ExportResult<DownloadArtifact>;
}

/// Copies the driven session's authentication cookies into a standalone
/// HTTP client, so the artifact is fetched with one plain request instead
/// of a second full page load.
pub fn client_for_cookies(
    cookies: &[SessionCookie],
    base: &Url,
) -> ExportResult<reqwest::Client> {
    let jar = Jar::default();
    for cookie in cookies {
        let origin = cookie_origin(cookie, base);
        jar.add_cookie_str(&cookie_header(cookie), &origin);
    }
    let client = reqwest::Client::builder()
        .cookie_provider(Arc::new(jar))
        .redirect(Policy::limited(10))
        .build()?;
    Ok(client)
}

fn cookie_origin(cookie: &SessionCookie, base: &Url) -> Url {
    let host = cookie.domain.trim_start_matches('.');
    if host.is_empty() {
        return base.clone();
    }
    Url::parse(&format!("https://{host}/")).unwrap_or_else(|_| base.clone())
}

fn cookie_header(cookie: &SessionCookie) -> String {
    let mut header = format!("{}={}", cookie.name, cookie.value);
    if !cookie.domain.is_empty() {
        header.push_str("; Domain=");
        header.push_str(cookie.domain.trim_start_matches('.'));
    }
    if !cookie.path.is_empty() {
        header.push_str("; Path=");
        header.push_str(&cookie.path);
    }
    header
}

/// Fetches the artifact, following redirects; a non-2xx terminal response
/// surfaces as `DownloadFailed(status)`.
pub async fn fetch_artifact(
    client: &reqwest::Client,
    href: &str,
    base: &Url,
) -> ExportResult<DownloadArtifact> {
    let url = base.join(href).map_err(|err| {
        ExportError::Configuration(format!("invalid artifact href '{href}': {err}"))
    })?;
    info!(url = %url, "fetching artifact over transferred session");

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExportError::DownloadFailed(status.as_u16()));
    }

    let filename = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(filename_from_disposition)
        .or_else(|| filename_from_url(response.url()));
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
        .or_else(|| filename.as_deref().and_then(guess_content_type));

    let bytes = response.bytes().await?.to_vec();
    debug!(bytes = bytes.len(), filename = ?filename, "artifact retrieved");
    Ok(DownloadArtifact {
        bytes,
        filename,
        content_type,
    })
}

fn filename_from_disposition(value: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let part = part.trim();
        let rest = part
            .strip_prefix("filename=")
            .or_else(|| part.strip_prefix("filename*=UTF-8''"))?;
        let cleaned = rest.trim_matches('"').trim();
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned.to_string())
        }
    })
}

fn filename_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()
        .filter(|segment| segment.contains('.'))
        .map(str::to_string)
}

/// Production fetcher: pulls the cookies out of the driven page at fetch
/// time, after authentication has actually happened.
pub struct SessionArtifactFetcher<'a> {
    page: &'a dyn DrivenPage,
    base: Url,
}

impl<'a> SessionArtifactFetcher<'a> {
    pub fn new(page: &'a dyn DrivenPage, base: Url) -> Self {
        Self { page, base }
    }
}

#[async_trait(?Send)]
impl ArtifactFetcher for SessionArtifactFetcher<'_> {
    async fn fetch(&self, href: &str) -> ExportResult<DownloadArtifact> {
        let cookies = self.page.cookies().await?;
        debug!(count = cookies.len(), "exporting session cookies");
        let client = client_for_cookies(&cookies, &self.base)?;
        fetch_artifact(&client, href, &self.base).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_carries_domain_and_path() {
        let cookie = SessionCookie {
            name: "wordpress_logged_in_abc".to_string(),
            value: "token".to_string(),
            domain: ".example.com".to_string(),
            path: "/".to_string(),
        };
        assert_eq!(
            cookie_header(&cookie),
            "wordpress_logged_in_abc=token; Domain=example.com; Path=/"
        );
    }

    #[test]
    fn filename_parsed_from_content_disposition() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"subscriptions.csv\"").as_deref(),
            Some("subscriptions.csv")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=export.csv").as_deref(),
            Some("export.csv")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn filename_fallback_uses_last_url_segment() {
        let url = Url::parse("https://example.com/exports/subscriptions.csv?sig=1").unwrap();
        assert_eq!(
            filename_from_url(&url).as_deref(),
            Some("subscriptions.csv")
        );
        let bare = Url::parse("https://example.com/wp-admin/").unwrap();
        assert_eq!(filename_from_url(&bare), None);
    }
}
