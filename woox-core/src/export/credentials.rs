use std::fmt;

use url::Url;

use super::error::{ExportError, ExportResult};

/// Validated account details for one export job. Construction normalizes
/// the base URL and rejects missing fields before any browser work starts.
#[derive(Clone)]
pub struct Credentials {
    base_url: Url,
    username: String,
    secret: String,
}

impl Credentials {
    pub fn new(base_url: &str, username: &str, secret: &str) -> ExportResult<Self> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ExportError::Configuration(
                "the WordPress username is required".to_string(),
            ));
        }
        if secret.is_empty() {
            return Err(ExportError::Configuration(
                "the WordPress password or application password is required".to_string(),
            ));
        }
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            username: username.to_string(),
            secret: secret.to_string(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn login_url(&self) -> ExportResult<Url> {
        self.admin_url("wp-login.php")
    }

    pub fn admin_url(&self, page: &str) -> ExportResult<Url> {
        self.base_url.join(page).map_err(|err| {
            ExportError::Configuration(format!("cannot resolve '{page}' against the site URL: {err}"))
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Normalizes any absolute or scheme-less site URL to
/// `scheme://host[/subpath]/`: the scheme defaults to https, `wp-admin`
/// and `wp-login.php` suffixes are stripped, query and fragment are
/// discarded, and the trailing slash is enforced. Idempotent.
pub fn normalize_base_url(raw: &str) -> ExportResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExportError::Configuration(
            "the WordPress site URL is required".to_string(),
        ));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut url = Url::parse(&candidate).map_err(|err| {
        ExportError::Configuration(format!(
            "invalid site URL '{trimmed}' (expected something like https://example.com): {err}"
        ))
    })?;
    if url.host_str().is_none() {
        return Err(ExportError::Configuration(format!(
            "invalid site URL '{trimmed}' (expected something like https://example.com)"
        )));
    }

    url.set_query(None);
    url.set_fragment(None);

    let kept: Vec<String> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .take_while(|segment| *segment != "wp-admin" && *segment != "wp-login.php")
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut path = String::from("/");
    for segment in &kept {
        path.push_str(segment);
        path.push('/');
    }
    url.set_path(&path);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(raw: &str) -> String {
        normalize_base_url(raw).unwrap().to_string()
    }

    #[test]
    fn basic_domain_gets_trailing_slash() {
        assert_eq!(normalized("https://example.com"), "https://example.com/");
        assert_eq!(normalized("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn strips_wp_admin_suffix() {
        assert_eq!(normalized("https://example.com/wp-admin"), "https://example.com/");
        assert_eq!(normalized("https://example.com/wp-admin/"), "https://example.com/");
    }

    #[test]
    fn strips_login_script_suffix() {
        assert_eq!(
            normalized("https://example.com/wp-login.php"),
            "https://example.com/"
        );
    }

    #[test]
    fn preserves_subdirectory() {
        assert_eq!(normalized("https://example.com/blog"), "https://example.com/blog/");
        assert_eq!(
            normalized("https://example.com/blog/wp-admin"),
            "https://example.com/blog/"
        );
    }

    #[test]
    fn strips_query_and_fragment() {
        assert_eq!(
            normalized("https://example.com/wp-admin/?foo=bar#baz"),
            "https://example.com/"
        );
    }

    #[test]
    fn infers_https_scheme() {
        assert_eq!(normalized("example.com"), "https://example.com/");
        assert_eq!(normalized("example.com/wp-admin"), "https://example.com/");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "example.com",
            "https://example.com/blog/wp-admin",
            "http://example.com/wp-login.php?redirect=1#top",
            "https://example.com/shop/",
        ] {
            let once = normalized(raw);
            assert_eq!(normalized(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn rejects_blank_inputs() {
        assert!(matches!(
            normalize_base_url("   "),
            Err(ExportError::Configuration(_))
        ));
        assert!(matches!(
            Credentials::new("example.com", "", "secret"),
            Err(ExportError::Configuration(_))
        ));
        assert!(matches!(
            Credentials::new("example.com", "admin", ""),
            Err(ExportError::Configuration(_))
        ));
    }

    #[test]
    fn login_url_is_rooted_at_normalized_base() {
        let credentials = Credentials::new("example.com/blog/wp-admin", "admin", "pw").unwrap();
        assert_eq!(
            credentials.login_url().unwrap().as_str(),
            "https://example.com/blog/wp-login.php"
        );
    }

    #[test]
    fn debug_redacts_the_secret() {
        let credentials = Credentials::new("example.com", "admin", "hunter2").unwrap();
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
