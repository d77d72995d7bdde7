use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use woox_core::browser::{
    BrowserResult, ClickOutcome, DrivenPage, ElementState, SessionCookie,
};
use woox_core::config::{
    ChromiumSection, DownloadSection, DownloadStrategyKind, ExportConfig, ObservabilitySection,
    RetrySection, SelectorSection, SettlePolicy, TimeoutsSection, WizardSection,
};
use woox_core::export::{
    drive_export, ArtifactFetcher, Credentials, DownloadArtifact, DownloadPlan, ExportError,
    ExportJob, ExportResult, JobState, ProgressEvent, ProgressKind, ProgressSink, StepAction,
    StepCheck, StepDefinition,
};

fn test_config() -> ExportConfig {
    ExportConfig {
        chromium: ChromiumSection {
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            window: [1280, 800],
            nav_timeout_seconds: 5,
        },
        timeouts: TimeoutsSection {
            interaction_seconds: 1,
            step_seconds: 1,
            artifact_wait_seconds: 1,
            poll_interval_ms: 10,
        },
        retry: RetrySection {
            max_attempts: 2,
            delay_ms: 0,
        },
        download: DownloadSection {
            strategy: DownloadStrategyKind::UiLink,
            settle: SettlePolicy::FinalName,
        },
        wizard: WizardSection {
            admin_page: "wp-admin/admin.php?page=wt_import_export_for_woo".to_string(),
            status: "active".to_string(),
            status_labels: vec!["Active".to_string()],
            columns: vec!["subscription_status".to_string()],
            meta_fields: vec!["meta:Language".to_string()],
        },
        selectors: SelectorSection {
            login_user: "#user_login".to_string(),
            login_pass: "#user_pass".to_string(),
            login_remember: "#rememberme".to_string(),
            login_submit: "#wp-submit".to_string(),
            login_error: "#login_error".to_string(),
            post_type_card: "div.card".to_string(),
            method_step_button: "button.method".to_string(),
            new_export_radio: "#new-export".to_string(),
            filter_step_button: "button.filter".to_string(),
            status_dropdown: vec!["span.select2-selection".to_string()],
            status_option: vec!["li.option-active".to_string()],
            status_chip: "li.chip".to_string(),
            token_remove: "span.remove".to_string(),
            mapping_step_button: "button.mapping".to_string(),
            mapping_table: "table.mapping".to_string(),
            column_checkboxes: "table.mapping input".to_string(),
            meta_box_header: ".meta-header".to_string(),
            advanced_step_button: "button.advanced".to_string(),
            export_buttons: vec!["button.export".to_string()],
            loader_box: "div.loader".to_string(),
            download_links: vec!["a.download".to_string()],
        },
        observability: ObservabilitySection {
            failure_log: "data/export_failures.log".to_string(),
            runs_db: "data/export_runs.sqlite".to_string(),
        },
    }
}

struct MockPage {
    url: Mutex<String>,
    login_succeeds: bool,
    error_banner: Option<String>,
    link_href: Option<String>,
}

impl MockPage {
    fn logged_in(link_href: &str) -> Self {
        Self {
            url: Mutex::new(String::new()),
            login_succeeds: true,
            error_banner: None,
            link_href: Some(link_href.to_string()),
        }
    }

    fn rejected(banner: Option<&str>) -> Self {
        Self {
            url: Mutex::new(String::new()),
            login_succeeds: false,
            error_banner: banner.map(str::to_string),
            link_href: None,
        }
    }
}

#[async_trait(?Send)]
impl DrivenPage for MockPage {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn document_ready(&self) -> BrowserResult<bool> {
        Ok(true)
    }

    async fn element_state(&self, _selector: &str) -> BrowserResult<ElementState> {
        Ok(ElementState {
            present: true,
            visible: true,
            enabled: true,
            checked: true,
            area: 100.0,
        })
    }

    async fn click(&self, selector: &str) -> BrowserResult<ClickOutcome> {
        if selector == "#wp-submit" && self.login_succeeds {
            *self.url.lock().unwrap() = "https://example.com/wp-admin/".to_string();
        }
        Ok(ClickOutcome::Clicked)
    }

    async fn force_click(&self, _selector: &str) -> BrowserResult<bool> {
        Ok(true)
    }

    async fn scroll_into_view(&self, _selector: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn fill(&self, _selector: &str, _value: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn set_checked(&self, _selector: &str, _checked: bool) -> BrowserResult<bool> {
        Ok(true)
    }

    async fn press_key(&self, _selector: &str, _key: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn inner_text(&self, selector: &str) -> BrowserResult<Option<String>> {
        if selector == "#login_error" {
            return Ok(self.error_banner.clone());
        }
        Ok(None)
    }

    async fn attribute(&self, _selector: &str, name: &str) -> BrowserResult<Option<String>> {
        if name == "href" {
            return Ok(self.link_href.clone());
        }
        Ok(None)
    }

    async fn eval(&self, _script: &str) -> BrowserResult<Value> {
        Ok(Value::Bool(true))
    }

    async fn cookies(&self) -> BrowserResult<Vec<SessionCookie>> {
        Ok(vec![SessionCookie {
            name: "wordpress_logged_in".to_string(),
            value: "token".to_string(),
            domain: "example.com".to_string(),
            path: "/".to_string(),
        }])
    }
}

struct MockFetcher {
    artifact: DownloadArtifact,
    seen: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn new(artifact: DownloadArtifact) -> Self {
        Self {
            artifact,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait(?Send)]
impl ArtifactFetcher for MockFetcher {
    async fn fetch(&self, href: &str) -> ExportResult<DownloadArtifact> {
        self.seen.lock().unwrap().push(href.to_string());
        Ok(self.artifact.clone())
    }
}

fn action<F>(f: F) -> StepAction
where
    F: for<'a> Fn(&'a dyn DrivenPage) -> LocalBoxFuture<'a, ExportResult<()>> + 'static,
{
    Box::new(f)
}

fn check<F>(f: F) -> StepCheck
where
    F: for<'a> Fn(&'a dyn DrivenPage) -> LocalBoxFuture<'a, ExportResult<bool>> + 'static,
{
    Box::new(f)
}

fn passing_step(name: &str) -> StepDefinition {
    StepDefinition::new(
        name,
        action(|_page| Box::pin(async { Ok(()) })),
        check(|_page| Box::pin(async { Ok(true) })),
    )
}

fn stuck_step(name: &str) -> StepDefinition {
    StepDefinition::new(
        name,
        action(|_page| Box::pin(async { Ok(()) })),
        check(|_page| Box::pin(async { Ok(false) })),
    )
    .with_timeout(Duration::from_millis(50))
}

fn credentials() -> Credentials {
    Credentials::new("https://example.com", "admin", "app-password").unwrap()
}

fn sample_artifact() -> DownloadArtifact {
    DownloadArtifact {
        bytes: b"status,city\nactive,Brussels\n".to_vec(),
        filename: Some("subscriptions.csv".to_string()),
        content_type: Some("text/csv".to_string()),
    }
}

fn drain(mut rx: UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn successful_run_emits_progress_per_step_then_done() {
    let config = test_config();
    let page = MockPage::logged_in("https://example.com/?wt_iew_export_download=true");
    let steps: Vec<StepDefinition> = (1..=5)
        .map(|index| passing_step(&format!("step-{index}")))
        .collect();
    let plan = DownloadPlan::UiLink {
        locators: vec!["a.download".to_string()],
    };
    let fetcher = MockFetcher::new(sample_artifact());
    let (sink, rx) = ProgressSink::channel();
    let mut job = ExportJob::new();

    let artifact = drive_export(
        &page,
        &config,
        &credentials(),
        &steps,
        &plan,
        &fetcher,
        &sink,
        &mut job,
        false,
    )
    .await
    .unwrap();

    assert_eq!(artifact, sample_artifact());
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.last_event().unwrap().kind, ProgressKind::Done);
    assert_eq!(
        fetcher.seen.lock().unwrap().as_slice(),
        ["https://example.com/?wt_iew_export_download=true"]
    );

    drop(sink);
    let events = drain(rx);
    assert_eq!(events.len(), 6);
    let mut last_pct = 0u8;
    for (index, event) in events.iter().take(5).enumerate() {
        assert_eq!(event.kind, ProgressKind::Progress);
        assert_eq!(event.step.as_deref(), Some(format!("step-{}", index + 1).as_str()));
        let pct = event.pct.unwrap();
        assert!(pct > last_pct, "pct must be strictly increasing");
        last_pct = pct;
    }
    let done = &events[5];
    assert_eq!(done.kind, ProgressKind::Done);
    assert_eq!(done.filename.as_deref(), Some("subscriptions.csv"));
    assert_eq!(done.content_type.as_deref(), Some("text/csv"));
    assert!(done.data.is_none(), "payload only embedded on request");
    assert!(!events.iter().any(|event| event.kind == ProgressKind::Error));
}

#[tokio::test]
async fn failing_post_condition_stops_the_sequence_and_names_the_step() {
    let config = test_config();
    let page = MockPage::logged_in("https://example.com/download");
    let steps = vec![
        passing_step("step-1"),
        passing_step("step-2"),
        stuck_step("step-3"),
        passing_step("step-4"),
        passing_step("step-5"),
    ];
    let plan = DownloadPlan::UiLink {
        locators: vec!["a.download".to_string()],
    };
    let fetcher = MockFetcher::new(sample_artifact());
    let (sink, rx) = ProgressSink::channel();
    let mut job = ExportJob::new();

    let result = drive_export(
        &page,
        &config,
        &credentials(),
        &steps,
        &plan,
        &fetcher,
        &sink,
        &mut job,
        false,
    )
    .await;

    match result {
        Err(ExportError::StepFailed { step, .. }) => assert_eq!(step, "step-3"),
        other => panic!("expected StepFailed for step-3, got {other:?}"),
    }
    assert_eq!(job.state(), JobState::Failed);
    assert_eq!(job.last_event().unwrap().kind, ProgressKind::Error);
    assert!(fetcher.seen.lock().unwrap().is_empty());

    drop(sink);
    let events = drain(rx);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].step.as_deref(), Some("step-1"));
    assert_eq!(events[1].step.as_deref(), Some("step-2"));
    assert_eq!(events[2].kind, ProgressKind::Error);
    assert!(events[2].message.contains("step-3"));
}

#[tokio::test]
async fn rejected_login_surfaces_the_banner_text_verbatim() {
    let config = test_config();
    let banner = "Error: the password you entered for admin is incorrect.";
    let page = MockPage::rejected(Some(banner));
    let steps = vec![passing_step("step-1")];
    let plan = DownloadPlan::UiLink {
        locators: vec!["a.download".to_string()],
    };
    let fetcher = MockFetcher::new(sample_artifact());
    let (sink, rx) = ProgressSink::channel();
    let mut job = ExportJob::new();

    let result = drive_export(
        &page,
        &config,
        &credentials(),
        &steps,
        &plan,
        &fetcher,
        &sink,
        &mut job,
        false,
    )
    .await;

    match result {
        Err(ExportError::AuthenticationFailed(reason)) => assert_eq!(reason, banner),
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }
    assert_eq!(job.state(), JobState::Failed);

    drop(sink);
    let events = drain(rx);
    assert_eq!(events.len(), 1, "no progress events before the rejection");
    assert_eq!(events[0].kind, ProgressKind::Error);
    assert!(events[0].message.contains(banner));
}

#[tokio::test]
async fn rejected_login_without_banner_uses_the_generic_reason() {
    let config = test_config();
    let page = MockPage::rejected(None);
    let steps = vec![passing_step("step-1")];
    let plan = DownloadPlan::UiLink {
        locators: vec!["a.download".to_string()],
    };
    let fetcher = MockFetcher::new(sample_artifact());
    let (sink, _rx) = ProgressSink::channel();
    let mut job = ExportJob::new();

    let result = drive_export(
        &page,
        &config,
        &credentials(),
        &steps,
        &plan,
        &fetcher,
        &sink,
        &mut job,
        false,
    )
    .await;

    match result {
        Err(ExportError::AuthenticationFailed(reason)) => {
            assert!(reason.contains("additional verification"));
        }
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn capture_dir_plan_reads_the_settled_file() {
    let config = test_config();
    let page = MockPage::logged_in("unused");
    let steps = vec![passing_step("step-1"), passing_step("step-2")];

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("export.csv"), b"a,b\n1,2\n").unwrap();
    let plan = DownloadPlan::CaptureDir {
        dir: dir.path().to_path_buf(),
        settle: SettlePolicy::FinalName,
    };
    let fetcher = MockFetcher::new(sample_artifact());
    let (sink, _rx) = ProgressSink::channel();
    let mut job = ExportJob::new();

    let artifact = drive_export(
        &page,
        &config,
        &credentials(),
        &steps,
        &plan,
        &fetcher,
        &sink,
        &mut job,
        false,
    )
    .await
    .unwrap();

    assert_eq!(artifact.bytes, b"a,b\n1,2\n");
    assert_eq!(artifact.filename.as_deref(), Some("export.csv"));
    assert_eq!(artifact.content_type.as_deref(), Some("text/csv"));
    assert!(fetcher.seen.lock().unwrap().is_empty(), "no HTTP fetch for capture files");
}

#[tokio::test]
async fn embedded_payload_is_base64_of_the_artifact_bytes() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    let config = test_config();
    let page = MockPage::logged_in("https://example.com/download");
    let steps = vec![passing_step("step-1")];
    let plan = DownloadPlan::UiLink {
        locators: vec!["a.download".to_string()],
    };
    let fetcher = MockFetcher::new(sample_artifact());
    let (sink, rx) = ProgressSink::channel();
    let mut job = ExportJob::new();

    drive_export(
        &page,
        &config,
        &credentials(),
        &steps,
        &plan,
        &fetcher,
        &sink,
        &mut job,
        true,
    )
    .await
    .unwrap();

    drop(sink);
    let events = drain(rx);
    let done = events.last().unwrap();
    assert_eq!(done.kind, ProgressKind::Done);
    assert_eq!(
        done.data.as_deref(),
        Some(BASE64.encode(sample_artifact().bytes).as_str())
    );
}
