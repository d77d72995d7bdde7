use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use woox_core::browser::BrowserKind;
use woox_core::export::TelemetryError;
use woox_core::{
    load_export_config, Credentials, ExportConfig, ExportError, ExportOptions, ExportOrchestrator,
    ExportTelemetry, ProgressEvent, ProgressKind, ProgressSink,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] woox_core::ConfigError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "WooCommerce subscriptions export automation", long_about = None)]
pub struct Cli {
    /// Path to the export configuration
    #[arg(long, default_value = "configs/woox.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the export wizard against a WordPress site
    Export(ExportArgs),
    /// List recent export runs recorded in the telemetry database
    History(HistoryArgs),
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Site URL; admin-path suffixes are stripped automatically
    #[arg(long)]
    pub base_url: String,
    /// WordPress username or email
    #[arg(long)]
    pub username: String,
    /// WordPress password or application password
    #[arg(long, env = "WOOX_PASSWORD", hide_env_values = true)]
    pub password: String,
    /// Browser engine to drive
    #[arg(long, default_value = "chromium")]
    pub browser: String,
    /// Run with a visible browser window
    #[arg(long, default_value_t = false)]
    pub headed: bool,
    /// Where to write the artifact; defaults to its reported filename
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Embed the base64 payload in the terminal done event
    #[arg(long, default_value_t = false)]
    pub embed_payload: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Maximum runs to show
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
    /// Alternative telemetry database path
    #[arg(long)]
    pub runs_db: Option<PathBuf>,
}

pub fn run(cli: Cli) -> Result<()> {
    let config = load_export_config(&cli.config)?;
    match &cli.command {
        Commands::Export(args) => export(&config, args, cli.format),
        Commands::History(args) => {
            let db_path = args
                .runs_db
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.observability.runs_db));
            let runs = history(&db_path, args.limit)?;
            render(&runs, cli.format)
        }
    }
}

fn export(config: &ExportConfig, args: &ExportArgs, format: OutputFormat) -> Result<()> {
    let credentials = Credentials::new(&args.base_url, &args.username, &args.password)?;
    let browser = args.browser.parse::<BrowserKind>().map_err(ExportError::from)?;
    let options = ExportOptions {
        browser,
        headless: if args.headed { Some(false) } else { None },
        embed_payload: args.embed_payload,
    };

    let telemetry = Arc::new(ExportTelemetry::new(
        &config.observability.failure_log,
        &config.observability.runs_db,
    )?);
    let orchestrator = ExportOrchestrator::new(Arc::new(config.clone()), telemetry);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let (sink, rx) = ProgressSink::channel();

        // The observer runs in its own task: it consumes the channel at its
        // own pace and can never block the automation worker.
        let printer = tokio::spawn(async move {
            let mut stream = UnboundedReceiverStream::new(rx);
            while let Some(event) = stream.next().await {
                match format {
                    OutputFormat::Text => println!("{}", render_event(&event)),
                    OutputFormat::Json => {
                        if let Ok(line) = serde_json::to_string(&event) {
                            println!("{line}");
                        }
                    }
                }
            }
        });

        let outcome = orchestrator.run(&credentials, &options, &sink).await;
        drop(sink);
        let _ = printer.await;

        match outcome {
            Ok(artifact) => {
                let path = args.output.clone().unwrap_or_else(|| {
                    PathBuf::from(
                        artifact
                            .filename
                            .clone()
                            .unwrap_or_else(|| "export.csv".to_string()),
                    )
                });
                std::fs::write(&path, &artifact.bytes)?;
                if matches!(format, OutputFormat::Text) {
                    println!(
                        "saved {} bytes to {} ({})",
                        artifact.bytes.len(),
                        path.display(),
                        artifact.content_type.as_deref().unwrap_or("unknown type"),
                    );
                }
                Ok(())
            }
            Err(err) => {
                eprintln!("hint: {}", err.class().advice());
                Err(AppError::Export(err))
            }
        }
    })
}

pub fn render_event(event: &ProgressEvent) -> String {
    match event.kind {
        ProgressKind::Progress => format!(
            "[{:>3}%] {}: {}",
            event.pct.unwrap_or(0),
            event.step.as_deref().unwrap_or("-"),
            event.message
        ),
        ProgressKind::Error => format!("[fail] {}", event.message),
        ProgressKind::Done => {
            let filename = event.filename.as_deref().unwrap_or("artifact");
            format!("[done] {} ({filename})", event.message)
        }
    }
}

fn history(db_path: &Path, limit: usize) -> Result<RunList> {
    if !db_path.exists() {
        return Err(AppError::MissingResource(format!(
            "telemetry database not found at {}",
            db_path.display()
        )));
    }
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(
        "SELECT ts, job_id, site, success, duration_ms, error \
         FROM export_runs \
         ORDER BY ts DESC \
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(RunEntry {
                ts: row.get::<_, Option<String>>(0)?,
                job_id: row.get(1)?,
                site: row.get(2)?,
                success: row.get::<_, i64>(3)? != 0,
                duration_ms: row.get::<_, Option<i64>>(4)?,
                error: row.get::<_, Option<String>>(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(RunList { rows })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct RunList {
    pub rows: Vec<RunEntry>,
}

#[derive(Debug, Serialize)]
pub struct RunEntry {
    pub ts: Option<String>,
    pub job_id: String,
    pub site: String,
    pub success: bool,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl DisplayFallback for RunList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No export runs recorded".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let status = if entry.success { "ok" } else { "failed" };
            let duration = entry
                .duration_ms
                .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                .unwrap_or_else(|| "-".to_string());
            let mut line = format!(
                "{} | {} | {} | {} | {}",
                entry.ts.as_deref().unwrap_or("-"),
                entry.job_id,
                entry.site,
                status,
                duration
            );
            if let Some(error) = &entry.error {
                if !error.is_empty() {
                    line.push_str(" | ");
                    line.push_str(error);
                }
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}
