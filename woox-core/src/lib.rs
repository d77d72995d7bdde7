pub mod browser;
pub mod config;
pub mod error;
pub mod export;

pub use config::{load_export_config, DownloadStrategyKind, ExportConfig, SettlePolicy};
pub use error::{ConfigError, Result};
pub use export::{
    Credentials, DownloadArtifact, ExportError, ExportOptions, ExportOrchestrator, ExportResult,
    ExportTelemetry, ProgressEvent, ProgressKind, ProgressSink,
};
