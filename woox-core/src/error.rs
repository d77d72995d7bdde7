use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading the export configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
