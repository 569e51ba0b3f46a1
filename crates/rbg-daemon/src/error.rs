//! Daemon error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("schema check failed: {0}")]
    Schema(#[from] rbg_store::ProbeError),

    #[error("manifest error: {0:#}")]
    Manifest(anyhow::Error),

    #[error("controller error: {0}")]
    Controller(#[from] rbg_controller::ReconcileError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;
