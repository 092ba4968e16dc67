use std::{fs::File, str::FromStr, sync::Arc};

use thiserror::Error;
use tracing_subscriber::{filter::LevelFilter, prelude::*, util::TryInitError, Registry};

#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid log level {0}")]
    InvalidLevel(String),
    #[error("failed to open log file: {0}")]
    LogFile(#[from] std::io::Error),
    #[error("failed to install subscriber: {0}")]
    Install(#[from] TryInitError),
}

pub fn prepare_tracing(conf: TraceConfig) -> Result<(), InitError> {
    let level = LevelFilter::from_str(&conf.level)
        .map_err(|_| InitError::InvalidLevel(conf.level.clone()))?;
    let file = match conf.file.as_ref() {
        Some(path) => Some(Arc::new(File::create(path)?)),
        None => None,
    };

    if conf.format == "json" {
        Registry::default()
            .with(file.map(|f| {
                tracing_subscriber::fmt::Layer::new()
                    .with_ansi(false)
                    .json()
                    .with_writer(f)
            }))
            .with(tracing_subscriber::fmt::Layer::new().json())
            .with(level)
            .try_init()?;
    } else {
        Registry::default()
            .with(file.map(|f| {
                tracing_subscriber::fmt::Layer::new()
                    .with_ansi(false)
                    .with_writer(f)
            }))
            .with(tracing_subscriber::fmt::Layer::new().with_ansi(true))
            .with(level)
            .try_init()?;
    }
    tracing::debug!(level = %level, format = %conf.format, "tracing initialized");
    Ok(())
}
