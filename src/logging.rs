//! File-backed tracing setup. The terminal belongs to the UI, so events go to
//! the configured log file or nowhere.

use std::fs::{self, OpenOptions};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

pub const LOG_ENV: &str = "SNAPBRIDGE_LOG";

pub fn init(config: &LogConfig) -> Result<()> {
    let Some(path) = config.file.as_ref() else {
        return Ok(());
    };

    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("logging: parse filter")?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: create directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("logging: open {}", path.display()))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .try_init()
        .context("logging: install subscriber")?;
    Ok(())
}
