use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::warn;

use crate::error::GenerateError;

pub const LOG_FILE: &str = "chartpilot.log";

static TELEMETRY_ENABLED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));
static LOG_DIR: Lazy<RwLock<PathBuf>> = Lazy::new(|| RwLock::new(PathBuf::from("logs")));

pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief Redirects the log directory (defaults to `./logs`).
 */
pub fn set_log_dir(dir: impl Into<PathBuf>) {
    if let Ok(mut guard) = LOG_DIR.write() {
        *guard = dir.into();
    }
}

pub fn log_path() -> PathBuf {
    LOG_DIR
        .read()
        .map(|d| d.clone())
        .unwrap_or_else(|_| PathBuf::from("logs"))
        .join(LOG_FILE)
}

pub fn log_event(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("INFO", category, message) {
        warn!("telemetry write failed: {}", err);
    }
}

/**
 * \brief Records one generation attempt: provider tag, mode, latency and outcome kind.
 *
 * The file append runs on tokio's blocking pool.
 */
pub async fn record_generation(
    provider: &str,
    mode: &str,
    elapsed: Duration,
    outcome: Result<(), &GenerateError>,
) {
    if !is_enabled() {
        return;
    }
    let ms = elapsed.as_millis();
    let (level, message) = match outcome {
        Ok(()) => (
            "INFO",
            format!("provider={} mode={} ms={} outcome=ok", provider, mode, ms),
        ),
        Err(e) => (
            "ERROR",
            format!(
                "provider={} mode={} ms={} outcome={} status={}",
                provider,
                mode,
                ms,
                e.kind(),
                e.http_status()
            ),
        ),
    };
    let path = log_path();
    match tokio::task::spawn_blocking(move || append_line(&path, level, "generate", &message)).await
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("telemetry write failed: {}", err),
        Err(err) => warn!("telemetry task failed: {}", err),
    }
}

fn write_line(level: &str, category: &str, message: &str) -> Result<()> {
    append_line(&log_path(), level, category, message)
}

fn append_line(path: &Path, level: &str, category: &str, message: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{} [{}] {} - {}", timestamp, level, category, message)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_only_when_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_log_dir(dir.path());

        set_enabled(false);
        log_event("cli", "should not appear");
        record_generation("OPENAI", "chart", Duration::from_millis(1), Ok(())).await;
        assert!(!log_path().exists());

        set_enabled(true);
        log_event("cli.init", "provider=OLLAMA id=1");
        record_generation("OPENAI", "chart", Duration::from_millis(12), Ok(())).await;
        let err = GenerateError::RateLimit { provider: "OpenAI" };
        record_generation("OPENAI", "chart", Duration::from_millis(5), Err(&err)).await;
        set_enabled(false);

        let content = std::fs::read_to_string(log_path()).expect("read log");
        assert!(content.contains("[INFO] cli.init - provider=OLLAMA id=1"));
        assert!(content.contains("[INFO] generate - provider=OPENAI mode=chart ms=12 outcome=ok"));
        assert!(content.contains("[ERROR] generate - provider=OPENAI mode=chart ms=5 outcome=rate_limit_error status=429"));
    }
}
