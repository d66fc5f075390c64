use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

static LOG_DIR: Lazy<std::sync::RwLock<PathBuf>> =
    Lazy::new(|| std::sync::RwLock::new(PathBuf::from("logs")));

/**
 * \brief 更新遥测开关状态。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

/**
 * \brief 查询当前遥测开关状态。
 */
pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 设置日志目录（默认 ./logs）。
 */
pub fn set_log_dir(dir: PathBuf) {
    if let Ok(mut guard) = LOG_DIR.write() {
        *guard = dir;
    }
}

/**
 * \brief 记录常规事件。
 */
pub fn log_event(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("INFO", category, message) {
        tracing::warn!(error = %err, "telemetry write failed");
    }
}

/**
 * \brief 记录错误事件。
 */
pub fn log_error(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("ERROR", category, message) {
        tracing::warn!(error = %err, "telemetry write failed");
    }
}

fn write_line(level: &str, category: &str, message: &str) -> Result<()> {
    let log_dir = LOG_DIR
        .read()
        .map(|g| g.clone())
        .unwrap_or_else(|_| PathBuf::from("logs"));
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("vibetune.log"))?;
    writeln!(file, "{} [{}] {} - {}", timestamp, level, category, message)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_written_only_when_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_log_dir(dir.path().to_path_buf());
        let file = dir.path().join("vibetune.log");

        set_enabled(false);
        log_event("pipeline.submit", "ignored");
        assert!(!file.exists());

        set_enabled(true);
        log_event("pipeline.submit", "language=Hindi");
        log_error("pipeline.failed", "search: network");
        set_enabled(false);

        let content = std::fs::read_to_string(&file).expect("read log");
        assert!(!content.contains("ignored"));
        assert!(content
            .lines()
            .any(|l| l.ends_with("[INFO] pipeline.submit - language=Hindi")));
        assert!(content
            .lines()
            .any(|l| l.ends_with("[ERROR] pipeline.failed - search: network")));
    }
}
