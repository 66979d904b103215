use std::{fs::OpenOptions, io::Write, path::PathBuf, sync::RwLock};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const LOG_FILE: &str = "murmur.log";

struct Settings {
    enabled: bool,
    dir: PathBuf,
}

static SETTINGS: Lazy<RwLock<Settings>> = Lazy::new(|| {
    RwLock::new(Settings {
        enabled: false,
        dir: PathBuf::from("logs"),
    })
});

/**
 * \brief Turn the event log on or off. Off by default.
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = SETTINGS.write() {
        guard.enabled = enabled;
    }
}

pub fn is_enabled() -> bool {
    SETTINGS.read().map(|g| g.enabled).unwrap_or(false)
}

/**
 * \brief Change the directory the log file is written to.
 */
pub fn set_log_dir(dir: impl Into<PathBuf>) {
    if let Ok(mut guard) = SETTINGS.write() {
        guard.dir = dir.into();
    }
}

pub fn log_path() -> PathBuf {
    let dir = SETTINGS
        .read()
        .map(|g| g.dir.clone())
        .unwrap_or_else(|_| PathBuf::from("logs"));
    dir.join(LOG_FILE)
}

pub fn log_event(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("INFO", category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

pub fn log_error(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("ERROR", category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn write_line(level: &str, category: &str, message: &str) -> Result<()> {
    let path = log_path();
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    // one record per line; embedded newlines would split a record
    let message = message.replace('\n', "\\n");
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{} [{}] {} - {}", timestamp, level, category, message)?;
    Ok(())
}
