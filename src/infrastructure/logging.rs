use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "scheduling.log";
pub const LOG_FILTER_ENV: &str = "COACHSCHED_LOG";

/// Installs a JSON-lines subscriber writing to `<logs_dir>/scheduling.log`.
/// Returns the log path. A subscriber installed earlier (by the host or a
/// previous call) is left in place.
pub fn init_logging(logs_dir: &Path) -> Result<PathBuf, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let path = logs_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!(path = %path.display(), "tracing subscriber already installed");
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_file_and_is_repeatable() {
        let dir = std::env::temp_dir().join(format!("coachsched-logs-{}", std::process::id()));
        let first = init_logging(&dir).expect("first init");
        let second = init_logging(&dir).expect("second init");
        assert_eq!(first, second);
        assert!(first.exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
