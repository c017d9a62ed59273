use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use miau_core::{prune_stale_logs, LogRotationPolicy, RotatingLogWriter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_NAME: &str = "miau.log";
const LOG_RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub(crate) fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_NAME)
}

/// Installs a compact console layer plus an uncolored file layer writing
/// `<log_dir>/miau.log` through the size-rotating writer.
pub(crate) fn init_tracing(log_dir: &Path, policy: LogRotationPolicy) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let file_writer = RotatingLogWriter::new(log_file_path(log_dir), policy);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).compact())
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(move || file_writer.clone()),
        )
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

/// Runs one retention pass, logging instead of failing.
pub(crate) fn sweep_stale_logs(log_dir: &Path, max_age: Duration) -> usize {
    match prune_stale_logs(log_dir, max_age) {
        Ok(removed) => {
            if removed > 0 {
                info!(dir = %log_dir.display(), removed, "stale log files pruned");
            }
            removed
        }
        Err(error) => {
            warn!(dir = %log_dir.display(), error = %format!("{error:#}"), "log retention sweep failed");
            0
        }
    }
}

/// Sweeps `log_dir` immediately and then hourly until `shutdown` fires.
pub(crate) fn spawn_log_retention(
    log_dir: PathBuf,
    max_age: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LOG_RETENTION_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sweep_stale_logs(&log_dir, max_age);
                }
            }
        }
    })
}

/// Waits for the retention task; a panic or abort is logged, not propagated.
pub(crate) async fn join_log_retention(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(error) => {
            warn!(error = %error, "log retention task ended abnormally");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    #[test]
    fn functional_sweep_removes_only_stale_log_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stale = temp.path().join("miau.log.1");
        let fresh = temp.path().join("miau.log");
        let other = temp.path().join("instances.json");
        for path in [&stale, &fresh, &other] {
            std::fs::write(path, "x").expect("write fixture");
        }
        let old = SystemTime::now() - Duration::from_secs(48 * 3600);
        std::fs::File::options()
            .write(true)
            .open(&stale)
            .expect("open stale")
            .set_modified(old)
            .expect("backdate");
        std::fs::File::options()
            .write(true)
            .open(&other)
            .expect("open other")
            .set_modified(old)
            .expect("backdate");

        assert_eq!(sweep_stale_logs(temp.path(), Duration::from_secs(36 * 3600)), 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[test]
    fn regression_sweep_of_missing_dir_is_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            sweep_stale_logs(&temp.path().join("absent"), Duration::from_secs(1)),
            0
        );
    }

    #[tokio::test]
    async fn integration_retention_task_stops_on_cancel() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shutdown = CancellationToken::new();
        let handle = spawn_log_retention(
            temp.path().to_path_buf(),
            Duration::from_secs(60),
            shutdown.clone(),
        );
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task finishes")
            .expect("task joins");
        assert_eq!(log_file_path(temp.path()), temp.path().join("miau.log"));
    }

    #[tokio::test]
    async fn regression_join_reports_panicked_retention_task() {
        let panicked = tokio::spawn(async { panic!("retention sweep exploded") });
        assert!(!join_log_retention(panicked).await);

        let temp = tempfile::tempdir().expect("tempdir");
        let shutdown = CancellationToken::new();
        let handle = spawn_log_retention(
            temp.path().to_path_buf(),
            Duration::from_secs(60),
            shutdown.clone(),
        );
        shutdown.cancel();
        assert!(join_log_retention(handle).await);
    }
}
