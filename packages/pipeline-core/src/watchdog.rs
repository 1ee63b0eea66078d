//! Watchdog (spec §4.7): a timer-driven scanner that reclaims jobs whose
//! executing process disappeared. Process-local safety net only — it does
//! not relaunch work, and its timer must never keep the process alive on
//! its own.

use crate::storage::Storage;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};

const DEFAULT_CHECK_INTERVAL_MS: u64 = 60_000;
const DEFAULT_JOB_TIMEOUT_MS: i64 = 1_200_000;

pub type OnStaleJobsFound = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Clone)]
pub struct WatchdogConfig {
    pub check_interval_ms: u64,
    pub job_timeout_ms: i64,
    pub on_stale_jobs_found: Option<OnStaleJobsFound>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            job_timeout_ms: DEFAULT_JOB_TIMEOUT_MS,
            on_stale_jobs_found: None,
        }
    }
}

impl std::fmt::Debug for WatchdogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchdogConfig")
            .field("check_interval_ms", &self.check_interval_ms)
            .field("job_timeout_ms", &self.job_timeout_ms)
            .field("on_stale_jobs_found", &self.on_stale_jobs_found.is_some())
            .finish()
    }
}

/// Start/stop is idempotent and safe to call from shutdown paths: `stop`
/// signals the background loop and awaits its exit; calling it twice, or
/// dropping the watchdog without calling it, is harmless — the spawned
/// task simply stops being polled and is cleaned up by the runtime.
pub struct Watchdog {
    storage: Arc<dyn Storage>,
    config: WatchdogConfig,
    handle: Option<JoinHandle<()>>,
    stop: Arc<Notify>,
}

impl Watchdog {
    pub fn new(storage: Arc<dyn Storage>, config: WatchdogConfig) -> Self {
        Self {
            storage,
            config,
            handle: None,
            stop: Arc::new(Notify::new()),
        }
    }

    /// Spawn the periodic scan. No-op if already running.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let storage = self.storage.clone();
        let config = self.config.clone();
        let stop = self.stop.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(config.check_interval_ms));
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match storage.find_and_timeout_stale_jobs(config.job_timeout_ms).await {
                            Ok(count) if count > 0 => {
                                warn!(count, "watchdog reclaimed stale jobs");
                                if let Some(hook) = &config.on_stale_jobs_found {
                                    hook(count);
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "watchdog scan failed"),
                        }
                    }
                    _ = stop.notified() => {
                        info!("watchdog stopping");
                        break;
                    }
                }
            }
        });

        self.handle = Some(handle);
    }

    /// Stop the scan loop and wait for it to exit. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.notify_one();
            let _ = handle.await;
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.notify_one();
        }
    }
}
