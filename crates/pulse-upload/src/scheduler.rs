use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::worker::{UploadReport, UploadWorker};

const MAX_STEPS: u32 = 10;

/// Delay before the next pass: shorter after a clean pass, longer otherwise,
/// always within `[base, base * 10]`.
pub fn next_delay(current: Duration, base: Duration, all_succeeded: bool) -> Duration {
    let next = if all_succeeded {
        current * 9 / 10
    } else {
        current * 11 / 10
    };
    next.clamp(base, base * MAX_STEPS)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub base_step: Duration,
    /// Bound on the final pass run by [`UploadScheduler::shutdown`].
    pub drain_timeout: Duration,
}

/// Runs [`UploadWorker::run_once`] on an adaptive period until shut down.
pub struct UploadScheduler {
    worker: Arc<UploadWorker>,
    config: SchedulerConfig,
    delay: Arc<Mutex<Duration>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UploadScheduler {
    /// Spawn the scheduling loop. The first pass runs one base step after start.
    pub fn start(worker: Arc<UploadWorker>, config: SchedulerConfig) -> Self {
        let delay = Arc::new(Mutex::new(config.base_step));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(schedule_loop(
            worker.clone(),
            config.base_step,
            delay.clone(),
            cancel.clone(),
        ));
        info!(
            base_step_ms = config.base_step.as_millis() as u64,
            features = ?worker.features(),
            "upload scheduler started"
        );
        Self {
            worker,
            config,
            delay,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn current_delay(&self) -> Duration {
        *self.delay.lock()
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Stop the loop, let an in-flight pass finish, then run one final pass.
    /// The whole drain is bounded by the drain timeout. Returns the final
    /// pass report, or `None` if already shut down or the drain timed out.
    pub async fn shutdown(&self) -> Option<UploadReport> {
        let handle = self.handle.lock().take()?;
        self.cancel.cancel();
        let worker = self.worker.clone();
        let drain = async move {
            if let Err(e) = handle.await {
                warn!(error = %e, "upload scheduler task failed");
            }
            worker.run_once().await
        };
        match tokio::time::timeout(self.config.drain_timeout, drain).await {
            Ok(report) => {
                info!(
                    uploaded = report.uploaded(),
                    failed = report.failed(),
                    "final upload pass finished"
                );
                Some(report)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.drain_timeout.as_millis() as u64,
                    "final upload pass timed out"
                );
                None
            }
        }
    }
}

async fn schedule_loop(
    worker: Arc<UploadWorker>,
    base: Duration,
    delay: Arc<Mutex<Duration>>,
    cancel: CancellationToken,
) {
    loop {
        let wait = *delay.lock();
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
        // A started pass always completes.
        let report = worker.run_once().await;
        let next = next_delay(wait, base, report.all_succeeded());
        *delay.lock() = next;
        debug!(
            attempted = report.attempted(),
            next_delay_ms = next.as_millis() as u64,
            "upload pass scheduled"
        );
    }
    debug!("upload scheduler stopped");
}
