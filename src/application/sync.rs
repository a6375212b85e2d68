use crate::domain::models::{BackoffPolicy, BackoffState};
use crate::infrastructure::backoff_repository::BackoffStateRepository;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_calendar::RemoteCalendar;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const MAX_CAS_ATTEMPTS: u8 = 3;

/// Result of one sync attempt. Remote failures are an outcome, not an
/// error: they feed the backoff counters and the next eligible window
/// retries automatically.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SyncOutcome {
    /// No remote bridge is configured or connected; nothing to gate.
    NotConnected,
    Skipped { retry_in_ms: u64 },
    Completed,
    Failed { message: String },
}

/// Gates the remote `sync_now` call behind the backoff policy.
pub struct SyncOrchestrator<R, B>
where
    R: RemoteCalendar,
    B: BackoffStateRepository,
{
    remote: Arc<R>,
    backoff_repository: Arc<B>,
    policy: BackoffPolicy,
    now_provider: NowProvider,
}

impl<R, B> SyncOrchestrator<R, B>
where
    R: RemoteCalendar,
    B: BackoffStateRepository,
{
    pub fn new(remote: Arc<R>, backoff_repository: Arc<B>) -> Self {
        Self {
            remote,
            backoff_repository,
            policy: BackoffPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// One gated sync attempt: skip inside the backoff window, otherwise
    /// call the remote and record the result.
    pub async fn attempt(&self) -> Result<SyncOutcome, InfraError> {
        let state = self.backoff_repository.load()?;
        let now_ms = (self.now_provider)().timestamp_millis();
        if state.should_skip(&self.policy, now_ms) {
            let backoff_ms = self.policy.backoff_ms(state.failure_count) as i64;
            let elapsed = now_ms.saturating_sub(state.last_failure_at_ms);
            return Ok(SyncOutcome::Skipped {
                retry_in_ms: backoff_ms.saturating_sub(elapsed).max(0) as u64,
            });
        }

        match self.remote.sync_now().await {
            Ok(true) => {
                self.record_success()?;
                Ok(SyncOutcome::Completed)
            }
            Ok(false) => {
                self.record_failure(now_ms)?;
                Ok(SyncOutcome::Failed {
                    message: "remote sync reported failure".to_string(),
                })
            }
            Err(error) => {
                self.record_failure(now_ms)?;
                Ok(SyncOutcome::Failed {
                    message: error.to_string(),
                })
            }
        }
    }

    fn record_failure(&self, now_ms: i64) -> Result<(), InfraError> {
        // Bounded CAS retries; losing every round only costs one extra
        // sync attempt later.
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.backoff_repository.load()?;
            let next = current.after_failure(now_ms);
            if self.backoff_repository.store(&current, &next)? {
                return Ok(());
            }
        }
        Ok(())
    }

    fn record_success(&self) -> Result<(), InfraError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.backoff_repository.load()?;
            if current.failure_count == 0 && current.last_failure_at_ms == 0 {
                return Ok(());
            }
            let next = current.after_success();
            if self.backoff_repository.store(&current, &next)? {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Periodic sync loop, alive while the calendar view is mounted.
///
/// `stop` hands the task a shutdown permit; an attempt already in flight
/// finishes first, matching the no-cancellation model.
pub struct SyncScheduler {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn spawn<R, B>(orchestrator: Arc<SyncOrchestrator<R, B>>, interval: StdDuration) -> Self
    where
        R: RemoteCalendar + 'static,
        B: BackoffStateRepository + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let task_shutdown = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep(interval) => {
                        let _ = orchestrator.attempt().await;
                    }
                    _ = task_shutdown.notified() => break,
                }
            }
        });
        Self { shutdown, handle }
    }

    pub fn stop(self) {
        self.shutdown.notify_one();
        drop(self.handle);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
