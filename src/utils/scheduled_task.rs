//! An owned, cancellable periodic task.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Runs `tick` every `period` until stopped, dropped, or `tick` breaks.
/// The first tick happens one full period after start.
pub struct ScheduledTask {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Returns `None` when there is no Tokio runtime to run on or `period`
    /// is zero.
    pub fn start<F, Fut>(name: &str, period: Duration, mut tick: F) -> Option<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        if period.is_zero() {
            warn!(task = name, "Zero period; scheduled task not started");
            return None;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(task = name, "No async runtime available; scheduled task not started");
                return None;
            }
        };

        let task_name = name.to_string();
        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick().await.is_break() {
                    debug!(task = task_name.as_str(), "Scheduled task finished");
                    break;
                }
            }
        });

        debug!(task = name, period_ms = period.as_millis() as u64, "Scheduled task started");
        Some(ScheduledTask {
            name: name.to_string(),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancels the task. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(task = self.name.as_str(), "Scheduled task stopped");
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.stop();
    }
}
