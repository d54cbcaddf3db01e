//! Background task plumbing.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A spawned background loop with its own cancellation token.
///
/// The token is a child of the token passed to [`TaskHandle::spawn`], so
/// cancelling the parent stops the loop as well.
pub struct TaskHandle {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawns `run` on the current runtime, handing it a child of `parent`.
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let handle = tokio::spawn(run(token.clone()));
        debug!("Spawned task {name}");
        Self {
            name,
            token,
            handle,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the loop to stop and waits for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!("Task {} ended abnormally: {e}", self.name);
        }
        debug!("Stopped task {}", self.name);
    }
}

/// Sleeps for `duration` unless cancelled first. Returns false on cancel.
pub(crate) async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Interval whose first tick fires one period from now.
pub(crate) fn delayed_interval(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
