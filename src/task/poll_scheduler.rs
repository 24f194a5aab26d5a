//! Per-subscription polling loop.

use std::panic::AssertUnwindSafe;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use log::debug;
use log::error;
use log::info;
use log::warn;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::info_span;

/// Something that can run one poll cycle for a subscription.
#[async_trait]
pub trait PollTarget: Send + Sync + 'static {
    /// Runs one cycle. `cancel` is triggered when the subscription is stopped
    /// while the cycle is in flight.
    async fn poll(&self, subscription_id: &str, cancel: &CancellationToken) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Drives one subscription: a cycle runs to completion, then the next one is
/// armed after `interval`. Cycles never overlap, so slow upstream calls make
/// the schedule drift instead of piling up.
pub struct PollScheduler {
    subscription_id: String,
    interval: Duration,
    state: SchedulerState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollScheduler {
    pub fn new(subscription_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            interval,
            state: SchedulerState::Stopped,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts the loop and runs the first cycle immediately. No-op when running.
    ///
    /// The loop holds `target` weakly and ends once the target is dropped.
    pub fn start(&mut self, target: Weak<dyn PollTarget>) {
        if self.is_running() {
            return;
        }
        self.state = SchedulerState::Running;
        self.cancel = CancellationToken::new();

        info!(
            "Starting poll loop for subscription {} with interval {:?}",
            self.subscription_id, self.interval
        );
        let span = info_span!("subscription", id = %self.subscription_id);
        let run = Self::run_loop(
            self.subscription_id.clone(),
            self.interval,
            target,
            self.cancel.clone(),
        );
        self.handle = Some(tokio::spawn(run.instrument(span)));
    }

    /// Stops the loop. An in-flight cycle finishes but is not rearmed.
    ///
    /// Returns the loop's handle so callers can wait for it to drain.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        if !self.is_running() {
            return None;
        }
        info!("Stopping poll loop for subscription {}", self.subscription_id);
        self.state = SchedulerState::Stopped;
        self.cancel.cancel();
        self.handle.take()
    }

    async fn run_loop(
        subscription_id: String,
        interval: Duration,
        target: Weak<dyn PollTarget>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(target) = target.upgrade() else {
                debug!("Poll target dropped, ending loop.");
                break;
            };

            let cycle = AssertUnwindSafe(target.poll(&subscription_id, &cancel))
                .catch_unwind()
                .await;
            drop(target);

            match cycle {
                Ok(Ok(())) => debug!("Poll cycle for subscription {subscription_id} finished."),
                Ok(Err(e)) => warn!("Poll cycle for subscription {subscription_id} failed: {e:#}"),
                Err(_) => error!("Poll cycle for subscription {subscription_id} panicked."),
            }

            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }
        debug!("Poll loop for subscription {subscription_id} ended.");
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
