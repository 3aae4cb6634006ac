//! Repeating-action driver for the polling loop.
//!
//! Drives one [`Tick`] target at a fixed interval on a dedicated task. The
//! first firing is immediate. Ticks never overlap: when one invocation runs
//! longer than the interval, the next firing is deferred until it finishes,
//! and missed ticks are not queued. `stop` waits for an in-flight tick to
//! drain, so no tick executes after it returns.

use crate::error::{LoggerError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// A repeatedly scheduled action.
#[async_trait]
pub trait Tick: Send + Sync + 'static {
    /// Perform one scheduled action.
    async fn tick(&self);
}

/// Fixed-interval driver over one [`Tick`] target.
///
/// All control operations serialize on an internal mutex, so concurrent
/// start/stop/reconfigure calls cannot race.
pub struct Scheduler<T: Tick> {
    target: Arc<T>,
    state: Mutex<State>,
}

struct Running {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
    interval: Duration,
}

enum State {
    Idle,
    Running(Running),
}

impl<T: Tick> Scheduler<T> {
    /// Create an idle scheduler over `target`.
    pub fn new(target: Arc<T>) -> Self {
        Self {
            target,
            state: Mutex::new(State::Idle),
        }
    }

    /// Begin firing `target.tick()` every `interval`, starting immediately.
    ///
    /// Fails with [`LoggerError::AlreadyRunning`] when the loop is active.
    pub async fn start(&self, interval: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, State::Running(_)) {
            return Err(LoggerError::AlreadyRunning);
        }
        *state = State::Running(Self::spawn(Arc::clone(&self.target), interval));
        tracing::info!(?interval, "Poll loop started");
        Ok(())
    }

    /// Stop the loop, waiting for any in-flight tick to finish. No-op when
    /// idle.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if Self::halt(&mut state).await {
            tracing::info!("Poll loop stopped");
        }
    }

    /// Atomically restart the loop with a new interval; equivalent to
    /// `stop` followed by `start` with no window in between where another
    /// caller could observe the loop idle.
    pub async fn reconfigure(&self, interval: Duration) {
        let mut state = self.state.lock().await;
        Self::halt(&mut state).await;
        *state = State::Running(Self::spawn(Arc::clone(&self.target), interval));
        tracing::info!(?interval, "Poll loop reconfigured");
    }

    /// Whether the loop is currently running.
    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, State::Running(_))
    }

    /// The active interval, when running.
    pub async fn interval(&self) -> Option<Duration> {
        match &*self.state.lock().await {
            State::Running(running) => Some(running.interval),
            State::Idle => None,
        }
    }

    fn spawn(target: Arc<T>, interval: Duration) -> Running {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                target.tick().await;
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
        });
        Running {
            handle,
            stop_tx,
            interval,
        }
    }

    /// Signal the loop task and wait for it to drain. Returns whether a
    /// running loop was actually halted.
    async fn halt(state: &mut State) -> bool {
        if let State::Running(running) = std::mem::replace(state, State::Idle) {
            let _ = running.stop_tx.send(true);
            let _ = running.handle.await;
            true
        } else {
            false
        }
    }
}
