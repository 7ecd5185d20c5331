//! Liveness Watchdog
//!
//! Detects silently dead stream connections: if no tick has arrived within
//! the liveness window, the watchdog reports the connection as stale so the
//! transport forces a reconnect even though the socket reported no error.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Watchdog timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Maximum silence before a connection is considered dead.
    pub window: Duration,
    /// How often the silence is checked.
    pub check_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            check_interval: Duration::from_secs(10),
        }
    }
}

/// Events emitted by the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessEvent {
    /// No tick arrived for longer than the window.
    Stale {
        /// Time since the last tick (or since the connection opened).
        silent_for: Duration,
    },
}

/// Time of the last tick, shared between the reader and the watchdog.
#[derive(Debug)]
pub struct LivenessState {
    last_tick: RwLock<Instant>,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Start the silence clock now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_tick: RwLock::new(Instant::now()),
        }
    }

    /// Record that a tick arrived.
    pub fn record_tick(&self) {
        *self.last_tick.write() = Instant::now();
    }

    /// Time since the last tick.
    #[must_use]
    pub fn silent_for(&self) -> Duration {
        self.last_tick.read().elapsed()
    }
}

/// Periodic check that ticks keep flowing.
pub struct LivenessWatchdog {
    config: LivenessConfig,
    state: Arc<LivenessState>,
    event_tx: mpsc::Sender<LivenessEvent>,
    cancel: CancellationToken,
}

impl LivenessWatchdog {
    /// Create a watchdog.
    #[must_use]
    pub const fn new(
        config: LivenessConfig,
        state: Arc<LivenessState>,
        event_tx: mpsc::Sender<LivenessEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Check until cancelled or until the connection goes stale.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Liveness watchdog cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let silent_for = self.state.silent_for();
                    if silent_for > self.config.window {
                        tracing::warn!(
                            silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX),
                            window_ms = u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX),
                            "No ticks within liveness window"
                        );
                        let _ = self.event_tx.send(LivenessEvent::Stale { silent_for }).await;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_ms: u64, check_ms: u64) -> LivenessConfig {
        LivenessConfig {
            window: Duration::from_millis(window_ms),
            check_interval: Duration::from_millis(check_ms),
        }
    }

    #[test]
    fn record_tick_resets_silence() {
        let state = LivenessState::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(state.silent_for() >= Duration::from_millis(20));
        state.record_tick();
        assert!(state.silent_for() < Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_stale_when_no_ticks() {
        let state = Arc::new(LivenessState::new());
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            LivenessWatchdog::new(config(60_000, 10_000), state, tx, cancel).run(),
        );

        tokio::time::advance(Duration::from_secs(75)).await;
        let event = rx.recv().await;
        assert!(matches!(event, Some(LivenessEvent::Stale { .. })));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ticking_connection_stays_alive() {
        let state = Arc::new(LivenessState::new());
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            LivenessWatchdog::new(config(80, 10), Arc::clone(&state), tx, cancel.clone()).run(),
        );

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            state.record_tick();
        }
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }
}
