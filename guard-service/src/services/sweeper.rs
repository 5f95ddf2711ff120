//! Background task that periodically purges expired tokens.

use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::CsrfTokenStore;

/// Handle to the running sweep loop.
///
/// Dropping the handle cancels the loop; [`TokenSweeper::stop`] also waits for it to exit.
pub struct TokenSweeper {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TokenSweeper {
    /// Spawn the sweep loop on the current runtime. The first sweep runs one
    /// `every` after start.
    pub fn start(store: CsrfTokenStore, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval_secs = every.as_secs(), "CSRF token sweeper started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep(store.now());
                        tracing::debug!(
                            removed,
                            remaining = store.len(),
                            "Swept expired CSRF tokens"
                        );
                    }
                }
            }
            tracing::info!("CSRF token sweeper stopped");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "CSRF token sweeper task failed");
            }
        }
    }
}

impl Drop for TokenSweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use std::sync::Arc;

    const EVERY: Duration = Duration::from_secs(15 * 60);

    fn store() -> (CsrfTokenStore, ManualClock) {
        let clock = ManualClock::default();
        let store =
            CsrfTokenStore::with_clock(chrono::Duration::hours(1), Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_expired_tokens_on_tick() {
        let (store, clock) = store();
        store.issue("stale");
        clock.advance(chrono::Duration::minutes(61));
        let live = store.issue("live");

        let sweeper = TokenSweeper::start(store.clone(), EVERY);

        tokio::time::sleep(EVERY / 2).await;
        assert_eq!(store.len(), 2, "no sweep before the first interval");

        tokio::time::sleep(EVERY).await;
        assert_eq!(store.len(), 1);
        assert!(store.validate(&live, "live"));

        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_running_across_ticks() {
        let (store, clock) = store();
        let sweeper = TokenSweeper::start(store.clone(), EVERY);

        for _ in 0..3 {
            store.issue("u1");
            clock.advance(chrono::Duration::hours(2));
            tokio::time::sleep(EVERY + Duration::from_secs(1)).await;
            assert!(store.is_empty());
        }

        assert!(sweeper.is_running());
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_sweeper_no_longer_sweeps() {
        let (store, clock) = store();
        let sweeper = TokenSweeper::start(store.clone(), EVERY);
        sweeper.stop().await;

        store.issue("u1");
        clock.advance(chrono::Duration::hours(2));
        tokio::time::sleep(EVERY * 2).await;

        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels_loop() {
        let (store, clock) = store();
        drop(TokenSweeper::start(store.clone(), EVERY));

        store.issue("u1");
        clock.advance(chrono::Duration::hours(2));
        tokio::time::sleep(EVERY * 2).await;

        assert_eq!(store.len(), 1);
    }
}
