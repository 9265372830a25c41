use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

struct ActiveLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the one periodic refresh loop for an action type.
///
/// State machine per action: Idle -> Active -> Idle. `ensure_started` is the
/// Idle -> Active transition and a no-op while a live loop exists, so
/// repeated `willAppear` events for the same action share a single ticker.
/// A stale loop (finished or previously cancelled) is always retired and
/// awaited before a new one is spawned.
#[derive(Default)]
pub struct Supervisor {
    inner: tokio::sync::Mutex<Option<ActiveLoop>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the refresh loop if it is not already running. The first tick
    /// fires one full `interval` after start; callers do their own
    /// immediate fetch for newly appeared buttons.
    pub async fn ensure_started<F, Fut>(&self, interval: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut guard = self.inner.lock().await;

        if let Some(active) = guard.as_ref() {
            if !active.handle.is_finished() {
                return;
            }
        }
        // Cancel-then-start: a finished or stale loop is fully retired
        // before its replacement spawns, so two loops never overlap.
        if let Some(stale) = guard.take() {
            stale.token.cancel();
            let _ = stale.handle.await;
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let start = time::Instant::now() + interval;
            let mut ticker = time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = loop_token.cancelled() => break,
                }
            }
        });

        *guard = Some(ActiveLoop { token, handle });
    }

    /// Signal cancellation and wait for the loop to retire. Idempotent when
    /// Idle. After this returns the loop issues no further registry reads.
    pub async fn stop(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(active) = guard.take() {
            active.token.cancel();
            let _ = active.handle.await;
        }
    }

    pub async fn is_active(&self) -> bool {
        let guard = self.inner.lock().await;
        guard
            .as_ref()
            .map(|active| !active.handle.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_tick(counter: Arc<AtomicUsize>) -> impl Fn() -> futures::future::Ready<()> {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_a_full_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let supervisor = Supervisor::new();
        supervisor
            .ensure_started(Duration::from_secs(60), counting_tick(counter.clone()))
            .await;

        time::advance(Duration::from_secs(59)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_start_shares_one_loop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let supervisor = Supervisor::new();

        supervisor
            .ensure_started(Duration::from_secs(60), counting_tick(counter.clone()))
            .await;
        supervisor
            .ensure_started(Duration::from_secs(60), counting_tick(counter.clone()))
            .await;

        time::advance(Duration::from_secs(61)).await;
        // Two loops would have produced two ticks by now.
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_retires_promptly_and_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let supervisor = Supervisor::new();
        supervisor
            .ensure_started(Duration::from_secs(60), counting_tick(counter.clone()))
            .await;
        assert!(supervisor.is_active().await);

        supervisor.stop().await;
        assert!(!supervisor.is_active().await);
        supervisor.stop().await;

        time::advance(Duration::from_secs(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop_spawns_a_fresh_loop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let supervisor = Supervisor::new();

        supervisor
            .ensure_started(Duration::from_secs(10), counting_tick(counter.clone()))
            .await;
        supervisor.stop().await;
        supervisor
            .ensure_started(Duration::from_secs(10), counting_tick(counter.clone()))
            .await;

        time::advance(Duration::from_secs(11)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        supervisor.stop().await;
    }
}
