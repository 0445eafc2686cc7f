// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Idle debouncing for child sessions.
//!
//! A child is only "stably idle" once it has been quiet for the full
//! debounce period. The debouncer keeps at most one armed timer per child:
//! `busy` cancels it, `idle` re-arms it, and when the timer survives the
//! whole period it fires the supervisor's stable-idle callback.
//!
//! The fire callback runs in its own task, so a cancellation that loses the
//! race against an expiring timer can only stop the timer bookkeeping, never
//! interrupt a delivery already in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// Per-child debounce timers. The only state is the map from child ID to
/// the armed timer handle.
pub struct IdleDebouncer {
    delay: Duration,
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl IdleDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel any armed timer for `child_id`.
    pub async fn cancel(&self, child_id: &str) {
        if let Some(handle) = self.timers.lock().await.remove(child_id) {
            debug!("debounce cancelled for {}", child_id);
            handle.abort();
        }
    }

    /// Arm (or re-arm) the timer for `child_id`; `fire` runs after the
    /// debounce period unless a cancel arrives first.
    pub async fn arm<F, Fut>(&self, child_id: &str, fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.timers.lock().await;
        if let Some(previous) = timers.remove(child_id) {
            previous.abort();
        }

        let delay = self.delay;
        let id = child_id.to_string();
        let map = Arc::clone(&self.timers);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            map.lock().await.remove(&id);
            tokio::spawn(fire());
        });

        debug!("debounce armed for {} ({:?})", child_id, delay);
        timers.insert(child_id.to_string(), handle);
    }

    /// Whether a timer is currently armed for `child_id`.
    pub async fn is_armed(&self, child_id: &str) -> bool {
        self.timers.lock().await.contains_key(child_id)
    }

    /// Cancel every armed timer.
    pub async fn cancel_all(&self) {
        let mut timers = self.timers.lock().await;
        for (child_id, handle) in timers.drain() {
            debug!("debounce cancelled for {} (shutdown)", child_id);
            handle.abort();
        }
    }
}

impl Drop for IdleDebouncer {
    fn drop(&mut self) {
        // Abort without awaiting; timers hold only an Arc to the map.
        if let Ok(mut timers) = self.timers.try_lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn arm_counting(debouncer: &IdleDebouncer, child_id: &str, counter: &Arc<AtomicUsize>) {
        let counter = Arc::clone(counter);
        debouncer
            .arm(child_id, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let debouncer = IdleDebouncer::new(Duration::from_millis(5000));
        let fired = Arc::new(AtomicUsize::new(0));

        arm_counting(&debouncer, "c1", &fired).await;
        assert!(debouncer.is_armed("c1").await);

        sleep(Duration::from_millis(4900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_armed("c1").await);

        // No further fires without a re-arm.
        sleep(Duration::from_millis(10_000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_preempts_fire() {
        let debouncer = IdleDebouncer::new(Duration::from_millis(5000));
        let fired = Arc::new(AtomicUsize::new(0));

        arm_counting(&debouncer, "c1", &fired).await;
        sleep(Duration::from_millis(1000)).await;
        debouncer.cancel("c1").await;

        sleep(Duration::from_millis(10_000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!debouncer.is_armed("c1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_resets_the_clock() {
        let debouncer = IdleDebouncer::new(Duration::from_millis(5000));
        let fired = Arc::new(AtomicUsize::new(0));

        arm_counting(&debouncer, "c1", &fired).await;
        sleep(Duration::from_millis(4000)).await;

        // Re-arm 4 s in: the original deadline passes without a fire.
        arm_counting(&debouncer, "c1", &fired).await;
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(3200)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_are_independent_per_child() {
        let debouncer = IdleDebouncer::new(Duration::from_millis(5000));
        let fired_a = Arc::new(AtomicUsize::new(0));
        let fired_b = Arc::new(AtomicUsize::new(0));

        arm_counting(&debouncer, "a", &fired_a).await;
        arm_counting(&debouncer, "b", &fired_b).await;
        debouncer.cancel("a").await;

        sleep(Duration::from_millis(6000)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired_a.load(Ordering::SeqCst), 0);
        assert_eq!(fired_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let debouncer = IdleDebouncer::new(Duration::from_millis(5000));
        let fired = Arc::new(AtomicUsize::new(0));

        arm_counting(&debouncer, "a", &fired).await;
        arm_counting(&debouncer, "b", &fired).await;
        debouncer.cancel_all().await;

        sleep(Duration::from_millis(10_000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
