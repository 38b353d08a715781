// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stoppable background passes driven by `tokio::time`.
//!
//! Each [`BackgroundTask`] owns a spawned loop that ticks on an interval and
//! listens on a `watch` shutdown channel. Stopping is explicit via
//! [`BackgroundTask::stop`]; dropping the handle closes the channel, which
//! also ends the loop.
//!
//! Under `#[tokio::test(start_paused = true)]` the ticks follow the paused
//! clock, so tests step through hours of sweeps instantly.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Returned by a tick to keep the task going or end it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    Stop,
}

pub struct BackgroundTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Tick every `period`, first tick one period from now.
    pub fn periodic<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TaskControl> + Send + 'static,
    {
        Self::periodic_after(name, period, period, tick)
    }

    /// Tick first after `start_delay`, then every `period`.
    pub fn periodic_after<F, Fut>(
        name: &'static str,
        start_delay: Duration,
        period: Duration,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TaskControl> + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + start_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, ?start_delay, ?period, "Background task started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if tick().await == TaskControl::Stop {
                            break;
                        }
                    }
                }
            }

            debug!(task = name, "Background task stopped");
        });

        Self { name, shutdown, handle }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<TaskControl> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(TaskControl::Continue)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_follow_paused_clock() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = BackgroundTask::periodic("count", Duration::from_secs(600), counting(&counter));

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1901)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        task.stop().await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_delay() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = BackgroundTask::periodic_after(
            "delayed",
            Duration::from_secs(10),
            Duration::from_secs(5),
            counting(&counter),
        );

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(5_200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_can_end_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let task = BackgroundTask::periodic("twice", Duration::from_secs(1), move || {
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= 2 { TaskControl::Stop } else { TaskControl::Continue }
            }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(task.name(), "twice");
        assert!(task.is_finished());
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = BackgroundTask::periodic("dropped", Duration::from_secs(1), counting(&counter));
        drop(task);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
