//! Admission control for the browser stage.
//!
//! A fair semaphore bounds how many dynamic extraction tasks run at once and
//! dispatches waiters in submission order. A circuit breaker in front of it
//! rejects new work outright while the browser dependency is failing.

mod breaker;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Why an admitted run did not produce a value.
#[derive(Debug, Error)]
pub enum AdmissionError<E> {
    /// Breaker open; the task was never queued.
    #[error("temporarily unavailable, retry in {}s", retry_after.as_secs().max(1))]
    Unavailable { retry_after: Duration },
    /// The task ran and failed.
    #[error("{0}")]
    Task(E),
    /// The controller was shut down while the task waited.
    #[error("admission controller closed")]
    Closed,
}

/// Snapshot of admission accounting.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStats {
    pub active: usize,
    pub waiting: usize,
    pub max_concurrency: usize,
    pub consecutive_failures: u32,
    pub breaker: BreakerState,
}

/// Decrements a counter when dropped, so every exit path is accounted for.
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct AdmissionController {
    slots: Semaphore,
    max_concurrency: usize,
    breaker: CircuitBreaker,
    active: AtomicUsize,
    waiting: AtomicUsize,
}

impl AdmissionController {
    pub fn new(max_concurrency: usize, breaker: BreakerConfig) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            slots: Semaphore::new(max_concurrency),
            max_concurrency,
            breaker: CircuitBreaker::new(breaker),
            active: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Run `task` once a slot is free.
    ///
    /// Fails immediately with [`AdmissionError::Unavailable`] while the
    /// breaker is open, without touching queue accounting. Every `Err`
    /// returned by the task counts toward the breaker.
    pub async fn run<F, Fut, T, E>(&self, task: F) -> Result<T, AdmissionError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_after) = self.breaker.check() {
            debug!("Admission denied, breaker open for {:?}", retry_after);
            return Err(AdmissionError::Unavailable { retry_after });
        }

        let permit = {
            let _waiting = CountGuard::enter(&self.waiting);
            self.slots
                .acquire()
                .await
                .map_err(|_| AdmissionError::Closed)?
        };

        let result = {
            let _active = CountGuard::enter(&self.active);
            task().await
        };
        drop(permit);

        match result {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(AdmissionError::Task(e))
            }
        }
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            active: self.active.load(Ordering::SeqCst),
            waiting: self.waiting.load(Ordering::SeqCst),
            max_concurrency: self.max_concurrency,
            consecutive_failures: self.breaker.consecutive_failures(),
            breaker: self.breaker.state(),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Reject all queued and future tasks.
    pub fn close(&self) {
        let waiting = self.waiting.load(Ordering::SeqCst);
        if waiting > 0 {
            warn!("Closing admission controller with {} waiting tasks", waiting);
        }
        self.slots.close();
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(3, BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    fn controller(max: usize, threshold: u32, cooldown_ms: u64) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(
            max,
            BreakerConfig {
                threshold,
                cooldown: Duration::from_millis(cooldown_ms),
            },
        ))
    }

    #[tokio::test]
    async fn never_exceeds_max_concurrency() {
        let admission = controller(3, 100, 1_000);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let admission = admission.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                admission
                    .run(|| async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(admission.stats().active, 0);
        assert_eq!(admission.stats().waiting, 0);
    }

    #[tokio::test]
    async fn waiters_dispatch_in_submission_order() {
        let admission = controller(1, 100, 1_000);
        let gate = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let admission = admission.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                admission
                    .run(|| async {
                        gate.notified().await;
                        Ok::<_, String>(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let admission = admission.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                admission
                    .run(|| async {
                        order.lock().unwrap().push(i);
                        Ok::<_, String>(())
                    })
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(admission.stats().waiting, 5);
        gate.notify_one();
        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_running_task() {
        let admission = controller(2, 2, 10_000);
        for _ in 0..2 {
            let result = admission.run(|| async { Err::<(), _>("boom") }).await;
            assert!(matches!(result, Err(AdmissionError::Task("boom"))));
        }

        let invoked = AtomicU32::new(0);
        let result = admission
            .run(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;

        assert!(matches!(result, Err(AdmissionError::Unavailable { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        let stats = admission.stats();
        assert_eq!(stats.breaker, BreakerState::Open);
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn success_after_cooldown_resets_failures() {
        let admission = controller(1, 2, 30);
        for _ in 0..2 {
            let _ = admission.run(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(admission.stats().breaker, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(50)).await;
        admission
            .run(|| async { Ok::<_, String>(()) })
            .await
            .unwrap();

        let stats = admission.stats();
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.breaker, BreakerState::Closed);
    }

    #[tokio::test]
    async fn failure_after_cooldown_reopens() {
        let admission = controller(1, 2, 30);
        for _ in 0..2 {
            let _ = admission.run(|| async { Err::<(), _>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let trial = admission.run(|| async { Err::<(), _>("still down") }).await;
        assert!(matches!(trial, Err(AdmissionError::Task(_))));

        let next = admission.run(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(next, Err(AdmissionError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn straggler_failure_after_cooldown_reopens() {
        let admission = controller(2, 1, 30);
        let gate = Arc::new(Notify::new());

        let straggler = {
            let admission = admission.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                admission
                    .run(|| async {
                        gate.notified().await;
                        Err::<(), _>("late")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(admission.stats().active, 1);

        let _ = admission.run(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(admission.stats().breaker, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_one();
        let late = straggler.await.unwrap();
        assert!(matches!(late, Err(AdmissionError::Task("late"))));

        let next = admission.run(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(next, Err(AdmissionError::Unavailable { .. })));
        assert_eq!(admission.stats().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn closed_controller_rejects_waiters() {
        let admission = controller(1, 5, 1_000);
        admission.close();
        let result = admission.run(|| async { Ok::<_, String>(()) }).await;
        assert!(matches!(result, Err(AdmissionError::Closed)));
        assert_eq!(admission.stats().waiting, 0);
    }
}
