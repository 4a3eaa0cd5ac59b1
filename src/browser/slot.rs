//! The cached shared session and its launch/relaunch rules.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::BrowserError;

/// Health checks a cached session must answer.
#[async_trait]
pub(crate) trait SessionHealth: Send + Sync {
    /// Cheap local check, no round trip.
    fn is_alive(&self) -> bool;
    /// Round trip to the browser.
    async fn is_valid(&self) -> bool;
}

/// Holds at most one fully launched session.
pub(crate) struct SessionSlot<S> {
    current: StdMutex<Option<Arc<S>>>,
    launch_gate: Mutex<()>,
}

impl<S: SessionHealth> SessionSlot<S> {
    pub(crate) fn new() -> Self {
        Self {
            current: StdMutex::new(None),
            launch_gate: Mutex::new(()),
        }
    }

    pub(crate) fn current(&self) -> Option<Arc<S>> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Forget `session` if it is still the current one.
    fn discard(&self, session: &Arc<S>) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, session)) {
            *current = None;
        }
    }

    /// Return the cached session if it passes the health check, otherwise
    /// run `launch` and cache its result.
    ///
    /// A launch error goes back to this caller only and nothing is cached,
    /// so the next call launches from scratch. Concurrent callers share a
    /// single launch.
    pub(crate) async fn acquire<F, Fut>(&self, launch: F) -> Result<Arc<S>, BrowserError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, BrowserError>>,
    {
        if let Some(session) = self.current() {
            if session.is_valid().await {
                return Ok(session);
            }
            warn!("Browser session failed health probe, relaunching");
            self.discard(&session);
        }

        let _gate = self.launch_gate.lock().await;

        // Another caller may have launched while this one waited on the gate.
        if let Some(session) = self.current() {
            if session.is_alive() {
                return Ok(session);
            }
            self.discard(&session);
        }

        let session = Arc::new(launch().await?);
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Ok(session)
    }

    pub(crate) fn invalidate(&self) {
        if let Some(session) = self.current() {
            info!("Invalidating browser session");
            self.discard(&session);
        }
    }

    pub(crate) fn take(&self) -> Option<Arc<S>> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeSession {
        id: usize,
        healthy: AtomicBool,
    }

    #[async_trait]
    impl SessionHealth for FakeSession {
        fn is_alive(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn is_valid(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct Launcher {
        launches: AtomicUsize,
        fail: AtomicBool,
    }

    impl Launcher {
        async fn launch(&self) -> Result<FakeSession, BrowserError> {
            let id = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(BrowserError::Launch(format!("attempt {} refused", id)));
            }
            Ok(FakeSession {
                id,
                healthy: AtomicBool::new(true),
            })
        }

        fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn healthy_session_is_reused() {
        let slot = SessionSlot::new();
        let launcher = Launcher::default();

        let first = slot.acquire(|| launcher.launch()).await.unwrap();
        let second = slot.acquire(|| launcher.launch()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn invalid_session_is_replaced() {
        let slot = SessionSlot::new();
        let launcher = Launcher::default();

        let first = slot.acquire(|| launcher.launch()).await.unwrap();
        first.healthy.store(false, Ordering::SeqCst);

        let second = slot.acquire(|| launcher.launch()).await.unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(launcher.launches(), 2);
        assert!(Arc::ptr_eq(&slot.current().unwrap(), &second));
    }

    #[tokio::test]
    async fn failed_launch_caches_nothing_and_next_call_retries() {
        let slot: SessionSlot<FakeSession> = SessionSlot::new();
        let launcher = Launcher::default();
        launcher.fail.store(true, Ordering::SeqCst);

        for _ in 0..2 {
            let err = slot.acquire(|| launcher.launch()).await.err().unwrap();
            assert!(matches!(err, BrowserError::Launch(_)));
            assert!(slot.current().is_none());
        }
        assert_eq!(launcher.launches(), 2);

        launcher.fail.store(false, Ordering::SeqCst);
        let session = slot.acquire(|| launcher.launch()).await.unwrap();
        assert_eq!(session.id, 3);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_launch() {
        let slot = Arc::new(SessionSlot::new());
        let launcher = Arc::new(Launcher::default());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let slot = slot.clone();
            let launcher = launcher.clone();
            handles.push(tokio::spawn(async move {
                slot.acquire(|| launcher.launch()).await.map(|s| s.id)
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_relaunch() {
        let slot = SessionSlot::new();
        let launcher = Launcher::default();

        slot.acquire(|| launcher.launch()).await.unwrap();
        slot.invalidate();
        assert!(slot.current().is_none());

        let session = slot.acquire(|| launcher.launch()).await.unwrap();
        assert_eq!(session.id, 2);
        assert!(slot.take().is_some());
        assert!(slot.current().is_none());
    }
}
