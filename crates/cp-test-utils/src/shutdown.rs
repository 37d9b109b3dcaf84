//! Shutdown coordination.
//!
//! A single `CancellationToken` is the shutdown signal: cancelling it is
//! idempotent and wakes every child token handed to the server, which stops
//! its accept loops and releases its listeners. Nothing here waits for the
//! server to drain.

use crate::errors::HarnessError;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owner of the shutdown signal for one harness instance.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires when the coordinator closes. Hand this to the server.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Signal shutdown. Safe to call any number of times.
    pub fn close(&self) -> Result<(), HarnessError> {
        if !self.token.is_cancelled() {
            info!("Signaling control plane shutdown");
        }
        self.token.cancel();
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

type Release = dyn Fn() -> Result<(), HarnessError> + Send + Sync;

/// Capability to tear down the shared server.
///
/// Every caller of `ensure_running` gets a clone. Closing signals shutdown
/// and resets the harness to "no server running"; closing again, from any
/// clone, is a no-op that still returns `Ok(())`.
#[derive(Clone)]
pub struct Closer {
    coordinator: ShutdownCoordinator,
    release: Arc<Release>,
}

impl Closer {
    pub(crate) fn new(
        coordinator: ShutdownCoordinator,
        release: impl Fn() -> Result<(), HarnessError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            coordinator,
            release: Arc::new(release),
        }
    }

    /// Release the harness slot and signal shutdown.
    ///
    /// The slot is cleared before the signal is observable, so a concurrent
    /// `ensure_running` either gets the live instance or starts a new one.
    pub fn close(&self) -> Result<(), HarnessError> {
        (self.release)()?;
        self.coordinator.close()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.coordinator.is_closed()
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_close_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_closed());

        coordinator.close().unwrap();
        coordinator.close().unwrap();
        assert!(coordinator.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_every_server_token() {
        let coordinator = ShutdownCoordinator::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let token = coordinator.token();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();

        coordinator.close().unwrap();
        for waiter in waiters {
            waiter.await.unwrap();
        }
    }

    #[test]
    fn test_closer_twice_runs_release_each_time_without_error() {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);
        let closer = Closer::new(ShutdownCoordinator::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let clone = closer.clone();
        closer.close().unwrap();
        clone.close().unwrap();

        assert!(closer.is_closed());
        assert!(clone.is_closed());
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closer_releases_before_signaling() {
        let coordinator = ShutdownCoordinator::new();
        let observed = coordinator.clone();
        let closed_during_release = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed_during_release);
        let closer = Closer::new(coordinator, move || {
            if observed.is_closed() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        closer.close().unwrap();

        assert!(closer.is_closed());
        assert_eq!(closed_during_release.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_closer_debug_does_not_expose_release() {
        let closer = Closer::new(ShutdownCoordinator::new(), || Ok(()));
        assert_eq!(format!("{closer:?}"), "Closer { closed: false, .. }");
    }
}
