//! Shared server harness.
//!
//! [`Harness`] owns at most one running server. The first
//! [`Harness::ensure_running`] call builds the test configuration, applies
//! the caller's overrides, starts the server on a dedicated runtime thread,
//! resolves its three endpoints and blocks until the readiness probe
//! passes. Every later call returns the same instance.
//!
//! The server lives on its own runtime so it outlives the per-test runtimes
//! created by `#[tokio::test]`. That runtime shuts down once the
//! [`Closer`] signals shutdown.

use crate::endpoint::Endpoints;
use crate::errors::HarnessError;
use crate::readiness::{Readiness, ReadinessPoller};
use crate::settings::{HarnessSettings, ListenAddrs};
use crate::shutdown::{Closer, ShutdownCoordinator};
use control_plane::Listener;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Time the harness runtime gives serving tasks to wind down after shutdown.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A caller-supplied mutation of the default test configuration.
pub type ConfigOverride<C> = Box<dyn FnOnce(&mut C)>;

/// A server the harness can start, inspect and stop.
pub trait ManagedServer: Sized + Send + Sync + 'static {
    type Config: Clone + fmt::Debug + Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Default test configuration listening on `listen`.
    ///
    /// `work_dir` is a scratch directory owned by the harness for the
    /// lifetime of the server; fixtures such as certificates go there.
    fn test_config(listen: &ListenAddrs, work_dir: &Path) -> Result<Self::Config, Self::Error>;

    /// Construct the server, validating `config`.
    fn new(config: Self::Config) -> Result<Self, Self::Error>;

    /// Bind listeners and start serving. Must return once listeners are
    /// bound, and must stop serving when `shutdown` is cancelled.
    fn start(
        &mut self,
        shutdown: CancellationToken,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Address actually bound by `listener`, once started.
    fn listening_addr(&self, listener: Listener) -> Option<String>;

    fn config(&self) -> &Self::Config;
}

/// Handle to the running server and its published endpoints.
pub struct RunningServer<S> {
    server: Arc<S>,
    endpoints: Arc<Endpoints>,
}

impl<S> Clone for RunningServer<S> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            endpoints: Arc::clone(&self.endpoints),
        }
    }
}

impl<S> fmt::Debug for RunningServer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningServer")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl<S> RunningServer<S> {
    #[must_use]
    pub fn server(&self) -> &Arc<S> {
        &self.server
    }

    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Base URL of the HTTP listener, e.g. `http://localhost:41231`.
    #[must_use]
    pub fn http_url(&self) -> String {
        self.endpoints.http.url()
    }

    /// `host:port` of the plain-text gRPC listener.
    #[must_use]
    pub fn grpc_addr(&self) -> &str {
        self.endpoints.grpc.address()
    }

    /// `host:port` of the TLS gRPC listener.
    #[must_use]
    pub fn secure_grpc_addr(&self) -> &str {
        self.endpoints.secure_grpc.address()
    }

    #[must_use]
    pub fn http_port(&self) -> u16 {
        self.endpoints.http.port()
    }

    #[must_use]
    pub fn grpc_port(&self) -> u16 {
        self.endpoints.grpc.port()
    }

    #[must_use]
    pub fn secure_grpc_port(&self) -> u16 {
        self.endpoints.secure_grpc.port()
    }

    /// Whether both handles refer to the same server instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.server, &other.server)
    }
}

struct HarnessState<S> {
    generation: u64,
    running: RunningServer<S>,
    coordinator: ShutdownCoordinator,
    // Holds the fixtures referenced by the server's config.
    _work_dir: TempDir,
}

impl<S> Drop for HarnessState<S> {
    fn drop(&mut self) {
        // Dropping the harness without closing must still stop the server
        // thread and release its listeners.
        if let Err(e) = self.coordinator.close() {
            error!(generation = self.generation, error = %e, "Failed to signal shutdown on drop");
        }
    }
}

struct Slot<S> {
    state: Option<HarnessState<S>>,
    generation: u64,
}

/// Lock-guarded owner of at most one running server.
///
/// Tests that need isolation create their own `Harness`; suites that want
/// one server per process share a `static` instance.
pub struct Harness<S: ManagedServer> {
    settings: HarnessSettings,
    slot: Arc<Mutex<Slot<S>>>,
}

impl<S: ManagedServer> fmt::Debug for Harness<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("settings", &self.settings)
            .field("running", &self.current().is_some())
            .finish()
    }
}

impl<S: ManagedServer> Harness<S> {
    #[must_use]
    pub fn new(settings: HarnessSettings) -> Self {
        Self {
            settings,
            slot: Arc::new(Mutex::new(Slot {
                state: None,
                generation: 0,
            })),
        }
    }

    /// Harness with settings from the environment.
    pub fn from_env() -> Result<Self, HarnessError> {
        Ok(Self::new(HarnessSettings::from_env()?))
    }

    #[must_use]
    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// The published server, if one is running. Never starts anything.
    #[must_use]
    pub fn current(&self) -> Option<RunningServer<S>> {
        self.lock()
            .state
            .as_ref()
            .map(|state| state.running.clone())
    }

    /// [`Harness::ensure_running_with`] without overrides.
    pub fn ensure_running(&self) -> Result<(RunningServer<S>, Closer), HarnessError> {
        self.ensure_running_with(Vec::new())
    }

    /// Start the shared server if it is not running, and return it.
    ///
    /// Blocks until the server is ready or the readiness budget is spent.
    ///
    /// First caller wins: `overrides` are applied only by the call that
    /// actually starts the server. When a server is already running they
    /// are dropped unapplied and the existing instance is returned, even if
    /// it was configured differently. Concurrent callers wait for the
    /// starting call and then share its result.
    ///
    /// On failure nothing is published, shutdown is signaled for the
    /// partially started server and the error is returned; the next call
    /// starts from scratch.
    pub fn ensure_running_with(
        &self,
        overrides: impl IntoIterator<Item = ConfigOverride<S::Config>>,
    ) -> Result<(RunningServer<S>, Closer), HarnessError> {
        let mut slot = self.lock();

        if let Some(state) = &slot.state {
            if !state.coordinator.is_closed() {
                debug!(http = %state.running.http_url(), "Reusing running control plane");
                return Ok((state.running.clone(), self.closer_for(state)));
            }
            debug!(generation = state.generation, "Discarding closed control plane");
            slot.state = None;
        }

        slot.generation += 1;
        let generation = slot.generation;

        let state = self.setup(generation, overrides).map_err(|e| {
            error!(error = %e, "Failed to start in-process control plane");
            e
        })?;

        let result = (state.running.clone(), self.closer_for(&state));
        slot.state = Some(state);
        Ok(result)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot<S>> {
        // The slot is written only after setup succeeds, so a panic in a
        // caller's override cannot leave it half-initialized.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closer_for(&self, state: &HarnessState<S>) -> Closer {
        let slot: Weak<Mutex<Slot<S>>> = Arc::downgrade(&self.slot);
        let generation = state.generation;

        Closer::new(state.coordinator.clone(), move || {
            let Some(slot) = slot.upgrade() else {
                return Ok(());
            };
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            // A stale closer must not tear down a newer instance. Dropping
            // the state under the lock signals shutdown before any other
            // caller can observe it.
            if slot
                .state
                .as_ref()
                .is_some_and(|state| state.generation == generation)
            {
                slot.state = None;
                info!(generation, "Control plane harness reset");
            }
            Ok(())
        })
    }

    fn setup(
        &self,
        generation: u64,
        overrides: impl IntoIterator<Item = ConfigOverride<S::Config>>,
    ) -> Result<HarnessState<S>, HarnessError> {
        let work_dir = tempfile::Builder::new()
            .prefix("cp-harness-")
            .tempdir()
            .map_err(|e| HarnessError::Configuration(format!("Failed to create work dir: {e}")))?;

        let listen = self.settings.listen_addrs();
        let mut config = S::test_config(&listen, work_dir.path())
            .map_err(|e| HarnessError::Configuration(e.to_string()))?;
        for apply in overrides {
            apply(&mut config);
        }

        let poller = ReadinessPoller::from_settings(&self.settings)?;
        let probe_path = self.settings.probe_path.clone();
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        info!(generation, http = %listen.http, "Starting in-process control plane");

        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name(format!("cp-harness-{generation}"))
            .spawn(move || run_server_thread::<S>(config, token, poller, probe_path, tx))?;

        let outcome = rx.recv().unwrap_or_else(|_| {
            Err(HarnessError::Runtime(std::io::Error::other(
                "harness runtime exited during setup",
            )))
        });

        match outcome {
            Ok((server, endpoints)) => {
                info!(
                    http = %endpoints.http.url(),
                    grpc = %endpoints.grpc.address(),
                    secure_grpc = %endpoints.secure_grpc.address(),
                    "In-process control plane ready"
                );
                Ok(HarnessState {
                    generation,
                    running: RunningServer {
                        server: Arc::new(server),
                        endpoints: Arc::new(endpoints),
                    },
                    coordinator,
                    _work_dir: work_dir,
                })
            }
            Err(e) => {
                coordinator.close()?;
                Err(e)
            }
        }
    }
}

type SetupResult<S> = Result<(S, Endpoints), HarnessError>;

/// Body of the dedicated harness thread: start, report, then keep the
/// runtime alive until shutdown is signaled.
fn run_server_thread<S: ManagedServer>(
    config: S::Config,
    token: CancellationToken,
    poller: ReadinessPoller,
    probe_path: String,
    tx: mpsc::Sender<SetupResult<S>>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("cp-harness-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = tx.send(Err(HarnessError::Runtime(e)));
            return;
        }
    };

    let outcome = runtime.block_on(start_and_wait::<S>(config, token.clone(), &poller, &probe_path));
    let failed = outcome.is_err();
    if tx.send(outcome).is_err() || failed {
        token.cancel();
    }

    runtime.block_on(token.cancelled());
    debug!("Harness runtime stopping");
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
}

async fn start_and_wait<S: ManagedServer>(
    config: S::Config,
    token: CancellationToken,
    poller: &ReadinessPoller,
    probe_path: &str,
) -> SetupResult<S> {
    let mut server = S::new(config).map_err(|e| HarnessError::Configuration(e.to_string()))?;

    server
        .start(token.child_token())
        .await
        .map_err(|e| HarnessError::Start(e.to_string()))?;

    let endpoints = Endpoints::resolve(|listener| server.listening_addr(listener))?;

    let url = format!("{}{probe_path}", endpoints.http.url());
    match poller.wait_until_ready(&url, &token).await {
        Readiness::Ready => Ok((server, endpoints)),
        Readiness::TimedOut => Err(HarnessError::ReadinessTimeout {
            url,
            waited: poller.max_wait(),
        }),
        Readiness::Cancelled => Err(HarnessError::ShutdownSignal(
            "shutdown signaled before the server became ready".to_string(),
        )),
    }
}
