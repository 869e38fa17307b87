use crate::session::{EndReason, SessionTerminator};
use crate::sources::RefreshInvoker;
use crate::{CredentialPair, CredentialStore};
use std::{
    error, fmt, mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::oneshot;

/// Configuration for a [`RefreshCoordinator`]
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    refresh_timeout: Duration,
}

impl Default for CoordinatorConfig {
    /// Default coordinator configuration
    ///
    /// Gives up on a refresh that has not completed within 30 seconds.
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

impl CoordinatorConfig {
    /// Constructs a new coordinator configuration
    ///
    /// A `refresh_timeout` of [`Duration::ZERO`] lets a refresh run for as
    /// long as the source takes.
    pub fn new(refresh_timeout: Duration) -> Self {
        Self { refresh_timeout }
    }

    /// How long a single refresh may take before every waiter is failed
    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_timeout
    }

    fn limit(&self) -> Option<Duration> {
        Some(self.refresh_timeout).filter(|t| !t.is_zero())
    }
}

/// The reason a refresh did not produce new credentials
///
/// Every caller waiting on the same refresh receives a clone of the same value.
#[derive(Clone, Debug, Error)]
pub enum RefreshFailed {
    /// There was no refresh token to exchange
    #[error("no refresh token is available")]
    NoRefreshToken,
    /// The refresh source did not answer in time
    #[error("token refresh timed out after {0:?}")]
    TimedOut(Duration),
    /// The refresh source returned an error
    #[error("unable to refresh credentials")]
    Invoker(#[source] Arc<dyn error::Error + Send + Sync + 'static>),
    /// The session was ended while the refresh was in flight
    #[error("session ended while refreshing credentials")]
    SessionEnded,
    /// The refresh task stopped before producing a result
    #[error("token refresh was abandoned before completing")]
    Abandoned,
}

type RefreshOutcome = Result<Arc<CredentialPair>, RefreshFailed>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InFlight {
    Absent,
    Pending,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<RefreshOutcome>,
}

struct RefreshState {
    in_flight: InFlight,
    waiters: Vec<Waiter>,
    next_waiter: u64,
}

impl RefreshState {
    fn enqueue(&mut self) -> (u64, oneshot::Receiver<RefreshOutcome>) {
        let id = self.next_waiter;
        self.next_waiter = self.next_waiter.wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        self.waiters.push(Waiter { id, tx });
        (id, rx)
    }
}

struct Inner {
    state: Mutex<RefreshState>,
    invoker: Arc<dyn RefreshInvoker>,
    terminator: SessionTerminator,
    config: CoordinatorConfig,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self) -> &CredentialStore {
        self.terminator.store()
    }

    /// Publishes the outcome of the in-flight refresh to every queued waiter
    ///
    /// The store update, the return to `Absent` and the capture of the queue
    /// happen under one lock, so a caller arriving afterwards starts a new cycle.
    /// If the store was replaced while the refresh was in flight, the
    /// replacement wins over the refresh result.
    fn resolve(&self, snapshot: &Arc<CredentialPair>, outcome: RefreshOutcome) {
        let (outcome, waiters) = {
            let mut state = self.lock();
            let current = self.store().get();
            let outcome = if Arc::ptr_eq(&current, snapshot) {
                outcome
            } else if current.access_token().is_some() {
                tracing::debug!("credentials replaced while refreshing, using replacement");
                Ok(Arc::clone(&current))
            } else {
                Err(RefreshFailed::SessionEnded)
            };

            match &outcome {
                Ok(pair) => {
                    if !Arc::ptr_eq(pair, &current) {
                        self.store().replace(Arc::clone(pair));
                    }
                }
                Err(_) => {
                    self.terminator.terminate(EndReason::RefreshFailed);
                }
            }
            state.in_flight = InFlight::Absent;
            (outcome, mem::take(&mut state.waiters))
        };

        match &outcome {
            Ok(_) => tracing::debug!(waiters = waiters.len(), "refresh succeeded, resuming waiters"),
            Err(error) => tracing::warn!(
                error = (error as &dyn error::Error),
                waiters = waiters.len(),
                "refresh failed, failing waiters"
            ),
        }

        for waiter in waiters {
            // The receiver is gone if the caller was cancelled
            let _ = waiter.tx.send(outcome.clone());
        }
    }

    fn remove_waiter(&self, id: u64) {
        let mut state = self.lock();
        let before = state.waiters.len();
        state.waiters.retain(|w| w.id != id);
        if state.waiters.len() != before {
            tracing::trace!(waiter = id, "cancelled caller left refresh queue");
        }
    }
}

/// Ensures that at most one credential refresh is in flight at a time
///
/// Callers that observe an expired access token call [`refresh()`][Self::refresh()].
/// The first caller starts the refresh; everyone arriving while it is in flight
/// waits for the same result. On success the new credentials are written to the
/// store before any waiter is resumed. On failure every waiter receives the same
/// error and the session is ended exactly once.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Constructs a coordinator with the default configuration
    pub fn new<R>(invoker: R, terminator: SessionTerminator) -> Self
    where
        R: RefreshInvoker + 'static,
    {
        Self::with_config(invoker, terminator, CoordinatorConfig::default())
    }

    /// Constructs a coordinator with a custom configuration
    pub fn with_config<R>(invoker: R, terminator: SessionTerminator, config: CoordinatorConfig) -> Self
    where
        R: RefreshInvoker + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState {
                    in_flight: InFlight::Absent,
                    waiters: Vec::new(),
                    next_waiter: 0,
                }),
                invoker: Arc::new(invoker),
                terminator,
                config,
            }),
        }
    }

    /// The store that successful refreshes are written to
    pub fn store(&self) -> &CredentialStore {
        self.inner.store()
    }

    /// The terminator invoked when a refresh fails
    pub fn terminator(&self) -> &SessionTerminator {
        &self.inner.terminator
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock().in_flight == InFlight::Pending
    }

    /// The number of callers waiting on the in-flight refresh
    pub fn queued(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Obtains fresh credentials, joining the in-flight refresh if there is one
    ///
    /// The returned pair is the one produced by the refresh this call waited
    /// on, even if another refresh has completed since. Dropping the returned
    /// future removes the caller from the queue without affecting other waiters.
    pub async fn refresh(&self) -> Result<Arc<CredentialPair>, RefreshFailed> {
        let (id, rx, pending) = {
            let mut state = self.inner.lock();
            let (id, rx) = state.enqueue();
            let pending = match state.in_flight {
                InFlight::Pending => {
                    tracing::trace!(waiter = id, "refresh already in flight, waiting");
                    None
                }
                InFlight::Absent => {
                    state.in_flight = InFlight::Pending;
                    tracing::debug!(waiter = id, "starting credential refresh");
                    Some(self.inner.store().get())
                }
            };
            (id, rx, pending)
        };

        if let Some(snapshot) = pending {
            tokio::spawn(run_refresh(PendingRefresh {
                inner: Arc::clone(&self.inner),
                snapshot,
                resolved: false,
            }));
        }

        let mut guard = QueuedWaiter {
            inner: &self.inner,
            id,
            done: false,
        };
        let outcome = rx.await;
        guard.done = true;

        outcome.unwrap_or(Err(RefreshFailed::Abandoned))
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RefreshCoordinator")
            .field("in_flight", &state.in_flight)
            .field("queued", &state.waiters.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

struct QueuedWaiter<'a> {
    inner: &'a Inner,
    id: u64,
    done: bool,
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.inner.remove_waiter(self.id);
        }
    }
}

/// Resolves the queue as abandoned if the refresh task is dropped early
struct PendingRefresh {
    inner: Arc<Inner>,
    snapshot: Arc<CredentialPair>,
    resolved: bool,
}

impl PendingRefresh {
    fn resolve(mut self, outcome: RefreshOutcome) {
        self.resolved = true;
        self.inner.resolve(&self.snapshot, outcome);
    }
}

impl Drop for PendingRefresh {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::error!("refresh task stopped without a result");
            self.inner.resolve(&self.snapshot, Err(RefreshFailed::Abandoned));
        }
    }
}

async fn run_refresh(pending: PendingRefresh) {
    let inner = Arc::clone(&pending.inner);
    let snapshot = Arc::clone(&pending.snapshot);

    let outcome = match snapshot.refresh_token() {
        None => Err(RefreshFailed::NoRefreshToken),
        Some(refresh_token) => {
            let exchange = inner.invoker.refresh(refresh_token);
            let result = match inner.config.limit() {
                Some(limit) => tokio::time::timeout(limit, exchange)
                    .await
                    .map_err(|_| RefreshFailed::TimedOut(limit)),
                None => Ok(exchange.await),
            };
            match result {
                Ok(Ok(pair)) => Ok(Arc::new(pair.or_refresh_token(refresh_token))),
                Ok(Err(error)) => Err(RefreshFailed::Invoker(Arc::from(error))),
                Err(timed_out) => Err(timed_out),
            }
        }
    };

    pending.resolve(outcome);
}
