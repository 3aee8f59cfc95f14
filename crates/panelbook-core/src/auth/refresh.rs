//! Single-flight coordination of access token refreshes.
//!
//! Any number of requests may hit a 401 at the same time. The first caller
//! becomes the leader and runs the refresh; every caller that arrives while
//! it is outstanding is queued and receives the leader's outcome, in the
//! order it arrived. At most one refresh is ever running.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use crate::api::ApiError;

/// Result of a refresh, shared with every waiter: the new access token or
/// the failure that ended the session.
pub type RefreshOutcome = Result<String, ApiError>;

#[derive(Default)]
struct CoordinatorState {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<CoordinatorState>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `refresh` unless a refresh is already in flight, in which case
    /// wait for that one and share its outcome.
    ///
    /// The lock is only held for the check-and-set and for draining the
    /// queue, never across an await.
    pub async fn run<F, Fut>(&self, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let role = {
            let mut state = self.lock();
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                debug!(position = state.waiters.len(), "Refresh in flight, waiting");
                Role::Waiter(rx)
            } else {
                state.in_flight = true;
                Role::Leader
            }
        };

        match role {
            Role::Waiter(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ApiError::RefreshFailed("refresh abandoned".into()))),
            Role::Leader => {
                let mut guard = LeaderGuard {
                    coordinator: self,
                    settled: false,
                };
                let outcome = refresh().await;
                guard.settle(&outcome);
                outcome
            }
        }
    }

    /// Number of callers currently queued behind the in-flight refresh.
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().in_flight
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return to idle and hand the outcome to every waiter, oldest first.
    fn release(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut state = self.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            debug!(count = waiters.len(), ok = outcome.is_ok(), "Releasing refresh waiters");
        }
        for waiter in waiters {
            // A waiter whose request was dropped is simply skipped
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Settles the coordinator even if the leader's future is dropped mid-refresh,
/// so queued waiters never hang.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl LeaderGuard<'_> {
    fn settle(&mut self, outcome: &RefreshOutcome) {
        self.coordinator.release(outcome);
        self.settled = true;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator
                .release(&Err(ApiError::RefreshFailed("refresh abandoned".into())));
        }
    }
}
