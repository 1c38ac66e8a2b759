//! Single-flight coordination of access-token refreshes.
//!
//! At most one refresh is in flight per client. The first request to see a
//! 401 becomes the leader and performs the refresh; every request that hits
//! a 401 meanwhile parks a continuation and is resumed, in arrival order,
//! with the leader's result.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use super::ApiError;

/// Why a refresh could not produce a new access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// No refresh token was stored.
    Unavailable,
    /// The refresh endpoint failed or could not be reached.
    Rejected(String),
    /// The leader went away before finishing; credentials are untouched.
    Abandoned,
}

impl From<RefreshFailure> for ApiError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Unavailable => ApiError::RefreshUnavailable,
            RefreshFailure::Rejected(reason) => ApiError::RefreshRejected(reason),
            RefreshFailure::Abandoned => ApiError::RefreshAbandoned,
        }
    }
}

pub type RefreshOutcome = Result<String, RefreshFailure>;

#[derive(Default)]
struct FlightState {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<FlightState>,
}

/// Result of [`RefreshCoordinator::acquire_or_wait`].
pub enum Flight<'a> {
    /// Caller owns the refresh and must settle it.
    Leader(FlightGuard<'a>),
    /// A refresh is already running; await its outcome.
    Follower(oneshot::Receiver<RefreshOutcome>),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FlightState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check-and-set under a single lock: either start a flight or join the queue.
    pub fn acquire_or_wait(&self) -> Flight<'_> {
        let mut state = self.lock();
        if state.in_flight {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(waiting = state.waiters.len(), "Refresh in flight, request queued");
            Flight::Follower(rx)
        } else {
            state.in_flight = true;
            Flight::Leader(FlightGuard {
                coordinator: self,
                settled: false,
            })
        }
    }

    /// End the current flight and resume every queued request with `outcome`.
    ///
    /// The flag is cleared and the queue taken in one critical section, so a
    /// request arriving afterwards starts a fresh flight rather than waiting
    /// on one that has already finished.
    fn settle(&self, outcome: RefreshOutcome) -> usize {
        let waiters = {
            let mut state = self.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };

        let drained = waiters.len();
        for waiter in waiters {
            // A dropped receiver means that caller went away; nothing to resume.
            let _ = waiter.send(outcome.clone());
        }
        debug!(drained, success = outcome.is_ok(), "Refresh settled");
        drained
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// Held by the leader for the duration of a refresh.
///
/// Dropping it without settling (the leader's future was cancelled) fails
/// the queued requests instead of leaving them parked forever.
pub struct FlightGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl FlightGuard<'_> {
    pub fn settle(mut self, outcome: RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.settle(outcome)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(Err(RefreshFailure::Abandoned));
        }
    }
}

/// Wait for the leader's outcome.
pub async fn wait(rx: oneshot::Receiver<RefreshOutcome>) -> RefreshOutcome {
    rx.await.unwrap_or(Err(RefreshFailure::Abandoned))
}
