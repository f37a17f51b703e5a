//! In-flight query state and the caller-facing future.
//!
//! The pending-query table owned by each generated query surface is the
//! sole owner of in-flight request state. Each entry pairs a completion
//! slot (shared with the caller's [`QueryFuture`]) with the timeout
//! task's join handle, which doubles as the cancellation token: settling
//! the entry aborts the timer, and the timer firing removes the entry so
//! a late response for the missing id is silently ignored.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::error::QueryError;
use crate::value::Value;

/// What to do when a query's deadline elapses unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutBehavior {
    /// Reject the call with [`QueryError::Timeout`].
    #[default]
    Reject,
    /// Resolve the call with `Null`.
    Resolve,
    /// Drop the pending entry; the future never settles and disposing of
    /// it is the caller's responsibility.
    Discard,
}

/// Per-call query settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Deadline for the response; no deadline when absent.
    pub timeout: Option<Duration>,
    /// Disposition when the deadline elapses.
    pub on_timeout: TimeoutBehavior,
}

impl QueryOptions {
    /// Options with a deadline and the default `Reject` disposition.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            on_timeout: TimeoutBehavior::default(),
        }
    }

    /// Replace the timeout disposition.
    pub fn on_timeout(mut self, behavior: TimeoutBehavior) -> Self {
        self.on_timeout = behavior;
        self
    }
}

/// Completion slot shared between a pending-table entry and its future.
#[derive(Default)]
pub(crate) struct QuerySlot {
    outcome: Option<Result<Value, QueryError>>,
    waker: Option<Waker>,
}

/// One in-flight query.
pub(crate) struct InFlight {
    pub(crate) slot: Rc<RefCell<QuerySlot>>,
    pub(crate) started: Instant,
    pub(crate) timeout_task: Option<JoinHandle<()>>,
}

impl InFlight {
    /// Settle the entry: cancel the timer, store the outcome and wake the
    /// caller.
    pub(crate) fn complete(self, outcome: Result<Value, QueryError>) {
        if let Some(task) = self.timeout_task {
            task.abort();
        }
        tracing::debug!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "query settled"
        );
        let mut slot = self.slot.borrow_mut();
        slot.outcome = Some(outcome);
        if let Some(waker) = slot.waker.take() {
            waker.wake();
        }
    }
}

/// Correlation id → in-flight entry, owned by one generated query.
pub(crate) type PendingTable = Rc<RefCell<HashMap<String, InFlight>>>;

/// Future resolving with the query's response payload, or with a
/// [`QueryError`] on rejection or timeout.
pub struct QueryFuture {
    slot: Rc<RefCell<QuerySlot>>,
}

impl QueryFuture {
    pub(crate) fn new(slot: Rc<RefCell<QuerySlot>>) -> Self {
        Self { slot }
    }
}

impl Future for QueryFuture {
    type Output = Result<Value, QueryError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        if let Some(outcome) = slot.outcome.take() {
            return Poll::Ready(outcome);
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
