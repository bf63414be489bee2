//! Callback future: observed through listeners that fire once it is done,
//! then queried for its value, failure or cancellation.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::HandlerError;
use crate::executor::{DirectExecutor, Executor, Job};

/// Why [`ListenableFuture::get`] produced no value.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// The computation failed; the cause is inside.
    Failed(HandlerError),
    Cancelled,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Failed(cause) => write!(f, "Computation failed: {cause}"),
            ExecutionError::Cancelled => write!(f, "Computation was cancelled"),
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutionError::Failed(cause) => Some(cause),
            ExecutionError::Cancelled => None,
        }
    }
}

enum Outcome<T> {
    Pending,
    Value(T),
    Failed(HandlerError),
    Cancelled,
}

struct State<T> {
    outcome: Outcome<T>,
    listeners: Vec<(Job, Arc<dyn Executor>)>,
    /// Cancels whatever this future was derived from.
    upstream: Option<Job>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

/// Shared view of a callback future.
pub struct ListenableFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ListenableFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A [`ListenableFuture`] that the producer completes by hand.
pub struct SettableFuture<T> {
    future: ListenableFuture<T>,
}

impl<T> Clone for SettableFuture<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
        }
    }
}

impl<T: Send + 'static> ListenableFuture<T> {
    fn pending(upstream: Option<Job>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: Outcome::Pending,
                    listeners: Vec::new(),
                    upstream,
                }),
                done: Condvar::new(),
            }),
        }
    }

    #[must_use]
    pub fn immediate(value: T) -> Self {
        let future = Self::pending(None);
        future.finish(Outcome::Value(value));
        future
    }

    #[must_use]
    pub fn immediate_failed(error: HandlerError) -> Self {
        let future = Self::pending(None);
        future.finish(Outcome::Failed(error));
        future
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(self.inner.state.lock().outcome, Outcome::Pending)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Outcome::Cancelled)
    }

    /// Cancel if not yet done. Returns whether this call cancelled it.
    pub fn cancel(&self) -> bool {
        self.finish(Outcome::Cancelled)
    }

    /// Run `listener` on `executor` once the future is done (right away if it
    /// already is). Listeners run in registration order, once each.
    pub fn add_listener<F>(&self, listener: F, executor: Arc<dyn Executor>)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(listener);
        {
            let mut state = self.inner.state.lock();
            if matches!(state.outcome, Outcome::Pending) {
                state.listeners.push((job, executor));
                return;
            }
        }
        executor.execute(job);
    }

    fn finish(&self, outcome: Outcome<T>) -> bool {
        let cancelled = matches!(outcome, Outcome::Cancelled);
        let (listeners, upstream) = {
            let mut state = self.inner.state.lock();
            if !matches!(state.outcome, Outcome::Pending) {
                return false;
            }
            state.outcome = outcome;
            let upstream = state.upstream.take();
            (std::mem::take(&mut state.listeners), upstream)
        };
        self.inner.done.notify_all();
        if cancelled {
            if let Some(cancel_upstream) = upstream {
                cancel_upstream();
            }
        }
        for (listener, executor) in listeners {
            executor.execute(listener);
        }
        true
    }
}

impl<T: Clone + Send + 'static> ListenableFuture<T> {
    /// Block until done, then return the value or why there is none.
    pub fn get(&self) -> Result<T, ExecutionError> {
        let mut state = self.inner.state.lock();
        while matches!(state.outcome, Outcome::Pending) {
            self.inner.done.wait(&mut state);
        }
        Self::read(&state.outcome).unwrap_or(Err(ExecutionError::Cancelled))
    }

    /// The outcome if already done, without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T, ExecutionError>> {
        Self::read(&self.inner.state.lock().outcome)
    }

    fn read(outcome: &Outcome<T>) -> Option<Result<T, ExecutionError>> {
        match outcome {
            Outcome::Pending => None,
            Outcome::Value(v) => Some(Ok(v.clone())),
            Outcome::Failed(e) => Some(Err(ExecutionError::Failed(e.clone()))),
            Outcome::Cancelled => Some(Err(ExecutionError::Cancelled)),
        }
    }

    /// Derived future holding `f` of this future's outcome.
    ///
    /// Cancelling the derived future cancels this one.
    #[must_use]
    pub fn map_result<U, F>(&self, f: F) -> ListenableFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, HandlerError> + Send + 'static,
    {
        let source = self.clone();
        let cancel_source: Job = Box::new(move || {
            source.cancel();
        });
        let derived = ListenableFuture::pending(Some(cancel_source));
        let target = derived.clone();
        let source = self.clone();
        self.add_listener(
            move || {
                let outcome = match source.try_get() {
                    Some(Ok(v)) => match f(v) {
                        Ok(u) => Outcome::Value(u),
                        Err(e) => Outcome::Failed(e),
                    },
                    Some(Err(ExecutionError::Failed(e))) => Outcome::Failed(e),
                    Some(Err(ExecutionError::Cancelled)) | None => Outcome::Cancelled,
                };
                target.finish(outcome);
            },
            Arc::new(DirectExecutor),
        );
        derived
    }

    #[must_use]
    pub fn map<U, F>(&self, f: F) -> ListenableFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_result(|v| Ok(f(v)))
    }
}

impl<T: Send + 'static> SettableFuture<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            future: ListenableFuture::pending(None),
        }
    }

    /// Complete with a value. Returns `false` if already done.
    pub fn set(&self, value: T) -> bool {
        self.future.finish(Outcome::Value(value))
    }

    pub fn set_failure(&self, error: HandlerError) -> bool {
        self.future.finish(Outcome::Failed(error))
    }

    pub fn cancel(&self) -> bool {
        self.future.cancel()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.future.is_done()
    }

    /// The listenable view handed to consumers.
    #[must_use]
    pub fn future(&self) -> ListenableFuture<T> {
        self.future.clone()
    }
}

impl<T: Send + 'static> Default for SettableFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<SettableFuture<T>> for ListenableFuture<T> {
    fn from(settable: SettableFuture<T>) -> Self {
        settable.future
    }
}
