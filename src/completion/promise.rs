//! Settle-once future: one [`Completer`] writes, one [`Promise`] observes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::HandlerError;

type Observer<T> = Box<dyn FnOnce(Result<T, HandlerError>) + Send + 'static>;

enum State<T> {
    Pending {
        observer: Option<Observer<T>>,
        waker: Option<Waker>,
    },
    /// `None` once the outcome has been handed to its consumer.
    Settled(Option<Result<T, HandlerError>>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

/// Read side of a settle-once future.
///
/// Consumed either by registering a single observer with
/// [`when_complete`](Self::when_complete) or by awaiting it.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

/// Write side of a settle-once future.
///
/// Settling consumes it. Dropping it unsettled fails the promise with an
/// "abandoned" error.
pub struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// Create a connected completer/promise pair.
#[must_use]
pub fn pair<T>() -> (Completer<T>, Promise<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending {
            observer: None,
            waker: None,
        }),
    });
    (
        Completer {
            shared: Some(Arc::clone(&shared)),
        },
        Promise { shared },
    )
}

impl<T: Send + 'static> Promise<T> {
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::settled(Ok(value))
    }

    #[must_use]
    pub fn failed(error: HandlerError) -> Self {
        Self::settled(Err(error))
    }

    fn settled(outcome: Result<T, HandlerError>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Settled(Some(outcome))),
            }),
        }
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Settled(_))
    }

    /// Register the single observer. Runs inline right away when the promise
    /// is already settled, otherwise on the thread that settles it.
    pub fn when_complete<F>(self, observer: F)
    where
        F: FnOnce(Result<T, HandlerError>) + Send + 'static,
    {
        let ready = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Settled(outcome) => outcome.take(),
                State::Pending { observer: slot, .. } => {
                    *slot = Some(Box::new(observer));
                    return;
                }
            }
        };
        observer(ready.unwrap_or_else(|| Err(consumed())));
    }

    /// Transform the eventual outcome.
    #[must_use]
    pub fn then<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T, HandlerError>) -> Result<U, HandlerError> + Send + 'static,
    {
        let (completer, promise) = pair();
        self.when_complete(move |outcome| {
            completer.complete(f(outcome));
        });
        promise
    }

    /// Transform the eventual value; failures pass through.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(|outcome| outcome.map(f))
    }
}

fn consumed() -> HandlerError {
    HandlerError::internal("Promise outcome was already consumed")
}

impl<T> Future for Promise<T> {
    type Output = Result<T, HandlerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Settled(outcome) => {
                Poll::Ready(outcome.take().unwrap_or_else(|| Err(consumed())))
            }
            State::Pending { waker, .. } => {
                match waker {
                    Some(w) if w.will_wake(cx.waker()) => {}
                    _ => *waker = Some(cx.waker().clone()),
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Completer<T> {
    pub fn resolve(self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn reject(self, error: HandlerError) -> bool {
        self.complete(Err(error))
    }

    /// Settle the promise. Returns `false` if it was somehow already settled.
    pub fn complete(mut self, outcome: Result<T, HandlerError>) -> bool {
        self.settle(outcome)
    }

    fn settle(&mut self, outcome: Result<T, HandlerError>) -> bool {
        let Some(shared) = self.shared.take() else {
            return false;
        };
        let mut state = shared.state.lock();
        let (observer, waker) = match &mut *state {
            State::Settled(_) => return false,
            State::Pending { observer, waker } => (observer.take(), waker.take()),
        };
        match observer {
            Some(observer) => {
                *state = State::Settled(None);
                drop(state);
                observer(outcome);
            }
            None => {
                *state = State::Settled(Some(outcome));
                drop(state);
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
        }
        true
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.shared.is_some() {
            self.settle(Err(HandlerError::abandoned()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::mpsc;

    #[test]
    fn test_observer_runs_on_settlement() {
        let (completer, promise) = pair::<u32>();
        let (tx, rx) = mpsc::channel();
        promise.when_complete(move |r| tx.send(r).unwrap());
        assert!(rx.try_recv().is_err());
        assert!(completer.resolve(7));
        assert_eq!(rx.recv().unwrap(), Ok(7));
    }

    #[test]
    fn test_observer_runs_inline_when_ready() {
        let (tx, rx) = mpsc::channel();
        Promise::ready("done").when_complete(move |r| tx.send(r).unwrap());
        assert_eq!(rx.try_recv().unwrap(), Ok("done"));
    }

    #[test]
    fn test_dropped_completer_abandons() {
        let (completer, promise) = pair::<u32>();
        drop(completer);
        assert_eq!(block_on(promise), Err(HandlerError::abandoned()));
    }

    #[test]
    fn test_await_across_threads() {
        let (completer, promise) = pair::<String>();
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            completer.resolve("late".to_string())
        });
        assert_eq!(block_on(promise.map(|s| s.len())), Ok(4));
        assert!(t.join().unwrap());
    }

    #[test]
    fn test_reject_passes_through_map() {
        let (completer, promise) = pair::<u32>();
        let mapped = promise.map(|v| v + 1);
        completer.reject(HandlerError::internal("nope"));
        assert_eq!(block_on(mapped), Err(HandlerError::internal("nope")));
    }
}
