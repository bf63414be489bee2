use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use tracing::{debug, error};

use super::continuation::ExchangeContinuation;
use crate::context::ContextSnapshot;
use crate::error::{panic_message, HandlerError};
use crate::executor::Executor;
use crate::ids::RequestId;
use crate::transport::Payload;

/// Future returned by a coroutine-shaped handler.
pub type HandlerFuture = BoxFuture<'static, Result<Payload, HandlerError>>;

// Not polled, no wake pending.
const IDLE: u8 = 0;
// Queued on the dispatcher.
const SCHEDULED: u8 = 1;
// Being polled, or launched and waiting for `release`.
const RUNNING: u8 = 2;
// Woken while RUNNING; re-queue when the poll (or launch) ends.
const NOTIFIED: u8 = 3;
// Finished or abandoned.
const COMPLETE: u8 = 4;

struct Slot {
    future: Option<HandlerFuture>,
    context: ContextSnapshot,
    continuation: Option<ExchangeContinuation>,
}

/// One coroutine handler invocation being driven to completion.
///
/// The first poll happens on the launching thread. Later polls are queued on
/// the dispatcher executor by the task's waker. Wake-ups that arrive before
/// [`release`](Self::release) are held back, so nothing can resume the
/// exchange before it has been suspended.
pub(crate) struct CoroutineTask {
    request_id: RequestId,
    handler_name: Arc<str>,
    state: AtomicU8,
    slot: Mutex<Slot>,
    dispatcher: Arc<dyn Executor>,
}

impl CoroutineTask {
    /// Create the task and poll it once on the calling thread.
    ///
    /// On `Ready` the continuation is discarded unused and the task is done.
    pub(crate) fn launch(
        request_id: RequestId,
        handler_name: Arc<str>,
        future: HandlerFuture,
        context: ContextSnapshot,
        continuation: ExchangeContinuation,
        dispatcher: Arc<dyn Executor>,
    ) -> (Arc<Self>, Poll<Result<Payload, HandlerError>>) {
        let task = Arc::new(Self {
            request_id,
            handler_name,
            state: AtomicU8::new(RUNNING),
            slot: Mutex::new(Slot {
                future: Some(future),
                context,
                continuation: Some(continuation),
            }),
            dispatcher,
        });

        let first = {
            let mut slot = task.slot.lock();
            let poll = task.poll_once(&mut slot);
            if poll.is_ready() {
                task.state.store(COMPLETE, Ordering::Release);
                if let Some(continuation) = slot.continuation.take() {
                    continuation.discard();
                }
            }
            poll
        };
        (task, first)
    }

    /// Allow deferred and future wake-ups to schedule re-polls.
    pub(crate) fn release(self: &Arc<Self>) {
        match self
            .state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(NOTIFIED) => self.requeue(),
            Err(_) => {}
        }
    }

    /// Drop the computation without resuming the exchange.
    pub(crate) fn abandon(&self) {
        let previous = self.state.swap(COMPLETE, Ordering::AcqRel);
        if previous == COMPLETE {
            return;
        }
        debug!(
            request_id = %self.request_id,
            handler_name = %self.handler_name,
            "Coroutine abandoned"
        );
        // When a poll holds the slot, `run` clears it once the poll returns.
        if let Some(mut slot) = self.slot.try_lock() {
            let future = slot.future.take();
            let continuation = slot.continuation.take();
            drop(slot);
            drop(future);
            if let Some(continuation) = continuation {
                continuation.discard();
            }
        }
    }

    #[must_use]
    pub(crate) fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETE
    }

    fn requeue(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(NOTIFIED, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.schedule();
        }
    }

    fn schedule(self: &Arc<Self>) {
        let task = Arc::clone(self);
        self.dispatcher.execute(Box::new(move || task.run()));
    }

    fn run(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if self.is_complete() {
                self.clear();
            }
            return;
        }

        let mut slot = self.slot.lock();
        match self.poll_once(&mut slot) {
            Poll::Ready(outcome) => {
                self.state.store(COMPLETE, Ordering::Release);
                let continuation = slot.continuation.take();
                let context = slot.context.clone();
                drop(slot);
                match continuation {
                    Some(continuation) => continuation.resume_with(outcome, context),
                    None => debug!(
                        request_id = %self.request_id,
                        handler_name = %self.handler_name,
                        "Coroutine finished after abandonment - result discarded"
                    ),
                }
            }
            Poll::Pending => {
                drop(slot);
                match self
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => {}
                    Err(NOTIFIED) => self.requeue(),
                    Err(_) => self.clear(),
                }
            }
        }
    }

    fn clear(&self) {
        let (future, continuation) = {
            let mut slot = self.slot.lock();
            (slot.future.take(), slot.continuation.take())
        };
        drop(future);
        if let Some(continuation) = continuation {
            continuation.discard();
        }
    }

    fn poll_once(self: &Arc<Self>, slot: &mut Slot) -> Poll<Result<Payload, HandlerError>> {
        let Some(future) = slot.future.as_mut() else {
            return Poll::Ready(Err(HandlerError::abandoned()));
        };
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        let polled = slot
            .context
            .scope(|| catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))));

        let poll = match polled {
            Ok(poll) => poll,
            Err(panic) => {
                let panic_message = panic_message(panic.as_ref());
                error!(
                    request_id = %self.request_id,
                    handler_name = %self.handler_name,
                    panic_message = %panic_message,
                    "Coroutine handler panicked - CRITICAL"
                );
                Poll::Ready(Err(HandlerError::panicked(&panic_message)))
            }
        };
        if poll.is_ready() {
            slot.future = None;
        }
        poll
    }
}

impl ArcWake for CoroutineTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        loop {
            match arc_self.state.load(Ordering::Acquire) {
                IDLE => {
                    if arc_self
                        .state
                        .compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        arc_self.schedule();
                        return;
                    }
                }
                RUNNING => {
                    if arc_self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => return,
            }
        }
    }
}
