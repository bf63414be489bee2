use std::sync::Arc;
use std::task::Poll;

use tracing::debug;

use super::continuation::ExchangeContinuation;
use super::task::{CoroutineTask, HandlerFuture};
use crate::error::{BridgeError, HandlerError};
use crate::executor::Executor;
use crate::transport::{Payload, PendingInvocation};

/// How a coroutine dispatch left the exchange.
#[derive(Debug)]
pub enum Dispatched {
    /// Finished before its first suspension point; `suspend()` was never
    /// called and the exchange is still the caller's to answer.
    Completed(Result<Payload, HandlerError>),
    /// The exchange is suspended; the continuation will settle it.
    Suspended,
}

/// Runs coroutine-shaped handlers against the suspend/resume contract.
#[derive(Clone)]
pub struct CoroutineBridge {
    dispatcher: Arc<dyn Executor>,
    io: Arc<dyn Executor>,
}

impl CoroutineBridge {
    /// `dispatcher` re-polls woken coroutines; `io` delivers resumptions.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Executor>, io: Arc<dyn Executor>) -> Self {
        Self { dispatcher, io }
    }

    /// Launch `future` on the calling thread and settle `pending` from it.
    ///
    /// The context snapshot carried by `pending` is installed around every
    /// poll and around the resume. Exactly one of a direct
    /// [`Dispatched::Completed`] or a later resume happens per call.
    pub fn dispatch(
        &self,
        future: HandlerFuture,
        pending: PendingInvocation,
    ) -> Result<Dispatched, BridgeError> {
        let handler_name: Arc<str> = Arc::from(pending.handler_name());
        let (handle, sink, context) = pending.into_parts();
        let request_id = handle.request_id();
        let continuation = ExchangeContinuation::new(sink, Arc::clone(&self.io));

        let (task, first) = CoroutineTask::launch(
            request_id,
            Arc::clone(&handler_name),
            future,
            context,
            continuation,
            Arc::clone(&self.dispatcher),
        );

        if let Poll::Ready(outcome) = first {
            debug!(
                request_id = %request_id,
                handler_name = %handler_name,
                "Coroutine completed without suspending"
            );
            return Ok(Dispatched::Completed(outcome));
        }

        if let Err(err) = handle.suspend() {
            task.abandon();
            return Err(err);
        }

        let weak = Arc::downgrade(&task);
        handle.on_transport_cancel(Box::new(move || {
            if let Some(task) = weak.upgrade() {
                task.abandon();
            }
        }));

        debug!(
            request_id = %request_id,
            handler_name = %handler_name,
            "Coroutine suspended"
        );
        task.release();
        Ok(Dispatched::Suspended)
    }
}
