use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::listenable::{ExecutionError, ListenableFuture, SettableFuture};
use super::promise::Promise;
use crate::error::{BridgeError, HandlerError};
use crate::executor::Executor;
use crate::model::CompletionKind;
use crate::transport::{Payload, PendingInvocation};

/// What a plain handler hands back, inspected once per invocation.
pub enum HandlerReturn {
    /// Already computed.
    Ready(Payload),
    /// Already failed.
    Failed(HandlerError),
    /// A settle-once future.
    Promise(Promise<Payload>),
    /// A callback future.
    Listenable(ListenableFuture<Payload>),
}

impl HandlerReturn {
    pub fn from_result(result: Result<Payload, HandlerError>) -> Self {
        match result {
            Ok(value) => HandlerReturn::Ready(value),
            Err(err) => HandlerReturn::Failed(err),
        }
    }

    /// Serialize any value into an immediate return.
    pub fn from_value<T: Serialize>(value: &T) -> Self {
        Self::from_result(to_payload(value))
    }

    pub fn from_promise<T: Serialize + Send + 'static>(promise: Promise<T>) -> Self {
        HandlerReturn::Promise(promise.then(|outcome| outcome.and_then(|v| to_payload(&v))))
    }

    pub fn from_listenable<T>(future: ListenableFuture<T>) -> Self
    where
        T: Serialize + Clone + Send + 'static,
    {
        HandlerReturn::Listenable(future.map_result(|v| to_payload(&v)))
    }

    /// Completion source this return must be adapted through, if any.
    #[must_use]
    pub fn completion_kind(&self) -> Option<CompletionKind> {
        match self {
            HandlerReturn::Ready(_) | HandlerReturn::Failed(_) => None,
            HandlerReturn::Promise(_) => Some(CompletionKind::SettleOnce),
            HandlerReturn::Listenable(_) => Some(CompletionKind::Callback),
        }
    }

    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.completion_kind().is_some()
    }

    /// The outcome if it is already known, otherwise the deferred return.
    pub fn into_immediate(self) -> Result<Result<Payload, HandlerError>, Self> {
        match self {
            HandlerReturn::Ready(value) => Ok(Ok(value)),
            HandlerReturn::Failed(err) => Ok(Err(err)),
            deferred => Err(deferred),
        }
    }
}

/// Serialize a handler result into the transport payload.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Payload, HandlerError> {
    serde_json::to_value(value).map_err(|e| {
        HandlerError::internal("Failed to serialize handler result").with_source(e.into())
    })
}

impl From<Payload> for HandlerReturn {
    fn from(value: Payload) -> Self {
        HandlerReturn::Ready(value)
    }
}

impl From<HandlerError> for HandlerReturn {
    fn from(err: HandlerError) -> Self {
        HandlerReturn::Failed(err)
    }
}

impl From<Result<Payload, HandlerError>> for HandlerReturn {
    fn from(result: Result<Payload, HandlerError>) -> Self {
        Self::from_result(result)
    }
}

impl From<Promise<Payload>> for HandlerReturn {
    fn from(promise: Promise<Payload>) -> Self {
        HandlerReturn::Promise(promise)
    }
}

impl From<ListenableFuture<Payload>> for HandlerReturn {
    fn from(future: ListenableFuture<Payload>) -> Self {
        HandlerReturn::Listenable(future)
    }
}

impl From<SettableFuture<Payload>> for HandlerReturn {
    fn from(future: SettableFuture<Payload>) -> Self {
        HandlerReturn::Listenable(future.into())
    }
}

/// Anything a plain handler may return.
pub trait IntoHandlerReturn {
    fn into_handler_return(self) -> HandlerReturn;
}

impl<T: Into<HandlerReturn>> IntoHandlerReturn for T {
    fn into_handler_return(self) -> HandlerReturn {
        self.into()
    }
}

/// Suspend the exchange and funnel `ret`'s eventual outcome into it.
///
/// The adapter is chosen from the returned value itself, so a handler whose
/// declared type said nothing still gets the right one. Literal values and
/// failures settle immediately. Listeners of callback futures run on
/// `listener_executor`, never on the producer's thread.
pub fn continue_async_dispatch(
    ret: HandlerReturn,
    pending: PendingInvocation,
    listener_executor: &Arc<dyn Executor>,
) -> Result<(), BridgeError> {
    if let Err(err) = pending.suspend() {
        // Nobody can observe the source any more.
        if let HandlerReturn::Listenable(future) = &ret {
            future.cancel();
        }
        return Err(err);
    }
    let (handle, sink, context) = pending.into_parts();

    debug!(
        request_id = %handle.request_id(),
        kind = ?ret.completion_kind(),
        "Continuing dispatch asynchronously"
    );

    match ret {
        HandlerReturn::Ready(value) => {
            if let Err(_already_logged) = sink.resume_with_value(value) {}
        }
        HandlerReturn::Failed(err) => {
            if let Err(_already_logged) = sink.resume_with_error(err) {}
        }
        HandlerReturn::Promise(promise) => {
            promise.when_complete(move |outcome| {
                let _guard = context.enter();
                let settled = match outcome {
                    Ok(value) => sink.resume_with_value(value),
                    Err(err) => sink.resume_with_error(err),
                };
                if let Err(_already_logged) = settled {}
            });
        }
        HandlerReturn::Listenable(future) => {
            let source = future.clone();
            let request_id = handle.request_id();
            handle.on_transport_cancel(Box::new(move || {
                if source.cancel() {
                    debug!(
                        request_id = %request_id,
                        "Source future cancelled after transport cancellation"
                    );
                }
            }));

            let done = future.clone();
            future.add_listener(
                move || {
                    let _guard = context.enter();
                    if done.is_cancelled() {
                        if let Err(_already_logged) = sink.cancel() {}
                        return;
                    }
                    let settled = match done.get() {
                        Ok(value) => sink.resume_with_value(value),
                        Err(ExecutionError::Failed(cause)) => sink.resume_with_error(cause),
                        Err(ExecutionError::Cancelled) => sink.cancel(),
                    };
                    if let Err(_already_logged) = settled {}
                },
                Arc::clone(listener_executor),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSnapshot;
    use crate::executor::DirectExecutor;
    use crate::ids::RequestId;
    use crate::transport::{AsyncExchange, ChannelExchange, Settlement};
    use serde_json::json;

    fn direct() -> Arc<dyn Executor> {
        Arc::new(DirectExecutor)
    }

    #[test]
    fn test_literal_value_resumes_immediately() {
        let (exchange, rx) = ChannelExchange::open(RequestId::new());
        let pending = PendingInvocation::new(
            Arc::from("literal"),
            Arc::clone(&exchange) as Arc<dyn AsyncExchange>,
            ContextSnapshot::empty(),
        );
        continue_async_dispatch(HandlerReturn::Ready(json!(3)), pending, &direct()).unwrap();
        assert_eq!(rx.wait().unwrap(), Settlement::Value(json!(3)));
    }

    #[test]
    fn test_suspend_refused() {
        let (exchange, _rx) = ChannelExchange::open(RequestId::new());
        assert!(exchange.complete_synchronously());
        let pending = PendingInvocation::new(
            Arc::from("late"),
            exchange as Arc<dyn AsyncExchange>,
            ContextSnapshot::empty(),
        );
        let (_completer, promise) = crate::completion::pair::<Payload>();
        assert!(matches!(
            continue_async_dispatch(HandlerReturn::Promise(promise), pending, &direct()),
            Err(BridgeError::SuspendFailed { .. })
        ));
    }

    #[test]
    fn test_typed_conversions() {
        let ret = HandlerReturn::from_promise(Promise::ready(vec![1u8, 2]));
        assert_eq!(ret.completion_kind(), Some(CompletionKind::SettleOnce));
        let HandlerReturn::Promise(p) = ret else {
            panic!("expected promise");
        };
        assert_eq!(futures::executor::block_on(p), Ok(json!([1, 2])));
        assert!(!HandlerReturn::from_value(&"x").is_deferred());
    }
}
