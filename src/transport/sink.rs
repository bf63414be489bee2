use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use super::core::{AsyncExchange, CancelHook, Payload, Settlement, SettlementKind};
use crate::context::ContextSnapshot;
use crate::error::{BridgeError, HandlerError, SettleError};
use crate::ids::RequestId;

/// Bookkeeping for one dispatch that is about to be deferred.
///
/// Owns the transport handle and the request context to restore when the
/// eventual result is delivered. Split it into a [`SuspendHandle`] and the
/// single [`ResumeSink`] once the adapter responsible for settling is known.
pub struct PendingInvocation {
    handle: SuspendHandle,
    context: ContextSnapshot,
}

/// The part of a pending invocation that may suspend the exchange.
#[derive(Clone)]
pub struct SuspendHandle {
    request_id: RequestId,
    handler_name: Arc<str>,
    exchange: Arc<dyn AsyncExchange>,
}

/// Exclusive, single-use capability to settle a pending invocation.
///
/// Every settle operation consumes the sink. A sink dropped without
/// settling resolves the exchange with an "abandoned" error so the
/// transport never hangs on it.
pub struct ResumeSink {
    request_id: RequestId,
    handler_name: Arc<str>,
    exchange: Option<Arc<dyn AsyncExchange>>,
}

impl PendingInvocation {
    #[must_use]
    pub fn new(
        handler_name: Arc<str>,
        exchange: Arc<dyn AsyncExchange>,
        context: ContextSnapshot,
    ) -> Self {
        Self {
            handle: SuspendHandle {
                request_id: exchange.request_id(),
                handler_name,
                exchange,
            },
            context,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.handle.request_id
    }

    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.handle.handler_name
    }

    #[must_use]
    pub fn context(&self) -> &ContextSnapshot {
        &self.context
    }

    /// See [`SuspendHandle::suspend`].
    pub fn suspend(&self) -> Result<(), BridgeError> {
        self.handle.suspend()
    }

    /// See [`SuspendHandle::on_transport_cancel`].
    pub fn on_transport_cancel(&self, hook: CancelHook) {
        self.handle.on_transport_cancel(hook);
    }

    /// Hand the sink to whichever adapter will settle this invocation.
    #[must_use]
    pub fn into_sink(self) -> ResumeSink {
        self.into_parts().1
    }

    #[must_use]
    pub fn into_parts(self) -> (SuspendHandle, ResumeSink, ContextSnapshot) {
        let sink = ResumeSink {
            request_id: self.handle.request_id,
            handler_name: Arc::clone(&self.handle.handler_name),
            exchange: Some(Arc::clone(&self.handle.exchange)),
        };
        (self.handle, sink, self.context)
    }
}

impl SuspendHandle {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Take the exchange off the synchronous path.
    ///
    /// A refusal is fatal for the request: nothing could deliver a later result.
    pub fn suspend(&self) -> Result<(), BridgeError> {
        if self.exchange.suspend() {
            debug!(
                request_id = %self.request_id,
                handler_name = %self.handler_name,
                "Exchange suspended"
            );
            Ok(())
        } else {
            error!(
                request_id = %self.request_id,
                handler_name = %self.handler_name,
                "Failed to suspend exchange - CRITICAL"
            );
            Err(BridgeError::SuspendFailed {
                request_id: self.request_id,
                handler_name: Arc::clone(&self.handler_name),
            })
        }
    }

    /// Run `hook` if the transport cancels the exchange.
    pub fn on_transport_cancel(&self, hook: CancelHook) {
        self.exchange.on_cancel(hook);
    }
}

impl ResumeSink {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn resume_with_value(self, value: Payload) -> Result<(), SettleError> {
        self.settle(Settlement::Value(value))
    }

    pub fn resume_with_error(self, error: HandlerError) -> Result<(), SettleError> {
        self.settle(Settlement::Error(error))
    }

    pub fn cancel(self) -> Result<(), SettleError> {
        self.settle(Settlement::Cancelled)
    }

    pub fn settle(mut self, settlement: Settlement) -> Result<(), SettleError> {
        let Some(exchange) = self.exchange.take() else {
            return Ok(());
        };
        let attempted = settlement.kind();
        let result = exchange.settle(settlement);
        match &result {
            Ok(()) => debug!(
                request_id = %self.request_id,
                handler_name = %self.handler_name,
                settlement = %attempted,
                "Exchange settled"
            ),
            Err(e) => self.report(e),
        }
        result
    }

    /// Whether the exchange behind this sink has been settled by anyone.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.exchange.as_ref().map_or(true, |e| e.is_settled())
    }

    /// Give up the sink without settling and without the drop-time fallback.
    pub fn disarm(mut self) {
        self.exchange = None;
    }

    fn report(&self, err: &SettleError) {
        match err {
            SettleError::AlreadySettled {
                previous: SettlementKind::Cancelled,
                attempted,
            } => debug!(
                request_id = %self.request_id,
                handler_name = %self.handler_name,
                settlement = %attempted,
                "Late result discarded - exchange was cancelled"
            ),
            SettleError::AlreadySettled { .. } => error!(
                request_id = %self.request_id,
                handler_name = %self.handler_name,
                error = %err,
                "Double settlement - CRITICAL"
            ),
            SettleError::NotSuspended { .. } => error!(
                request_id = %self.request_id,
                handler_name = %self.handler_name,
                error = %err,
                "Settlement on unsuspended exchange - CRITICAL"
            ),
        }
    }
}

impl fmt::Debug for ResumeSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeSink")
            .field("request_id", &self.request_id)
            .field("handler_name", &self.handler_name)
            .field("armed", &self.exchange.is_some())
            .finish()
    }
}

impl Drop for ResumeSink {
    fn drop(&mut self) {
        let Some(exchange) = self.exchange.take() else {
            return;
        };
        if exchange
            .settle(Settlement::Error(HandlerError::abandoned()))
            .is_ok()
        {
            error!(
                request_id = %self.request_id,
                handler_name = %self.handler_name,
                "Resume sink dropped unsettled - exchange abandoned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelExchange;
    use serde_json::json;

    fn pending() -> (Arc<ChannelExchange>, crate::transport::ExchangeReceiver, PendingInvocation) {
        let (exchange, rx) = ChannelExchange::open(RequestId::new());
        let as_dyn: Arc<dyn AsyncExchange> = Arc::clone(&exchange) as Arc<dyn AsyncExchange>;
        let pending = PendingInvocation::new(Arc::from("test"), as_dyn, ContextSnapshot::empty());
        (exchange, rx, pending)
    }

    #[test]
    fn test_suspend_then_resume() {
        let (_exchange, rx, pending) = pending();
        pending.suspend().unwrap();
        pending.into_sink().resume_with_value(json!("ok")).unwrap();
        assert_eq!(rx.wait().unwrap(), Settlement::Value(json!("ok")));
    }

    #[test]
    fn test_suspend_failure_is_reported() {
        let (exchange, _rx, pending) = pending();
        assert!(exchange.complete_synchronously());
        assert!(matches!(
            pending.suspend(),
            Err(BridgeError::SuspendFailed { .. })
        ));
    }

    #[test]
    fn test_dropped_sink_abandons() {
        let (_exchange, rx, pending) = pending();
        pending.suspend().unwrap();
        drop(pending.into_sink());
        match rx.wait().unwrap() {
            Settlement::Error(e) => assert_eq!(e, HandlerError::abandoned()),
            other => panic!("unexpected settlement {other:?}"),
        }
    }

    #[test]
    fn test_late_value_after_cancel() {
        let (exchange, rx, pending) = pending();
        pending.suspend().unwrap();
        let sink = pending.into_sink();
        assert!(exchange.expire());
        assert!(sink.is_settled());
        assert!(matches!(
            sink.resume_with_value(json!(1)),
            Err(SettleError::AlreadySettled {
                previous: SettlementKind::Cancelled,
                ..
            })
        ));
        assert_eq!(rx.wait().unwrap(), Settlement::Cancelled);
    }

    #[test]
    fn test_disarmed_sink_leaves_exchange_alone() {
        let (exchange, _rx, pending) = pending();
        pending.suspend().unwrap();
        pending.into_sink().disarm();
        assert!(!exchange.is_settled());
    }
}
