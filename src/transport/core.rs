use std::fmt;

use crate::error::{HandlerError, SettleError};
use crate::ids::RequestId;

/// Value carried back to the transport on success.
pub type Payload = serde_json::Value;

/// Callback run when the transport cancels a suspended exchange.
pub type CancelHook = Box<dyn FnOnce() + Send + 'static>;

/// The terminal outcome of a suspended exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Value(Payload),
    Error(HandlerError),
    Cancelled,
}

impl Settlement {
    #[must_use]
    pub fn kind(&self) -> SettlementKind {
        match self {
            Settlement::Value(_) => SettlementKind::Value,
            Settlement::Error(_) => SettlementKind::Error,
            Settlement::Cancelled => SettlementKind::Cancelled,
        }
    }
}

impl From<Result<Payload, HandlerError>> for Settlement {
    fn from(result: Result<Payload, HandlerError>) -> Self {
        match result {
            Ok(value) => Settlement::Value(value),
            Err(err) => Settlement::Error(err),
        }
    }
}

/// Which of the three settle operations took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementKind {
    Value,
    Error,
    Cancelled,
}

impl fmt::Display for SettlementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SettlementKind::Value => "value",
            SettlementKind::Error => "error",
            SettlementKind::Cancelled => "cancel",
        })
    }
}

/// What a transport must offer for a response to be deferred and settled later.
///
/// After a successful [`suspend`](Self::suspend) the handler's synchronous
/// return is ignored and the response is whatever the first settlement
/// supplies. Every settle operation may be called from any thread; only the
/// first one takes effect, the rest report [`SettleError::AlreadySettled`].
pub trait AsyncExchange: Send + Sync {
    fn request_id(&self) -> RequestId;

    /// Take the exchange off the synchronous path. `false` when it was
    /// already completed or already suspended.
    fn suspend(&self) -> bool;

    /// Settle a suspended exchange.
    fn settle(&self, settlement: Settlement) -> Result<(), SettleError>;

    fn resume_with_value(&self, value: Payload) -> Result<(), SettleError> {
        self.settle(Settlement::Value(value))
    }

    fn resume_with_error(&self, error: HandlerError) -> Result<(), SettleError> {
        self.settle(Settlement::Error(error))
    }

    fn cancel(&self) -> Result<(), SettleError> {
        self.settle(Settlement::Cancelled)
    }

    /// Run `hook` once if the exchange ends cancelled. Runs immediately when
    /// it already has; dropped unrun when it settles any other way.
    fn on_cancel(&self, hook: CancelHook);

    fn is_settled(&self) -> bool;
}
