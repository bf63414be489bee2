//! Error types shared by the bridge.
//!
//! - [`HandlerError`]: a handler or its completion source failed. Travels
//!   through the resume channel and becomes an error response.
//! - [`SettleError`]: an attempt to settle an exchange was refused.
//! - [`BridgeError`]: the bridge itself could not carry a request through.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;

use crate::ids::RequestId;
use crate::transport::SettlementKind;

/// Failure produced by a handler or the completion source it returned.
///
/// Cheap to clone so a failed callback future can hand the same error to
/// every listener.
#[derive(Clone, Debug)]
pub struct HandlerError {
    status: StatusCode,
    message: Arc<str>,
    source: Option<Arc<anyhow::Error>>,
}

impl HandlerError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Arc::from(message.into()),
            source: None,
        }
    }

    /// A 500 with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// The producer went away without settling.
    #[must_use]
    pub fn abandoned() -> Self {
        Self::internal("Completion source was abandoned without a result")
    }

    /// A handler (or a poll of its future) panicked.
    #[must_use]
    pub fn panicked(panic_message: &str) -> Self {
        Self::internal(format!("Handler panicked: {panic_message}"))
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Underlying cause, when one was attached.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}")).with_source(err)
    }
}

impl PartialEq for HandlerError {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status && self.message == other.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status.as_u16())
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| &***e as &(dyn std::error::Error + 'static))
    }
}

/// An exchange refused a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleError {
    /// The exchange had already been settled.
    AlreadySettled {
        attempted: SettlementKind,
        previous: SettlementKind,
    },
    /// Settlement was attempted on an exchange that was never suspended.
    NotSuspended { attempted: SettlementKind },
}

impl fmt::Display for SettleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettleError::AlreadySettled {
                attempted,
                previous,
            } => write!(
                f,
                "Cannot settle with {attempted}: exchange already settled with {previous}"
            ),
            SettleError::NotSuspended { attempted } => write!(
                f,
                "Cannot settle with {attempted}: exchange is not suspended"
            ),
        }
    }
}

impl std::error::Error for SettleError {}

/// The bridge could not carry a request to a response.
#[derive(Debug)]
pub enum BridgeError {
    /// `suspend()` was refused where a suspension was required. The pending
    /// computation has no way left to deliver its result.
    SuspendFailed {
        request_id: RequestId,
        handler_name: Arc<str>,
    },
    /// No handler is registered under the name.
    HandlerNotFound { handler_name: String },
    /// The exchange was dropped without ever being settled.
    Abandoned { request_id: RequestId },
    /// The supervisor is shutting down and refuses new work.
    ShuttingDown,
    /// Handlers can no longer be registered once the model is frozen.
    ModelFrozen,
    /// A coroutine could not be spawned.
    Spawn(std::io::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::SuspendFailed {
                request_id,
                handler_name,
            } => write!(
                f,
                "Failed to suspend exchange for handler '{handler_name}' (request {request_id})"
            ),
            BridgeError::HandlerNotFound { handler_name } => {
                write!(f, "No handler registered for '{handler_name}'")
            }
            BridgeError::Abandoned { request_id } => {
                write!(f, "Exchange for request {request_id} was dropped unsettled")
            }
            BridgeError::ShuttingDown => write!(f, "Application is shutting down"),
            BridgeError::ModelFrozen => {
                write!(f, "Handler model is frozen; registration is closed")
            }
            BridgeError::Spawn(e) => write!(f, "Failed to spawn coroutine: {e}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl BridgeError {
    /// Status a transport should answer with when dispatch fails this way.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::HandlerNotFound { .. } => StatusCode::NOT_FOUND,
            BridgeError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Best-effort text of a caught panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
