//! Response shaping at the transport boundary.

use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::HandlerError;
use crate::model::{classify, Classification};
use crate::transport::Settlement;
use crate::types::{TypeDescriptor, TypeRegistry};

/// Maximum inline headers before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage; names are shared `Arc<str>`.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// What the transport serializes back to the client.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerResponse {
    /// HTTP-style status code
    pub status: u16,
    #[serde(skip_serializing)]
    pub headers: HeaderVec,
    pub body: Value,
    /// Advertised entity type, with one layer of future wrapping removed
    #[serde(skip_serializing)]
    pub entity_type: TypeDescriptor,
}

impl HandlerResponse {
    /// JSON response with a content-type header.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body,
            entity_type: TypeDescriptor::Unknown,
        }
    }

    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    #[must_use]
    pub fn from_handler_error(err: &HandlerError) -> Self {
        Self::error(err.status().as_u16(), err.message())
    }

    /// 200 with the value, the error's own status, or 503 for a cancellation.
    #[must_use]
    pub fn from_settlement(settlement: Settlement, entity_type: TypeDescriptor) -> Self {
        let mut response = match settlement {
            Settlement::Value(body) => Self::json(StatusCode::OK.as_u16(), body),
            Settlement::Error(err) => Self::from_handler_error(&err),
            Settlement::Cancelled => {
                Self::error(StatusCode::SERVICE_UNAVAILABLE.as_u16(), "Request cancelled")
            }
        };
        response.entity_type = entity_type;
        response
    }

    #[must_use]
    pub fn with_entity_type(mut self, entity_type: TypeDescriptor) -> Self {
        self.entity_type = entity_type;
        self
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header (case-insensitive on the name).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Replace a future-of-`T` entity type by `T`, one layer deep.
///
/// Types that are not future-shaped come back unchanged; a future whose
/// payload cannot be resolved becomes `Unknown`.
#[must_use]
pub fn unwrap_entity_type(registry: &TypeRegistry, declared: &TypeDescriptor) -> TypeDescriptor {
    match classify(registry, declared) {
        Classification::Async { payload, .. } => payload,
        Classification::Synchronous => declared.clone(),
    }
}
