use tracing::debug;

use super::core::{Classification, CompletionKind, HandlerDescriptor, HandlerShape};
use crate::types::{resolve, ClassId, TypeDescriptor, TypeRegistry};

/// Decide whether a declared return type needs deferred dispatch.
///
/// Kinds are tried in [`CompletionKind::TYPE_SHAPED`] order; the first whose
/// raw class the erasure is assignable to wins. A payload that cannot be
/// resolved becomes [`TypeDescriptor::Unknown`].
#[must_use]
pub fn classify(registry: &TypeRegistry, return_type: &TypeDescriptor) -> Classification {
    let Some(erasure) = return_type.erasure() else {
        return Classification::Synchronous;
    };

    for kind in CompletionKind::TYPE_SHAPED {
        let Some(raw) = kind.raw_class() else {
            continue;
        };
        let target = ClassId::new(raw);
        if !registry.is_assignable(erasure, &target) {
            continue;
        }
        let payload = resolve(registry, return_type, &target, kind.payload_index())
            .unwrap_or_default();
        debug!(
            return_type = %return_type,
            kind = %kind,
            payload = %payload,
            "Return type classified as asynchronous"
        );
        return Classification::Async { kind, payload };
    }

    Classification::Synchronous
}

/// Classify a handler, taking its invocation shape into account.
///
/// Coroutine handlers are always asynchronous and advertise their output type.
#[must_use]
pub fn classify_handler(registry: &TypeRegistry, handler: &HandlerDescriptor) -> Classification {
    match handler.shape() {
        HandlerShape::Coroutine => Classification::Async {
            kind: CompletionKind::Coroutine,
            payload: handler.declared_return().clone(),
        },
        HandlerShape::Plain => classify(registry, handler.declared_return()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::builtin;

    #[test]
    fn test_plain_class_is_synchronous() {
        let registry = TypeRegistry::new();
        assert_eq!(
            classify(&registry, &TypeDescriptor::class("Pet")),
            Classification::Synchronous
        );
        assert_eq!(
            classify(&registry, &TypeDescriptor::Unknown),
            Classification::Synchronous
        );
    }

    #[test]
    fn test_raw_promise_has_unknown_payload() {
        let registry = TypeRegistry::new();
        assert_eq!(
            classify(&registry, &TypeDescriptor::class(builtin::PROMISE)),
            Classification::Async {
                kind: CompletionKind::SettleOnce,
                payload: TypeDescriptor::Unknown,
            }
        );
    }

    #[test]
    fn test_coroutine_shape() {
        let registry = TypeRegistry::new();
        let d = HandlerDescriptor::coroutine("slow", TypeDescriptor::class("Pet"));
        assert_eq!(
            classify_handler(&registry, &d),
            Classification::Async {
                kind: CompletionKind::Coroutine,
                payload: TypeDescriptor::class("Pet"),
            }
        );
    }
}
