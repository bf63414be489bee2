use tracing::info;

use super::classify::classify_handler;
use super::core::{Classification, HandlerDescriptor};
use crate::types::TypeRegistry;

/// Mark an asynchronous handler as suspended and advertise its payload type.
///
/// Returns whether the descriptor changed. Running it again on a rewritten
/// descriptor is a no-op.
pub fn rewrite(registry: &TypeRegistry, handler: &mut HandlerDescriptor) -> bool {
    if handler.suspended {
        return false;
    }
    match classify_handler(registry, handler) {
        Classification::Synchronous => false,
        Classification::Async { kind, payload } => {
            info!(
                handler_name = %handler.name,
                kind = %kind,
                declared_return = %handler.declared_return,
                routing_type = %payload,
                "Marking handler as suspended"
            );
            handler.suspended = true;
            handler.routing_type = payload;
            handler.completion = Some(kind);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CompletionKind;
    use crate::types::{builtin, TypeDescriptor};

    #[test]
    fn test_rewrite_promise_handler() {
        let registry = TypeRegistry::new();
        let mut d = HandlerDescriptor::plain(
            "get_pet",
            TypeDescriptor::parameterized(builtin::PROMISE, vec![TypeDescriptor::class("Pet")]),
        );
        assert!(rewrite(&registry, &mut d));
        assert!(d.is_suspended());
        assert_eq!(d.routing_type(), &TypeDescriptor::class("Pet"));
        assert_eq!(d.completion(), Some(CompletionKind::SettleOnce));
    }

    #[test]
    fn test_rewrite_leaves_synchronous_untouched() {
        let registry = TypeRegistry::new();
        let mut d = HandlerDescriptor::plain("name", TypeDescriptor::class("String"));
        let before = d.clone();
        assert!(!rewrite(&registry, &mut d));
        assert_eq!(d, before);
    }

    #[test]
    fn test_rewrite_twice_is_noop() {
        let registry = TypeRegistry::new();
        let mut d = HandlerDescriptor::plain(
            "watch",
            TypeDescriptor::parameterized(
                builtin::SETTABLE_FUTURE,
                vec![TypeDescriptor::class("Pet")],
            ),
        );
        assert!(rewrite(&registry, &mut d));
        let once = d.clone();
        assert!(!rewrite(&registry, &mut d));
        assert_eq!(d, once);
    }
}
