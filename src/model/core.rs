use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::rewrite::rewrite;
use crate::types::{builtin, TypeDescriptor, TypeRegistry};

/// The kinds of completion source the bridge knows how to wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionKind {
    /// `Promise<T>`: settles exactly once, observed by a single completion observer.
    SettleOnce,
    /// `ListenableFuture<V>`: observed by listeners fired once it is done.
    Callback,
    /// A coroutine-shaped handler driven by the coroutine bridge.
    Coroutine,
}

impl CompletionKind {
    /// Kinds recognised from a declared return type, in priority order.
    ///
    /// Coroutines are recognised from the handler's shape instead.
    pub const TYPE_SHAPED: [CompletionKind; 2] = [CompletionKind::SettleOnce, CompletionKind::Callback];

    /// Raw class a return type must be assignable to for this kind.
    #[must_use]
    pub fn raw_class(self) -> Option<&'static str> {
        match self {
            CompletionKind::SettleOnce => Some(builtin::PROMISE),
            CompletionKind::Callback => Some(builtin::LISTENABLE_FUTURE),
            CompletionKind::Coroutine => None,
        }
    }

    /// Index of the payload parameter on [`Self::raw_class`].
    #[must_use]
    pub fn payload_index(self) -> usize {
        0
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionKind::SettleOnce => "settle_once",
            CompletionKind::Callback => "callback",
            CompletionKind::Coroutine => "coroutine",
        }
    }
}

impl fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying a handler's return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Synchronous,
    Async {
        kind: CompletionKind,
        /// Payload type behind the wrapper; `Unknown` when it could not be resolved.
        payload: TypeDescriptor,
    },
}

impl Classification {
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self, Classification::Async { .. })
    }
}

/// How a handler is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerShape {
    /// Called directly; returns a value or a completion source.
    #[default]
    Plain,
    /// Returns a future that the coroutine bridge polls.
    Coroutine,
}

/// One registered handler as seen by the model.
///
/// Built unsuspended with `routing_type == declared_return`. Only the model
/// rewriter changes it, and only before the model is frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDescriptor {
    pub(crate) name: Arc<str>,
    pub(crate) declared_return: TypeDescriptor,
    pub(crate) shape: HandlerShape,
    pub(crate) suspended: bool,
    pub(crate) routing_type: TypeDescriptor,
    pub(crate) completion: Option<CompletionKind>,
}

impl HandlerDescriptor {
    #[must_use]
    pub fn new(name: &str, declared_return: TypeDescriptor, shape: HandlerShape) -> Self {
        Self {
            name: Arc::from(name),
            routing_type: declared_return.clone(),
            declared_return,
            shape,
            suspended: false,
            completion: None,
        }
    }

    #[must_use]
    pub fn plain(name: &str, declared_return: TypeDescriptor) -> Self {
        Self::new(name, declared_return, HandlerShape::Plain)
    }

    /// A coroutine handler whose future resolves to `output`.
    #[must_use]
    pub fn coroutine(name: &str, output: TypeDescriptor) -> Self {
        Self::new(name, output, HandlerShape::Coroutine)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    #[must_use]
    pub fn declared_return(&self) -> &TypeDescriptor {
        &self.declared_return
    }

    #[must_use]
    pub fn shape(&self) -> HandlerShape {
        self.shape
    }

    /// Whether dispatch must suspend the exchange for this handler.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Advertised response type (the unwrapped payload once rewritten).
    #[must_use]
    pub fn routing_type(&self) -> &TypeDescriptor {
        &self.routing_type
    }

    #[must_use]
    pub fn completion(&self) -> Option<CompletionKind> {
        self.completion
    }
}

/// Frozen set of handler descriptors served by a dispatcher.
///
/// There are no mutable accessors; rebuild through [`HandlerModelBuilder`].
#[derive(Debug, Clone, Default)]
pub struct HandlerModel {
    handlers: HashMap<Arc<str>, Arc<HandlerDescriptor>>,
}

impl HandlerModel {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<HandlerDescriptor>> {
        self.handlers.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered handler names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|k| k.as_ref()).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<HandlerDescriptor>> {
        self.handlers.values()
    }
}

/// Collects descriptors, then rewrites and freezes them in [`Self::build`].
#[derive(Debug, Default)]
pub struct HandlerModelBuilder {
    handlers: Vec<HandlerDescriptor>,
    index: HashMap<Arc<str>, usize>,
}

impl HandlerModelBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor; a later descriptor with the same name replaces the earlier one.
    pub fn add(&mut self, descriptor: HandlerDescriptor) -> &mut Self {
        if let Some(&pos) = self.index.get(descriptor.name()) {
            warn!(
                handler_name = %descriptor.name,
                "Replaced existing handler descriptor"
            );
            self.handlers[pos] = descriptor;
        } else {
            self.index.insert(descriptor.name_arc(), self.handlers.len());
            self.handlers.push(descriptor);
        }
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Apply the model rewriter to every descriptor and freeze the result.
    #[must_use]
    pub fn build(self, registry: &TypeRegistry) -> HandlerModel {
        let mut handlers = HashMap::with_capacity(self.handlers.len());
        let mut suspended = 0usize;
        for mut descriptor in self.handlers {
            if rewrite(registry, &mut descriptor) {
                suspended += 1;
            }
            handlers.insert(descriptor.name_arc(), Arc::new(descriptor));
        }
        debug!(
            total_handlers = handlers.len(),
            suspended_handlers = suspended,
            "Handler model frozen"
        );
        HandlerModel { handlers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_starts_unsuspended() {
        let d = HandlerDescriptor::plain("get_pet", TypeDescriptor::class("Pet"));
        assert!(!d.is_suspended());
        assert_eq!(d.routing_type(), d.declared_return());
        assert_eq!(d.completion(), None);
    }

    #[test]
    fn test_builder_replaces_duplicates() {
        let registry = TypeRegistry::new();
        let mut builder = HandlerModelBuilder::new();
        builder
            .add(HandlerDescriptor::plain("a", TypeDescriptor::class("String")))
            .add(HandlerDescriptor::plain("b", TypeDescriptor::class("String")))
            .add(HandlerDescriptor::plain("a", TypeDescriptor::class("Integer")));
        assert_eq!(builder.len(), 2);
        let model = builder.build(&registry);
        assert_eq!(model.names(), vec!["a", "b"]);
        assert_eq!(
            model.get("a").map(|d| d.declared_return().clone()),
            Some(TypeDescriptor::class("Integer"))
        );
    }

    #[test]
    fn test_builder_many_handlers_last_wins() {
        let registry = TypeRegistry::new();
        let mut builder = HandlerModelBuilder::new();
        for i in 0..2000 {
            builder.add(HandlerDescriptor::plain(&format!("h{i}"), TypeDescriptor::class("String")));
        }
        for i in (0..2000).step_by(2) {
            builder.add(HandlerDescriptor::plain(&format!("h{i}"), TypeDescriptor::class("Integer")));
        }
        assert_eq!(builder.len(), 2000);

        let model = builder.build(&registry);
        assert_eq!(model.len(), 2000);
        assert_eq!(
            model.get("h10").map(|d| d.declared_return().clone()),
            Some(TypeDescriptor::class("Integer"))
        );
        assert_eq!(
            model.get("h11").map(|d| d.declared_return().clone()),
            Some(TypeDescriptor::class("String"))
        );
    }

    #[test]
    fn test_kind_shapes() {
        assert_eq!(CompletionKind::SettleOnce.raw_class(), Some("Promise"));
        assert_eq!(CompletionKind::Callback.raw_class(), Some("ListenableFuture"));
        assert_eq!(CompletionKind::Coroutine.raw_class(), None);
        assert_eq!(CompletionKind::Callback.to_string(), "callback");
    }
}
