//! Dispatcher core module - hot path for request dispatch.
//!
//! Handlers are staged while the dispatcher is open for registration, then
//! [`Dispatcher::freeze`] rewrites them into a [`HandlerModel`] and publishes
//! the route table through an [`ArcSwap`]. Dispatch only ever reads the
//! published table.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{debug, error, info, info_span, warn};

use crate::completion::{
    continue_async_dispatch, to_payload, HandlerReturn, IntoHandlerReturn, ListenableFuture,
    Promise,
};
use crate::context::ContextSnapshot;
use crate::coroutine::{CoroutineBridge, Dispatched, HandlerFuture};
use crate::error::{panic_message, BridgeError, HandlerError};
use crate::executor::{CoroutinePool, Executor};
use crate::ids::RequestId;
use crate::model::{HandlerDescriptor, HandlerModel, HandlerModelBuilder};
use crate::response::HandlerResponse;
use crate::runtime_config::RuntimeConfig;
use crate::supervisor::Supervisor;
use crate::transport::{
    AsyncExchange, ChannelExchange, ExchangeReceiver, Payload, PendingInvocation, Settlement,
};
use crate::types::{Describe, TypeDescriptor, TypeRegistry};

/// Maximum inline request parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage; names are shared `Arc<str>`.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Request data handed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    /// Unique request ID for tracing and correlation
    pub request_id: RequestId,
    /// Name of the handler that should process this request
    pub handler_name: String,
    /// Named parameters extracted by the transport (stack-allocated for ≤8 params)
    pub params: ParamVec,
    /// Request body parsed as JSON (if present)
    pub body: Option<Value>,
}

impl HandlerRequest {
    #[must_use]
    pub fn new(handler_name: &str) -> Self {
        Self {
            request_id: RequestId::new(),
            handler_name: handler_name.to_string(),
            params: ParamVec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.push((Arc::from(name), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Get a parameter by name
    ///
    /// Uses "last write wins" semantics when a name appears more than once.
    #[inline]
    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Convert params to HashMap (for compatibility)
    #[must_use]
    pub fn params_map(&self) -> HashMap<String, String> {
        self.params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

type PlainFn = Arc<dyn Fn(HandlerRequest) -> HandlerReturn + Send + Sync>;
type CoroutineFn = Arc<dyn Fn(HandlerRequest) -> HandlerFuture + Send + Sync>;

enum Invoker {
    Plain(PlainFn),
    Coroutine(CoroutineFn),
}

struct Route {
    descriptor: Arc<HandlerDescriptor>,
    invoker: Invoker,
    /// Entity type advertised on responses
    entity_type: TypeDescriptor,
}

#[derive(Default)]
struct RouteTable {
    model: HandlerModel,
    routes: HashMap<Arc<str>, Route>,
}

#[derive(Default)]
struct Staging {
    builder: HandlerModelBuilder,
    invokers: HashMap<String, Invoker>,
}

/// Reference pipeline: registration, model freezing and dispatch.
pub struct Dispatcher {
    registry: Arc<TypeRegistry>,
    config: RuntimeConfig,
    staging: Mutex<Option<Staging>>,
    routes: ArcSwap<RouteTable>,
    bridge: CoroutineBridge,
    io: Arc<dyn Executor>,
    pools: Vec<Arc<CoroutinePool>>,
    supervisor: Arc<Supervisor>,
}

impl Dispatcher {
    /// Create a dispatcher with its own io and dispatch coroutine pools.
    pub fn new(registry: TypeRegistry, config: RuntimeConfig) -> Result<Self, BridgeError> {
        let io = Arc::new(CoroutinePool::io_from_config(&config)?);
        let dispatch = Arc::new(CoroutinePool::dispatch_from_config(&config)?);
        let io_exec: Arc<dyn Executor> = Arc::clone(&io) as Arc<dyn Executor>;
        let dispatch_exec: Arc<dyn Executor> = Arc::clone(&dispatch) as Arc<dyn Executor>;
        let mut dispatcher = Self::with_executors(registry, config, dispatch_exec, io_exec);
        dispatcher.pools = vec![io, dispatch];
        Ok(dispatcher)
    }

    /// Create a dispatcher on caller-provided executors.
    ///
    /// `dispatch` re-polls woken coroutine handlers; `io` delivers resumes
    /// and runs completion listeners.
    #[must_use]
    pub fn with_executors(
        registry: TypeRegistry,
        config: RuntimeConfig,
        dispatch: Arc<dyn Executor>,
        io: Arc<dyn Executor>,
    ) -> Self {
        info!(
            stack_size = config.stack_size,
            io_workers = config.io_workers,
            dispatch_workers = config.dispatch_workers,
            resume_timeout_ms = ?config.resume_timeout_ms,
            "Dispatcher created"
        );
        Self {
            registry: Arc::new(registry),
            config,
            staging: Mutex::new(Some(Staging::default())),
            routes: ArcSwap::from_pointee(RouteTable::default()),
            bridge: CoroutineBridge::new(dispatch, Arc::clone(&io)),
            io,
            pools: Vec::new(),
            supervisor: Arc::new(Supervisor::new()),
        }
    }

    /// Register a plain handler with an explicit declared return type.
    ///
    /// The handler may return anything convertible into a [`HandlerReturn`];
    /// a completion source it returns is honoured even if `declared_return`
    /// did not announce one.
    pub fn register_handler<F, R>(
        &self,
        name: &str,
        declared_return: TypeDescriptor,
        handler_fn: F,
    ) -> Result<(), BridgeError>
    where
        F: Fn(HandlerRequest) -> R + Send + Sync + 'static,
        R: IntoHandlerReturn,
    {
        let invoker: PlainFn =
            Arc::new(move |req: HandlerRequest| handler_fn(req).into_handler_return());
        self.stage(
            HandlerDescriptor::plain(name, declared_return),
            Invoker::Plain(invoker),
        )
    }

    /// Register a synchronous handler returning a typed value.
    pub fn register_typed<T, F>(&self, name: &str, handler_fn: F) -> Result<(), BridgeError>
    where
        T: Describe + Serialize,
        F: Fn(HandlerRequest) -> Result<T, HandlerError> + Send + Sync + 'static,
    {
        let invoker: PlainFn = Arc::new(move |req: HandlerRequest| {
            HandlerReturn::from_result(handler_fn(req).and_then(|value| to_payload(&value)))
        });
        self.stage(
            HandlerDescriptor::plain(name, T::describe()),
            Invoker::Plain(invoker),
        )
    }

    /// Register a handler returning a settle-once [`Promise`].
    pub fn register_promise<T, F>(&self, name: &str, handler_fn: F) -> Result<(), BridgeError>
    where
        T: Describe + Serialize + Send + 'static,
        F: Fn(HandlerRequest) -> Promise<T> + Send + Sync + 'static,
    {
        let invoker: PlainFn =
            Arc::new(move |req: HandlerRequest| HandlerReturn::from_promise(handler_fn(req)));
        self.stage(
            HandlerDescriptor::plain(name, <Promise<T>>::describe()),
            Invoker::Plain(invoker),
        )
    }

    /// Register a handler returning a callback-style [`ListenableFuture`].
    pub fn register_listenable<T, F>(&self, name: &str, handler_fn: F) -> Result<(), BridgeError>
    where
        T: Describe + Serialize + Clone + Send + 'static,
        F: Fn(HandlerRequest) -> ListenableFuture<T> + Send + Sync + 'static,
    {
        let invoker: PlainFn =
            Arc::new(move |req: HandlerRequest| HandlerReturn::from_listenable(handler_fn(req)));
        self.stage(
            HandlerDescriptor::plain(name, <ListenableFuture<T>>::describe()),
            Invoker::Plain(invoker),
        )
    }

    /// Register a coroutine handler: an async fn resolving to `T`.
    pub fn register_coroutine<T, F, Fut>(
        &self,
        name: &str,
        handler_fn: F,
    ) -> Result<(), BridgeError>
    where
        T: Describe + Serialize + Send + 'static,
        F: Fn(HandlerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
    {
        let invoker: CoroutineFn = Arc::new(move |req: HandlerRequest| -> HandlerFuture {
            let fut = handler_fn(req);
            Box::pin(async move { to_payload(&fut.await?) })
        });
        self.stage(
            HandlerDescriptor::coroutine(name, T::describe()),
            Invoker::Coroutine(invoker),
        )
    }

    fn stage(&self, descriptor: HandlerDescriptor, invoker: Invoker) -> Result<(), BridgeError> {
        let mut staging = self.staging.lock();
        let Some(staging) = staging.as_mut() else {
            warn!(
                handler_name = %descriptor.name(),
                "Registration rejected - handler model is frozen"
            );
            return Err(BridgeError::ModelFrozen);
        };
        let name = descriptor.name().to_string();
        info!(
            handler_name = %name,
            shape = ?descriptor.shape(),
            declared_return = %descriptor.declared_return(),
            "Handler registered successfully"
        );
        staging.builder.add(descriptor);
        staging.invokers.insert(name, invoker);
        Ok(())
    }

    /// Rewrite the staged handlers into the frozen model and publish it.
    ///
    /// Returns the number of handlers published.
    pub fn freeze(&self) -> Result<usize, BridgeError> {
        let Some(Staging {
            builder,
            mut invokers,
        }) = self.staging.lock().take()
        else {
            return Err(BridgeError::ModelFrozen);
        };

        let model = builder.build(&self.registry);
        let mut routes = HashMap::with_capacity(model.len());
        for descriptor in model.iter() {
            let Some(invoker) = invokers.remove(descriptor.name()) else {
                error!(
                    handler_name = %descriptor.name(),
                    "Descriptor without a handler function - CRITICAL"
                );
                continue;
            };
            // Rewriting already unwrapped future-shaped returns one layer.
            let entity_type = descriptor.routing_type().clone();
            routes.insert(
                descriptor.name_arc(),
                Route {
                    descriptor: Arc::clone(descriptor),
                    invoker,
                    entity_type,
                },
            );
        }

        let published = routes.len();
        let suspended = model.iter().filter(|d| d.is_suspended()).count();
        self.routes.store(Arc::new(RouteTable { model, routes }));
        info!(
            total_handlers = published,
            suspended_handlers = suspended,
            "Handler model frozen and published"
        );
        Ok(published)
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.staging.lock().is_none()
    }

    /// Frozen descriptor for `name`, if published.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<Arc<HandlerDescriptor>> {
        self.routes.load().model.get(name).map(Arc::clone)
    }

    /// Published handler names, sorted.
    #[must_use]
    pub fn handler_names(&self) -> Vec<String> {
        self.routes
            .load()
            .model
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[must_use]
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Per-pool counters: (queue depth, dispatched, completed).
    #[must_use]
    pub fn pool_metrics(&self) -> HashMap<String, (usize, u64, u64)> {
        self.pools
            .iter()
            .map(|pool| {
                let m = pool.metrics();
                (
                    pool.name().to_string(),
                    (m.queue_depth(), m.dispatched_count(), m.completed_count()),
                )
            })
            .collect()
    }

    /// Cancel every suspended exchange and refuse further dispatch.
    ///
    /// Returns how many exchanges were cancelled.
    pub fn shutdown(&self) -> usize {
        self.supervisor.shutdown(self.config.shutdown_grace())
    }

    /// Run one request through its handler and wait for the response.
    ///
    /// Blocks the caller until the exchange is settled: directly when the
    /// handler finished without suspending, otherwise when a resume, a
    /// cancellation or the resume timeout settles it.
    pub fn dispatch(&self, req: HandlerRequest) -> Result<HandlerResponse, BridgeError> {
        if self.supervisor.is_shutting_down() {
            warn!(
                request_id = %req.request_id,
                handler_name = %req.handler_name,
                "Dispatch rejected - application is shutting down"
            );
            return Err(BridgeError::ShuttingDown);
        }

        let table = self.routes.load_full();
        let Some(route) = table.routes.get(req.handler_name.as_str()) else {
            error!(
                request_id = %req.request_id,
                handler_name = %req.handler_name,
                registered = table.routes.len(),
                "Handler not found - CRITICAL"
            );
            return Err(BridgeError::HandlerNotFound {
                handler_name: req.handler_name,
            });
        };

        let start = Instant::now();
        let request_id = req.request_id;
        let handler_name = route.descriptor.name_arc();
        let (exchange, receiver) = ChannelExchange::open(request_id);

        debug!(
            request_id = %request_id,
            handler_name = %handler_name,
            suspended = route.descriptor.is_suspended(),
            "Request dispatched to handler"
        );

        let immediate = {
            let scope = ContextSnapshot::capture()
                .with_entry("request_id", request_id.to_string())
                .with_entry("handler", &*handler_name)
                .with_span(info_span!(
                    "dispatch",
                    request_id = %request_id,
                    handler_name = %handler_name
                ));
            let _guard = scope.enter();
            self.invoke(route, req, &exchange)?
        };

        let settlement = match immediate {
            Some(outcome) => {
                exchange.complete_synchronously();
                Settlement::from(outcome)
            }
            None => self.await_settlement(&exchange, &receiver)?,
        };

        let response = HandlerResponse::from_settlement(settlement, route.entity_type.clone());
        info!(
            request_id = %request_id,
            handler_name = %handler_name,
            status = response.status,
            latency_ms = start.elapsed().as_millis() as u64,
            "Handler response ready"
        );
        Ok(response)
    }

    /// Call the handler. `Some` is an outcome available without suspending.
    fn invoke(
        &self,
        route: &Route,
        req: HandlerRequest,
        exchange: &Arc<ChannelExchange>,
    ) -> Result<Option<Result<Payload, HandlerError>>, BridgeError> {
        let handler_name = route.descriptor.name_arc();
        let pending = || {
            PendingInvocation::new(
                Arc::clone(&handler_name),
                Arc::clone(exchange) as Arc<dyn AsyncExchange>,
                ContextSnapshot::capture(),
            )
        };

        match &route.invoker {
            Invoker::Plain(handler_fn) => {
                let ret = match catch_unwind(AssertUnwindSafe(|| handler_fn(req))) {
                    Ok(ret) => ret,
                    Err(panic) => {
                        return Ok(Some(Err(handler_panicked(&handler_name, &*panic))));
                    }
                };
                let ret = if route.descriptor.is_suspended() {
                    ret
                } else {
                    match ret.into_immediate() {
                        Ok(outcome) => return Ok(Some(outcome)),
                        Err(deferred) => {
                            debug!(
                                handler_name = %handler_name,
                                kind = ?deferred.completion_kind(),
                                "Undeclared completion source returned - adapting dynamically"
                            );
                            deferred
                        }
                    }
                };
                continue_async_dispatch(ret, pending(), &self.io)?;
                Ok(None)
            }
            Invoker::Coroutine(handler_fn) => {
                let future = match catch_unwind(AssertUnwindSafe(|| handler_fn(req))) {
                    Ok(future) => future,
                    Err(panic) => {
                        return Ok(Some(Err(handler_panicked(&handler_name, &*panic))));
                    }
                };
                match self.bridge.dispatch(future, pending())? {
                    Dispatched::Completed(outcome) => Ok(Some(outcome)),
                    Dispatched::Suspended => Ok(None),
                }
            }
        }
    }

    fn await_settlement(
        &self,
        exchange: &Arc<ChannelExchange>,
        receiver: &ExchangeReceiver,
    ) -> Result<Settlement, BridgeError> {
        let request_id = receiver.request_id();
        self.supervisor.track(exchange);
        debug!(request_id = %request_id, "Waiting for settlement");
        let settlement = match self.config.resume_timeout() {
            None => receiver.wait(),
            Some(timeout) => match receiver.wait_timeout(timeout) {
                Some(settlement) => Ok(settlement),
                None => {
                    // A producer may still win the race; whichever settlement
                    // took effect is the one on the channel.
                    if exchange.expire() {
                        warn!(
                            request_id = %request_id,
                            timeout_ms = timeout.as_millis() as u64,
                            "Resume timeout elapsed - exchange cancelled"
                        );
                    }
                    receiver.wait()
                }
            },
        };
        self.supervisor.untrack(request_id);
        settlement
    }
}

fn handler_panicked(handler_name: &str, panic: &(dyn std::any::Any + Send)) -> HandlerError {
    let message = panic_message(panic);
    error!(
        handler_name = %handler_name,
        panic_message = %message,
        "Handler panicked - CRITICAL"
    );
    HandlerError::panicked(&message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DirectExecutor;
    use serde_json::json;

    fn direct_dispatcher() -> Dispatcher {
        direct_dispatcher_with(RuntimeConfig::default())
    }

    fn direct_dispatcher_with(config: RuntimeConfig) -> Dispatcher {
        let direct: Arc<dyn Executor> = Arc::new(DirectExecutor);
        Dispatcher::with_executors(TypeRegistry::new(), config, Arc::clone(&direct), direct)
    }

    #[test]
    fn test_get_param_last_wins() {
        let req = HandlerRequest::new("h")
            .with_param("id", "org")
            .with_param("id", "user");
        assert_eq!(req.get_param("id"), Some("user"));
        assert_eq!(req.get_param("missing"), None);
        assert_eq!(req.params_map().len(), 1);
    }

    #[test]
    fn test_typed_fast_path() {
        let d = direct_dispatcher();
        d.register_typed("echo", |req: HandlerRequest| {
            Ok(req.get_param("word").unwrap_or_default().to_string())
        })
        .unwrap();
        assert_eq!(d.freeze().unwrap(), 1);

        let resp = d
            .dispatch(HandlerRequest::new("echo").with_param("word", "hi"))
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, json!("hi"));
        assert_eq!(d.supervisor().in_flight(), 0);
        assert!(!d.descriptor("echo").unwrap().is_suspended());
    }

    #[test]
    fn test_registration_after_freeze() {
        let d = direct_dispatcher();
        d.freeze().unwrap();
        assert!(d.is_frozen());
        let err = d
            .register_typed("late", |_req: HandlerRequest| Ok(1i32))
            .unwrap_err();
        assert!(matches!(err, BridgeError::ModelFrozen));
        assert!(matches!(d.freeze(), Err(BridgeError::ModelFrozen)));
    }

    #[test]
    fn test_unknown_handler() {
        let d = direct_dispatcher();
        d.freeze().unwrap();
        let err = d.dispatch(HandlerRequest::new("nope")).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_panicking_handler_is_500() {
        let d = direct_dispatcher();
        d.register_handler("boom", TypeDescriptor::Unknown, |_req: HandlerRequest| -> Value {
            panic!("kaboom")
        })
        .unwrap();
        d.freeze().unwrap();
        let resp = d.dispatch(HandlerRequest::new("boom")).unwrap();
        assert_eq!(resp.status, 500);
    }

    #[test]
    fn test_promise_already_resolved() {
        let d = direct_dispatcher();
        d.register_promise("ready", |_req: HandlerRequest| Promise::ready(7i64))
            .unwrap();
        d.freeze().unwrap();
        assert!(d.descriptor("ready").unwrap().is_suspended());
        let resp = d.dispatch(HandlerRequest::new("ready")).unwrap();
        assert_eq!(resp.body, json!(7));
        assert_eq!(resp.entity_type.to_string(), "Integer");
    }

    #[test]
    fn test_settled_exchange_holds_no_timeout_references() {
        let d = direct_dispatcher_with(RuntimeConfig {
            resume_timeout_ms: Some(600_000),
            ..RuntimeConfig::default()
        });
        let (exchange, receiver) = ChannelExchange::open(RequestId::new());
        assert!(exchange.suspend());
        exchange.resume_with_value(json!("quick")).unwrap();

        let start = Instant::now();
        let settlement = d.await_settlement(&exchange, &receiver).unwrap();
        assert_eq!(settlement, Settlement::Value(json!("quick")));
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
        // Nothing outlives the request waiting for the timeout to elapse.
        assert_eq!(Arc::strong_count(&exchange), 1);
        assert_eq!(Arc::weak_count(&exchange), 0);
        assert_eq!(d.supervisor().in_flight(), 0);
    }

    #[test]
    fn test_resume_timeout_expires_suspended_exchange() {
        let d = direct_dispatcher_with(RuntimeConfig {
            resume_timeout_ms: Some(20),
            ..RuntimeConfig::default()
        });
        let (exchange, receiver) = ChannelExchange::open(RequestId::new());
        assert!(exchange.suspend());

        let settlement = d.await_settlement(&exchange, &receiver).unwrap();
        assert_eq!(settlement, Settlement::Cancelled);
        assert!(exchange.resume_with_value(json!("too late")).is_err());
        assert_eq!(Arc::weak_count(&exchange), 0);
    }

    #[test]
    fn test_route_entity_type_is_unwrapped_declared_type() {
        let d = direct_dispatcher();
        d.register_handler(
            "wrapped",
            TypeDescriptor::parameterized(
                crate::types::builtin::PROMISE,
                vec![TypeDescriptor::class(crate::types::builtin::STRING)],
            ),
            |_req: HandlerRequest| HandlerReturn::from_promise(Promise::ready("ok".to_string())),
        )
        .unwrap();
        d.register_typed("plain", |_req: HandlerRequest| Ok(3i64)).unwrap();
        d.freeze().unwrap();

        let routes = d.routes.load();
        for name in ["wrapped", "plain"] {
            let route = &routes.routes[name];
            assert_eq!(
                route.entity_type,
                crate::response::unwrap_entity_type(&d.registry, route.descriptor.declared_return())
            );
        }
        assert_eq!(
            routes.routes["wrapped"].entity_type,
            TypeDescriptor::class(crate::types::builtin::STRING)
        );

        let resp = d.dispatch(HandlerRequest::new("wrapped")).unwrap();
        assert_eq!(resp.body, json!("ok"));
        assert_eq!(resp.entity_type.to_string(), "String");
    }
}
