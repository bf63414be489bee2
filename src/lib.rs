//! # resumable
//!
//! **resumable** lets a request pipeline that expects a handler to answer
//! immediately serve handlers that answer *later*: a settle-once
//! [`Promise`], a callback-style [`ListenableFuture`], or a coroutine-shaped
//! `async` handler running on the `may` runtime.
//!
//! ## Overview
//!
//! At startup every handler's declared return type is classified. Handlers
//! returning a future-of-`T` are marked *suspended* and routed as if they
//! returned `T`. At request time the exchange is suspended, the handler's
//! completion source is bridged onto it, and the eventual value, error or
//! cancellation settles the exchange exactly once.
//!
//! ## Architecture
//!
//! - **[`types`]** - Class table and generic type resolver
//! - **[`model`]** - Return-type classification and model rewriting
//! - **[`transport`]** - The suspend/resume contract and a channel-backed exchange
//! - **[`completion`]** - Completion sources and the adapters that bridge them
//! - **[`coroutine`]** - The coroutine dispatch bridge
//! - **[`context`]** - Per-request diagnostic context propagated across threads
//! - **[`executor`]** - Inline and `may` coroutine pool executors
//! - **[`dispatcher`]** - Reference pipeline tying it all together
//! - **[`supervisor`]** - Tracks suspended exchanges, cancels them on shutdown
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Caller
//!     participant Dispatcher
//!     participant Handler
//!     participant Exchange as ChannelExchange
//!     participant Worker as Producer thread
//!
//!     Caller->>Dispatcher: dispatch(request)
//!     Dispatcher->>Handler: invoke (inside request context)
//!     alt value available now
//!         Handler-->>Dispatcher: Ready(value)
//!         Dispatcher-->>Caller: 200 (fast path, no suspend)
//!     else completion source
//!         Handler-->>Dispatcher: Promise / ListenableFuture / Pending
//!         Dispatcher->>Exchange: suspend()
//!         Dispatcher->>Exchange: wait for settlement
//!         Worker->>Exchange: resume_with_value / error / cancel
//!         Exchange-->>Dispatcher: Settlement
//!         Dispatcher-->>Caller: 200 / error status / 503
//!     end
//! ```
//!
//! ## Example
//!
//! ```rust
//! use resumable::dispatcher::{Dispatcher, HandlerRequest};
//! use resumable::{RuntimeConfig, TypeRegistry};
//!
//! let dispatcher = Dispatcher::new(TypeRegistry::new(), RuntimeConfig::default()).unwrap();
//! dispatcher
//!     .register_coroutine("greet", |req: HandlerRequest| async move {
//!         Ok(format!("hello {}", req.get_param("name").unwrap_or("world")))
//!     })
//!     .unwrap();
//! dispatcher.freeze().unwrap();
//!
//! let resp = dispatcher.dispatch(HandlerRequest::new("greet")).unwrap();
//! assert_eq!(resp.body, serde_json::json!("hello world"));
//! ```
//!
//! ## Configuration
//!
//! Runtime settings come from [`RuntimeConfig`] (YAML plus `RESUMABLE_*`
//! environment overrides); logging from [`logging::LogConfig`].

pub mod completion;
pub mod context;
pub mod coroutine;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod ids;
pub mod logging;
pub mod model;
pub mod response;
pub mod runtime_config;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use completion::{pair, Completer, HandlerReturn, ListenableFuture, Promise, SettableFuture};
pub use context::ContextSnapshot;
pub use coroutine::{CoroutineBridge, Dispatched, HandlerFuture};
pub use dispatcher::{Dispatcher, HandlerRequest};
pub use error::{BridgeError, HandlerError, SettleError};
pub use ids::RequestId;
pub use model::{HandlerDescriptor, HandlerModel};
pub use response::HandlerResponse;
pub use runtime_config::RuntimeConfig;
pub use supervisor::Supervisor;
pub use transport::{AsyncExchange, ChannelExchange, PendingInvocation, ResumeSink, Settlement};
pub use types::{Describe, TypeDescriptor, TypeRegistry};
