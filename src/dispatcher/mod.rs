//! # Dispatcher Module
//!
//! A small reference pipeline that exercises the completion bridge the way a
//! real transport would: register handlers, freeze the model, then dispatch
//! requests and block each caller until its exchange settles.
//!
//! ## Handler Registration
//!
//! ```rust
//! use resumable::dispatcher::{Dispatcher, HandlerRequest};
//! use resumable::completion::pair;
//! use resumable::{RuntimeConfig, TypeRegistry};
//!
//! let dispatcher = Dispatcher::new(TypeRegistry::new(), RuntimeConfig::default()).unwrap();
//!
//! dispatcher
//!     .register_promise("get_pet", |req: HandlerRequest| {
//!         let (completer, promise) = pair::<String>();
//!         let id = req.get_param("id").unwrap_or("0").to_string();
//!         std::thread::spawn(move || completer.resolve(format!("pet-{id}")));
//!         promise
//!     })
//!     .unwrap();
//! dispatcher.freeze().unwrap();
//!
//! let resp = dispatcher
//!     .dispatch(HandlerRequest::new("get_pet").with_param("id", "7"))
//!     .unwrap();
//! assert_eq!(resp.status, 200);
//! assert_eq!(resp.body, serde_json::json!("pet-7"));
//! ```
//!
//! ## Request Flow
//!
//! 1. Look up the frozen descriptor by handler name
//! 2. Open a diagnostic scope (`request_id`, `handler`) and a `ChannelExchange`
//! 3. Invoke the handler inside that scope, catching panics
//! 4. Answer directly if nothing suspended; otherwise track the exchange,
//!    optionally arm the resume timeout, and wait on the reply channel
//!
//! ## Error Handling
//!
//! - Missing handlers fail with `BridgeError::HandlerNotFound` (404)
//! - Handler panics become 500 responses
//! - A cancelled exchange, by timeout or shutdown, becomes a 503 response

mod core;

pub use core::{Dispatcher, HandlerRequest, ParamVec, MAX_INLINE_PARAMS};
