//! # Completion Sources and Adapters
//!
//! Two kinds of future a plain handler can return, and the adapter that
//! attaches either one to a suspended exchange:
//!
//! - [`Promise`] / [`Completer`]: settles once, observed by a single
//!   completion observer.
//! - [`ListenableFuture`] / [`SettableFuture`]: observed by listeners that run
//!   on an executor once it is done; queried afterwards for its value,
//!   failure ([`ExecutionError::Failed`] is unwrapped to its cause) or
//!   cancellation.
//!
//! [`continue_async_dispatch`] picks the adapter from the [`HandlerReturn`]
//! variant, suspends the exchange and hands the [`ResumeSink`] to the source.
//!
//! [`ResumeSink`]: crate::transport::ResumeSink

mod adapter;
mod listenable;
mod promise;

pub use adapter::{continue_async_dispatch, to_payload, HandlerReturn, IntoHandlerReturn};
pub use listenable::{ExecutionError, ListenableFuture, SettableFuture};
pub use promise::{pair, Completer, Promise};
