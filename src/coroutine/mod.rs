//! # Coroutine Dispatch Bridge
//!
//! Lets a coroutine-shaped handler (one returning a [`HandlerFuture`]) run
//! against a transport that either answers on the spot or suspends and is
//! resumed later from any thread.
//!
//! ## Protocol
//!
//! 1. The request context snapshot travels with the [`PendingInvocation`].
//! 2. An [`ExchangeContinuation`] is bound to its resume sink before launch.
//! 3. The future is polled once, eagerly, on the calling worker.
//! 4. `Ready`: the result is returned directly and `suspend()` is never
//!    called. `Pending`: the exchange is suspended; if that is refused the
//!    computation is abandoned and [`BridgeError::SuspendFailed`] returned.
//! 5. Wake-ups re-poll the future on the dispatcher executor; the final
//!    result is delivered by the continuation on the io executor, inside the
//!    restored request context.
//!
//! ```text
//! Started ──Ready──▶ CompletedSynchronously
//!    │
//!  Pending + suspend()
//!    ▼
//! Suspended ──continuation──▶ Resumed
//! ```
//!
//! [`PendingInvocation`]: crate::transport::PendingInvocation
//! [`BridgeError::SuspendFailed`]: crate::error::BridgeError::SuspendFailed

mod bridge;
mod continuation;
mod task;

pub use bridge::{CoroutineBridge, Dispatched};
pub use continuation::ExchangeContinuation;
pub use task::HandlerFuture;
