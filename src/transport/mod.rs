//! # Suspend/Resume Transport
//!
//! The contract between the bridge and whatever carries the response.
//!
//! ```text
//!   Running ──complete_synchronously──▶ Completed
//!      │
//!   suspend()
//!      ▼
//!   Suspended ──resume_with_value / resume_with_error / cancel──▶ Settled(kind)
//! ```
//!
//! A [`PendingInvocation`] wraps one deferred dispatch. Splitting it yields
//! the [`SuspendHandle`] used to take the exchange off the synchronous path,
//! and the one [`ResumeSink`] allowed to settle it. Only the first settlement
//! of an exchange takes effect; later attempts are refused with a
//! [`SettleError`](crate::error::SettleError) and logged.
//!
//! [`ChannelExchange`] is the reference transport: the dispatching side waits
//! on a `may` channel for the settlement.

mod core;
mod exchange;
mod sink;

pub use core::{AsyncExchange, CancelHook, Payload, Settlement, SettlementKind};
pub use exchange::{ChannelExchange, ExchangeReceiver};
pub use sink::{PendingInvocation, ResumeSink, SuspendHandle};
