//! Tracks suspended exchanges so shutdown can cancel what is still pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::ids::RequestId;
use crate::transport::ChannelExchange;

/// Registry of in-flight suspended exchanges.
#[derive(Default)]
pub struct Supervisor {
    pending: DashMap<RequestId, Weak<ChannelExchange>>,
    shutting_down: AtomicBool,
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a suspended exchange.
    ///
    /// During shutdown the exchange is cancelled instead and `false` returned.
    pub fn track(&self, exchange: &Arc<ChannelExchange>) -> bool {
        let request_id = crate::transport::AsyncExchange::request_id(exchange.as_ref());
        if self.is_shutting_down() {
            exchange.expire();
            return false;
        }
        self.pending.insert(request_id, Arc::downgrade(exchange));
        // Shutdown may have swept the map between the check and the insert.
        if self.is_shutting_down() {
            self.pending.remove(&request_id);
            exchange.expire();
            return false;
        }
        true
    }

    pub fn untrack(&self, request_id: RequestId) {
        self.pending.remove(&request_id);
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Refuse new work, cancel every tracked exchange, then wait up to
    /// `grace` for their dispatchers to let go of them.
    ///
    /// Returns how many exchanges this call cancelled.
    pub fn shutdown(&self, grace: Duration) -> usize {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("Shutdown already in progress");
            return 0;
        }
        let tracked: Vec<(RequestId, Weak<ChannelExchange>)> = self
            .pending
            .iter()
            .map(|entry| (*entry.key(), Weak::clone(entry.value())))
            .collect();
        info!(in_flight = tracked.len(), "Application is shutting down");

        let mut cancelled = 0usize;
        for (request_id, weak) in tracked {
            match weak.upgrade() {
                Some(exchange) => {
                    if exchange.expire() {
                        cancelled += 1;
                    }
                }
                None => {
                    self.pending.remove(&request_id);
                }
            }
        }

        let deadline = Instant::now() + grace;
        while !self.pending.is_empty() && Instant::now() < deadline {
            may::coroutine::sleep(Duration::from_millis(5));
        }
        let remaining = self.pending.len();
        if remaining > 0 {
            warn!(
                remaining = remaining,
                grace_ms = grace.as_millis() as u64,
                "Shutdown grace period elapsed with exchanges still tracked"
            );
        } else {
            info!(cancelled = cancelled, "All suspended exchanges drained");
        }
        cancelled
    }
}
