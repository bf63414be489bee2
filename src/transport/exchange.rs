use std::mem;
use std::sync::Arc;
use std::time::Duration;

use may::sync::mpsc;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::core::{AsyncExchange, CancelHook, Settlement, SettlementKind};
use crate::error::{BridgeError, SettleError};
use crate::ids::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Completed,
    Suspended,
    Settled(SettlementKind),
}

struct State {
    phase: Phase,
    reply_tx: Option<mpsc::Sender<Settlement>>,
    cancel_hooks: Vec<CancelHook>,
}

/// Reference transport: a suspended exchange answered over a reply channel.
///
/// The dispatching side keeps the [`ExchangeReceiver`] and blocks on it,
/// the same way a handler reply channel is awaited. All state lives behind
/// one lock, so any interleaving of settlements from producer threads and
/// cancellation from the transport admits exactly one winner.
pub struct ChannelExchange {
    request_id: RequestId,
    state: Mutex<State>,
}

/// Receiving half of a [`ChannelExchange`].
pub struct ExchangeReceiver {
    request_id: RequestId,
    reply_rx: mpsc::Receiver<Settlement>,
}

impl ChannelExchange {
    /// Open an exchange in the running phase.
    #[must_use]
    pub fn open(request_id: RequestId) -> (Arc<Self>, ExchangeReceiver) {
        let (reply_tx, reply_rx) = mpsc::channel();
        let exchange = Arc::new(Self {
            request_id,
            state: Mutex::new(State {
                phase: Phase::Running,
                reply_tx: Some(reply_tx),
                cancel_hooks: Vec::new(),
            }),
        });
        (
            exchange,
            ExchangeReceiver {
                request_id,
                reply_rx,
            },
        )
    }

    /// Mark the exchange answered on the synchronous path.
    ///
    /// Returns `false` when it had already been suspended or completed.
    pub fn complete_synchronously(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Running {
            return false;
        }
        state.phase = Phase::Completed;
        state.reply_tx = None;
        state.cancel_hooks.clear();
        true
    }

    /// Cancel a suspended exchange from the transport side (timeout or shutdown).
    ///
    /// Quiet when the exchange has already been settled; returns whether this
    /// call cancelled it.
    pub fn expire(&self) -> bool {
        match self.settle(Settlement::Cancelled) {
            Ok(()) => {
                info!(request_id = %self.request_id, "Suspended exchange expired");
                true
            }
            Err(e) => {
                debug!(
                    request_id = %self.request_id,
                    error = %e,
                    "Exchange already finished - nothing to expire"
                );
                false
            }
        }
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state.lock().phase == Phase::Suspended
    }

    /// Kind of the settlement that took effect, if any.
    #[must_use]
    pub fn settled_with(&self) -> Option<SettlementKind> {
        match self.state.lock().phase {
            Phase::Settled(kind) => Some(kind),
            _ => None,
        }
    }
}

impl AsyncExchange for ChannelExchange {
    fn request_id(&self) -> RequestId {
        self.request_id
    }

    fn suspend(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Running {
            return false;
        }
        state.phase = Phase::Suspended;
        true
    }

    fn settle(&self, settlement: Settlement) -> Result<(), SettleError> {
        let attempted = settlement.kind();
        let hooks = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Suspended => {}
                Phase::Settled(previous) => {
                    return Err(SettleError::AlreadySettled {
                        attempted,
                        previous,
                    })
                }
                Phase::Running | Phase::Completed => {
                    return Err(SettleError::NotSuspended { attempted })
                }
            }
            state.phase = Phase::Settled(attempted);
            if let Some(reply_tx) = state.reply_tx.take() {
                if reply_tx.send(settlement).is_err() {
                    debug!(
                        request_id = %self.request_id,
                        "Exchange receiver gone - settlement dropped"
                    );
                }
            }
            mem::take(&mut state.cancel_hooks)
        };
        // Hooks may call back into this exchange, so they run unlocked.
        if attempted == SettlementKind::Cancelled {
            for hook in hooks {
                hook();
            }
        }
        Ok(())
    }

    fn on_cancel(&self, hook: CancelHook) {
        let mut state = self.state.lock();
        let phase = state.phase;
        match phase {
            Phase::Settled(SettlementKind::Cancelled) => {
                drop(state);
                hook();
            }
            Phase::Settled(_) | Phase::Completed => {}
            Phase::Running | Phase::Suspended => state.cancel_hooks.push(hook),
        }
    }

    fn is_settled(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Settled(_))
    }
}

impl ExchangeReceiver {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Block until the exchange is settled.
    ///
    /// Yields the coroutine when called from one; blocks the thread otherwise.
    pub fn wait(&self) -> Result<Settlement, BridgeError> {
        self.reply_rx.recv().map_err(|_| BridgeError::Abandoned {
            request_id: self.request_id,
        })
    }

    /// Block until the exchange is settled or `timeout` elapses.
    ///
    /// `None` means nothing arrived in time; the exchange is untouched.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Settlement> {
        self.reply_rx.recv_timeout(timeout).ok()
    }

    /// Take a settlement that has already arrived, without blocking.
    #[must_use]
    pub fn try_take(&self) -> Option<Settlement> {
        self.reply_rx.try_recv().ok()
    }
}
