#![allow(dead_code)]

pub mod exchange {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use std::time::{Duration, Instant};

    use resumable::error::SettleError;
    use resumable::ids::RequestId;
    use resumable::transport::{AsyncExchange, CancelHook, Settlement};

    /// What the exchange saw at the moment a settlement took effect.
    #[derive(Debug, Clone)]
    pub struct Observed {
        pub settlement: Settlement,
        pub thread: ThreadId,
        /// `request_id` entry of the diagnostic context on the settling thread
        pub context_request_id: Option<String>,
    }

    /// Exchange that records every call made on it.
    pub struct RecordingExchange {
        request_id: RequestId,
        refuse_suspend: AtomicBool,
        suspend_calls: AtomicUsize,
        settle_calls: AtomicUsize,
        observed: Mutex<Option<Observed>>,
        hooks: Mutex<Vec<CancelHook>>,
    }

    impl RecordingExchange {
        pub fn new() -> Self {
            Self {
                request_id: RequestId::new(),
                refuse_suspend: AtomicBool::new(false),
                suspend_calls: AtomicUsize::new(0),
                settle_calls: AtomicUsize::new(0),
                observed: Mutex::new(None),
                hooks: Mutex::new(Vec::new()),
            }
        }

        /// An exchange whose `suspend()` always answers `false`.
        pub fn refusing() -> Self {
            let exchange = Self::new();
            exchange.refuse_suspend.store(true, Ordering::SeqCst);
            exchange
        }

        pub fn suspend_calls(&self) -> usize {
            self.suspend_calls.load(Ordering::SeqCst)
        }

        pub fn settle_calls(&self) -> usize {
            self.settle_calls.load(Ordering::SeqCst)
        }

        pub fn observed(&self) -> Option<Observed> {
            self.observed.lock().unwrap().clone()
        }

        /// Block up to five seconds for the first settlement.
        pub fn wait_settled(&self) -> Observed {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                if let Some(observed) = self.observed() {
                    return observed;
                }
                assert!(Instant::now() < deadline, "exchange was never settled");
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }

    impl AsyncExchange for RecordingExchange {
        fn request_id(&self) -> RequestId {
            self.request_id
        }

        fn suspend(&self) -> bool {
            if self.refuse_suspend.load(Ordering::SeqCst) {
                return false;
            }
            self.suspend_calls.fetch_add(1, Ordering::SeqCst) == 0
        }

        fn settle(&self, settlement: Settlement) -> Result<(), SettleError> {
            self.settle_calls.fetch_add(1, Ordering::SeqCst);
            let hooks = {
                let mut observed = self.observed.lock().unwrap();
                if let Some(previous) = observed.as_ref() {
                    return Err(SettleError::AlreadySettled {
                        attempted: settlement.kind(),
                        previous: previous.settlement.kind(),
                    });
                }
                let cancelled = settlement == Settlement::Cancelled;
                *observed = Some(Observed {
                    settlement,
                    thread: std::thread::current().id(),
                    context_request_id: resumable::context::get("request_id"),
                });
                let hooks = std::mem::take(&mut *self.hooks.lock().unwrap());
                if cancelled {
                    hooks
                } else {
                    Vec::new()
                }
            };
            for hook in hooks {
                hook();
            }
            Ok(())
        }

        fn on_cancel(&self, hook: CancelHook) {
            let already_cancelled = matches!(
                self.observed.lock().unwrap().as_ref(),
                Some(o) if o.settlement == Settlement::Cancelled
            );
            if already_cancelled {
                hook();
            } else {
                self.hooks.lock().unwrap().push(hook);
            }
        }

        fn is_settled(&self) -> bool {
            self.observed.lock().unwrap().is_some()
        }
    }
}
