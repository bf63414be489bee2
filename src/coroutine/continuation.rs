use std::sync::Arc;

use tracing::debug;

use crate::context::ContextSnapshot;
use crate::error::HandlerError;
use crate::executor::Executor;
use crate::transport::{Payload, ResumeSink};

/// Delivers a suspended coroutine's outcome to its exchange.
///
/// Settling may block on I/O, so the resume is handed to the `io` executor
/// rather than run on the worker that finished the computation.
pub struct ExchangeContinuation {
    sink: ResumeSink,
    io: Arc<dyn Executor>,
}

impl ExchangeContinuation {
    #[must_use]
    pub fn new(sink: ResumeSink, io: Arc<dyn Executor>) -> Self {
        Self { sink, io }
    }

    /// Hop to the io executor, re-enter `context`, and settle.
    pub fn resume_with(self, outcome: Result<Payload, HandlerError>, context: ContextSnapshot) {
        let Self { sink, io } = self;
        debug!(
            request_id = %sink.request_id(),
            executor = io.name(),
            ok = outcome.is_ok(),
            "Resuming exchange"
        );
        io.execute(Box::new(move || {
            let _guard = context.enter();
            let settled = match outcome {
                Ok(value) => sink.resume_with_value(value),
                Err(err) => sink.resume_with_error(err),
            };
            if let Err(_already_logged) = settled {}
        }));
    }

    /// Drop without settling: the result went another way, or nowhere.
    pub fn discard(self) {
        self.sink.disarm();
    }
}
