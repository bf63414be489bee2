#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Tests for the completion adapters
//!
//! # Test Coverage
//!
//! - Settle-once promise resolved after suspension resumes exactly once
//! - Callback future failing with a cause resumes with the cause itself
//! - Callback future cancelled before settling cancels the exchange
//! - Transport cancellation cancels the source future
//! - Listeners run on the io pool inside the request context
//! - Suspension always happens before any settlement
//! - A result arriving after transport cancellation is discarded and logged

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::exchange::RecordingExchange;
use http::StatusCode;
use resumable::completion::{continue_async_dispatch, pair, HandlerReturn, SettableFuture};
use resumable::context::ContextSnapshot;
use resumable::error::HandlerError;
use resumable::executor::{CoroutinePool, DirectExecutor, Executor};
use resumable::ids::RequestId;
use resumable::transport::{AsyncExchange, ChannelExchange, PendingInvocation, Settlement};
use serde_json::json;
use tracing_util::TestTracing;

fn direct() -> Arc<dyn Executor> {
    Arc::new(DirectExecutor)
}

fn pending_for(exchange: &Arc<RecordingExchange>, context: ContextSnapshot) -> PendingInvocation {
    PendingInvocation::new(
        Arc::from("get_pet"),
        Arc::clone(exchange) as Arc<dyn AsyncExchange>,
        context,
    )
}

#[test]
fn test_promise_resolved_after_suspension() {
    let exchange = Arc::new(RecordingExchange::new());
    let (completer, promise) = pair::<String>();

    continue_async_dispatch(
        HandlerReturn::from_promise(promise),
        pending_for(&exchange, ContextSnapshot::empty()),
        &direct(),
    )
    .unwrap();
    assert_eq!(exchange.suspend_calls(), 1);
    assert!(exchange.observed().is_none());

    thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        assert!(completer.resolve("Rex".to_string()));
    })
    .join()
    .unwrap();

    let observed = exchange.wait_settled();
    assert_eq!(observed.settlement, Settlement::Value(json!("Rex")));
    assert_eq!(exchange.settle_calls(), 1);
}

#[test]
fn test_promise_resume_restores_context() {
    let exchange = Arc::new(RecordingExchange::new());
    let context = ContextSnapshot::empty().with_entry("request_id", "req-42");
    let (completer, promise) = pair::<u32>();

    continue_async_dispatch(
        HandlerReturn::from_promise(promise),
        pending_for(&exchange, context),
        &direct(),
    )
    .unwrap();

    // The completing thread has no context of its own.
    thread::spawn(move || completer.resolve(7)).join().unwrap();

    let observed = exchange.wait_settled();
    assert_eq!(observed.settlement, Settlement::Value(json!(7)));
    assert_eq!(observed.context_request_id.as_deref(), Some("req-42"));
}

#[test]
fn test_callback_failure_unwraps_cause() {
    let exchange = Arc::new(RecordingExchange::new());
    let source = SettableFuture::<String>::new();

    continue_async_dispatch(
        HandlerReturn::from_listenable(source.future()),
        pending_for(&exchange, ContextSnapshot::empty()),
        &direct(),
    )
    .unwrap();

    let cause = HandlerError::new(StatusCode::CONFLICT, "Pet already adopted");
    let setter = source.clone();
    let expected = cause.clone();
    thread::spawn(move || assert!(setter.set_failure(cause)))
        .join()
        .unwrap();

    let observed = exchange.wait_settled();
    match observed.settlement {
        Settlement::Error(err) => {
            assert_eq!(err, expected);
            assert_eq!(err.status(), StatusCode::CONFLICT);
        }
        other => panic!("expected the cause, got {other:?}"),
    }
}

#[test]
fn test_callback_cancelled_source_cancels_exchange() {
    let exchange = Arc::new(RecordingExchange::new());
    let source = SettableFuture::<String>::new();

    continue_async_dispatch(
        HandlerReturn::from_listenable(source.future()),
        pending_for(&exchange, ContextSnapshot::empty()),
        &direct(),
    )
    .unwrap();

    assert!(source.cancel());
    let observed = exchange.wait_settled();
    assert_eq!(observed.settlement, Settlement::Cancelled);
    assert_eq!(exchange.settle_calls(), 1);
}

#[test]
fn test_transport_cancel_cancels_source() {
    let exchange = Arc::new(RecordingExchange::new());
    let source = SettableFuture::<String>::new();
    let observer = source.future();

    continue_async_dispatch(
        HandlerReturn::from_listenable(source.future()),
        pending_for(&exchange, ContextSnapshot::empty()),
        &direct(),
    )
    .unwrap();

    exchange.cancel().unwrap();
    assert!(observer.is_cancelled());
    // The listener that follows the cancelled source settles nothing new.
    assert_eq!(exchange.wait_settled().settlement, Settlement::Cancelled);
    assert!(!source.set("too late".to_string()));
}

#[test]
fn test_listener_runs_on_io_pool_with_context() {
    let io: Arc<dyn Executor> = Arc::new(CoroutinePool::new("test-io", 2, 0x10000).unwrap());
    let exchange = Arc::new(RecordingExchange::new());
    let source = SettableFuture::<i64>::new();
    let context = ContextSnapshot::empty().with_entry("request_id", "req-io");

    continue_async_dispatch(
        HandlerReturn::from_listenable(source.future()),
        pending_for(&exchange, context),
        &io,
    )
    .unwrap();

    let setter = source.clone();
    let producer = thread::spawn(move || {
        assert!(setter.set(99));
        thread::current().id()
    });
    let producer_thread = producer.join().unwrap();

    let observed = exchange.wait_settled();
    assert_eq!(observed.settlement, Settlement::Value(json!(99)));
    assert_ne!(observed.thread, producer_thread);
    assert_eq!(observed.context_request_id.as_deref(), Some("req-io"));
}

#[test]
fn test_already_settled_source_still_suspends_first() {
    let exchange = Arc::new(RecordingExchange::new());
    let source = SettableFuture::<String>::new();
    assert!(source.set("done".to_string()));

    continue_async_dispatch(
        HandlerReturn::from_listenable(source.future()),
        pending_for(&exchange, ContextSnapshot::empty()),
        &direct(),
    )
    .unwrap();

    assert_eq!(exchange.suspend_calls(), 1);
    assert_eq!(
        exchange.wait_settled().settlement,
        Settlement::Value(json!("done"))
    );
}

#[test]
fn test_refused_suspension_cancels_callback_source() {
    let exchange = Arc::new(RecordingExchange::refusing());
    let source = SettableFuture::<String>::new();
    let observer = source.future();

    let result = continue_async_dispatch(
        HandlerReturn::from_listenable(source.future()),
        pending_for(&exchange, ContextSnapshot::empty()),
        &direct(),
    );

    assert!(result.is_err());
    assert!(observer.is_cancelled());
    assert_eq!(exchange.settle_calls(), 0);
}

#[test]
fn test_late_promise_result_after_cancel_is_discarded() {
    let tracing = TestTracing::init();
    let (exchange, receiver) = ChannelExchange::open(RequestId::new());
    let (completer, promise) = pair::<String>();

    continue_async_dispatch(
        HandlerReturn::from_promise(promise),
        PendingInvocation::new(
            Arc::from("get_pet"),
            Arc::clone(&exchange) as Arc<dyn AsyncExchange>,
            ContextSnapshot::empty(),
        ),
        &direct(),
    )
    .unwrap();

    assert!(exchange.expire());
    // Observer runs inline on this thread and must swallow the refusal.
    assert!(completer.resolve("Rex".to_string()));

    assert_eq!(receiver.wait().unwrap(), Settlement::Cancelled);
    assert!(tracing.contains("Late result discarded - exchange was cancelled"));
    assert!(!tracing.contains("Double settlement - CRITICAL"));
}
