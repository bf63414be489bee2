//! # Handler Model
//!
//! Registration-time view of the handlers a dispatcher serves.
//!
//! Each handler is described by a [`HandlerDescriptor`]. When the model is
//! built, [`rewrite`] classifies every descriptor's return type: handlers that
//! return a completion source (or are coroutine-shaped) are marked suspended
//! and advertise the unwrapped payload type as their routing type. The
//! resulting [`HandlerModel`] is frozen and shared read-only with the
//! dispatch path.
//!
//! | Declared return            | Classification               | Routing type |
//! |----------------------------|------------------------------|--------------|
//! | `Pet`                      | synchronous                  | `Pet`        |
//! | `Promise<Pet>`             | async, settle-once           | `Pet`        |
//! | `SettableFuture<Pet>`      | async, callback              | `Pet`        |
//! | raw `Promise`              | async, settle-once           | `Object`     |
//! | coroutine returning `Pet`  | async, coroutine             | `Pet`        |

mod classify;
mod core;
mod rewrite;

pub use classify::{classify, classify_handler};
pub use core::{
    Classification, CompletionKind, HandlerDescriptor, HandlerModel, HandlerModelBuilder,
    HandlerShape,
};
pub use rewrite::rewrite;
