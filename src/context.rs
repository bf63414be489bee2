//! # Request Context
//!
//! Request-scoped diagnostic context (correlation ids and the like) that must
//! stay visible to a handler after it resumes, possibly on another worker.
//!
//! The live context is a thread-local set of key/value entries plus the
//! current `tracing` span. Nothing is inherited across threads: the bridge
//! takes a [`ContextSnapshot`] before a suspension and re-enters it around
//! every poll and every resumption.
//!
//! ```rust
//! use resumable::context::{self, ContextSnapshot};
//!
//! let snapshot = ContextSnapshot::empty().with_entry("request_id", "01J0");
//! let seen = std::thread::spawn(move || {
//!     let _guard = snapshot.enter();
//!     context::get("request_id")
//! })
//! .join()
//! .unwrap();
//! assert_eq!(seen.as_deref(), Some("01J0"));
//! ```

use std::cell::RefCell;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::span::EnteredSpan;
use tracing::Span;

/// Inline capacity for context entries before spilling to the heap.
pub const MAX_INLINE_ENTRIES: usize = 8;

/// Context entries, last write wins on lookup.
pub type ContextEntries = SmallVec<[(Arc<str>, String); MAX_INLINE_ENTRIES]>;

thread_local! {
    static CURRENT: RefCell<ContextEntries> = RefCell::new(SmallVec::new());
}

/// Immutable copy of the request context, carried by value across suspension.
#[derive(Clone, Debug)]
pub struct ContextSnapshot {
    entries: Arc<ContextEntries>,
    span: Span,
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl ContextSnapshot {
    /// Copy the calling thread's live context and current span.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            entries: Arc::new(CURRENT.with(|c| c.borrow().clone())),
            span: Span::current(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(SmallVec::new()),
            span: Span::none(),
        }
    }

    #[must_use]
    pub fn with_entry(mut self, key: &str, value: impl Into<String>) -> Self {
        let entries = Arc::make_mut(&mut self.entries);
        let value = value.into();
        match entries.iter_mut().rfind(|(k, _)| k.as_ref() == key) {
            Some((_, v)) => *v = value,
            None => entries.push((Arc::from(key), value)),
        }
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rfind(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn entries(&self) -> &[(Arc<str>, String)] {
        &self.entries
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Install this snapshot as the thread's live context until the guard drops.
    #[must_use]
    pub fn enter(&self) -> ContextGuard {
        let previous = CURRENT.with(|c| c.replace(ContextEntries::clone(&self.entries)));
        ContextGuard {
            previous: Some(previous),
            _span: self.span.clone().entered(),
        }
    }

    /// Run `f` inside this context, keeping any entries `f` adds or removes.
    pub fn scope<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let guard = self.enter();
        let result = f();
        let live = CURRENT.with(|c| c.borrow().clone());
        drop(guard);
        if live.as_slice() != self.entries.as_slice() {
            self.entries = Arc::new(live);
        }
        result
    }
}

/// Restores the previous live context (and exits the span) on drop.
#[must_use = "the context is only installed while the guard is alive"]
pub struct ContextGuard {
    previous: Option<ContextEntries>,
    _span: EnteredSpan,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|c| *c.borrow_mut() = previous);
        }
    }
}

/// Value of `key` in the calling thread's live context.
#[must_use]
pub fn get(key: &str) -> Option<String> {
    CURRENT.with(|c| {
        c.borrow()
            .iter()
            .rfind(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.clone())
    })
}

/// Set `key` in the calling thread's live context.
pub fn put(key: &str, value: impl Into<String>) {
    let value = value.into();
    CURRENT.with(|c| {
        let mut entries = c.borrow_mut();
        match entries.iter_mut().rfind(|(k, _)| k.as_ref() == key) {
            Some((_, v)) => *v = value,
            None => entries.push((Arc::from(key), value)),
        }
    });
}

/// Remove `key` from the calling thread's live context.
pub fn remove(key: &str) -> Option<String> {
    CURRENT.with(|c| {
        let mut entries = c.borrow_mut();
        let pos = entries.iter().rposition(|(k, _)| k.as_ref() == key)?;
        Some(entries.remove(pos).1)
    })
}

/// Same as [`ContextSnapshot::capture`].
#[must_use]
pub fn current() -> ContextSnapshot {
    ContextSnapshot::capture()
}
