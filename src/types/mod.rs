//! # Type Model
//!
//! A small reflective type system: raw classes, generic instantiations and
//! formal type variables, arranged in an inheritance graph owned by a
//! [`TypeRegistry`].
//!
//! Handlers declare their return type as a [`TypeDescriptor`]. The classifier
//! in [`crate::model`] decides from it whether dispatch must be deferred, and
//! [`resolve`] digs the real payload type out from behind generic wrappers:
//!
//! ```rust
//! use resumable::types::{builtin, resolve, ClassId, TypeDescriptor, TypeRegistry};
//!
//! let registry = TypeRegistry::new();
//! let declared = TypeDescriptor::parameterized(
//!     builtin::SETTABLE_FUTURE,
//!     vec![TypeDescriptor::class("Pet")],
//! );
//! let payload = resolve(&registry, &declared, &ClassId::new(builtin::LISTENABLE_FUTURE), 0);
//! assert_eq!(payload, Some(TypeDescriptor::class("Pet")));
//! ```

mod core;
mod describe;
mod resolve;

pub use core::{builtin, ClassDef, ClassId, TypeDescriptor, TypeRegistry, TypeVariable};
pub use describe::Describe;
pub use resolve::{resolve, resolve_variable, GenericBindingMap};
