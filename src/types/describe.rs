use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::core::{builtin, TypeDescriptor};
use crate::completion::{ListenableFuture, Promise, SettableFuture};

/// Rust types that can state their own [`TypeDescriptor`].
///
/// This is the introspection source for typed handler registration: the
/// dispatcher records `T::describe()` as the declared return type of a
/// handler producing `T`.
pub trait Describe {
    fn describe() -> TypeDescriptor;
}

macro_rules! describe_as {
    ($class:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl Describe for $ty {
                fn describe() -> TypeDescriptor {
                    TypeDescriptor::class($class)
                }
            }
        )+
    };
}

describe_as!(builtin::STRING => String, &str, Box<str>, std::sync::Arc<str>);
describe_as!(builtin::INTEGER => i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
describe_as!(builtin::FLOAT => f32, f64);
describe_as!(builtin::BOOLEAN => bool);
describe_as!(builtin::VOID => ());

impl Describe for Value {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::Unknown
    }
}

impl<T: Describe> Describe for Option<T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::parameterized(builtin::LIST, vec![T::describe()])
    }
}

impl<V: Describe, S> Describe for HashMap<String, V, S> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::parameterized(
            builtin::MAP,
            vec![TypeDescriptor::class(builtin::STRING), V::describe()],
        )
    }
}

impl<V: Describe> Describe for BTreeMap<String, V> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::parameterized(
            builtin::MAP,
            vec![TypeDescriptor::class(builtin::STRING), V::describe()],
        )
    }
}

impl<T: Describe> Describe for Promise<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::parameterized(builtin::PROMISE, vec![T::describe()])
    }
}

impl<T: Describe> Describe for ListenableFuture<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::parameterized(builtin::LISTENABLE_FUTURE, vec![T::describe()])
    }
}

impl<T: Describe> Describe for SettableFuture<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::parameterized(builtin::SETTABLE_FUTURE, vec![T::describe()])
    }
}
