//! Binding a formal type parameter to the concrete type an instantiation gives it.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use tracing::trace;

use super::core::{ClassId, TypeDescriptor, TypeRegistry, TypeVariable};

/// Formal parameter -> bound type, built while resolving one variable.
///
/// The first binding recorded for a parameter wins; later, more distant
/// paths through the hierarchy never overwrite it.
#[derive(Debug, Default, Clone)]
pub struct GenericBindingMap {
    bindings: HashMap<TypeVariable, TypeDescriptor>,
}

impl GenericBindingMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `variable = ty` unless the variable is already bound.
    ///
    /// Returns whether the binding was stored.
    pub fn bind(&mut self, variable: TypeVariable, ty: TypeDescriptor) -> bool {
        match self.bindings.entry(variable) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ty);
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, variable: &TypeVariable) -> Option<&TypeDescriptor> {
        self.bindings.get(variable)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Replace every bound variable inside `ty` with its binding.
    #[must_use]
    pub fn substitute(&self, ty: &TypeDescriptor) -> TypeDescriptor {
        match ty {
            TypeDescriptor::Variable(v) => self
                .bindings
                .get(v)
                .cloned()
                .unwrap_or_else(|| ty.clone()),
            TypeDescriptor::Parameterized { raw, args } => TypeDescriptor::Parameterized {
                raw: raw.clone(),
                args: args.iter().map(|a| self.substitute(a)).collect(),
            },
            TypeDescriptor::Class(_) | TypeDescriptor::Unknown => ty.clone(),
        }
    }
}

/// Find the type bound to parameter `index` of `target` when walking up from
/// `instantiated`.
///
/// The walk is breadth-first: each parameterized type binds its raw class's
/// parameters (first binding wins) and every raw class visited enqueues its
/// superclass, then its interfaces in declared order. Returns `None` when the
/// parameter is never bound, or is bound only to another unbound variable.
#[must_use]
pub fn resolve(
    registry: &TypeRegistry,
    instantiated: &TypeDescriptor,
    target: &ClassId,
    index: usize,
) -> Option<TypeDescriptor> {
    resolve_variable(
        registry,
        instantiated,
        &TypeVariable::new(target.clone(), index),
    )
}

/// Same as [`resolve`], addressed by the variable itself.
#[must_use]
pub fn resolve_variable(
    registry: &TypeRegistry,
    instantiated: &TypeDescriptor,
    variable: &TypeVariable,
) -> Option<TypeDescriptor> {
    let mut bindings = GenericBindingMap::new();
    let mut expanded: HashSet<ClassId> = HashSet::new();
    let mut queue: VecDeque<TypeDescriptor> = VecDeque::from([instantiated.clone()]);

    while let Some(next) = queue.pop_front() {
        let raw = match &next {
            TypeDescriptor::Parameterized { raw, args } => {
                for (i, arg) in args.iter().enumerate() {
                    let bound = bindings.substitute(arg);
                    bindings.bind(TypeVariable::new(raw.clone(), i), bound);
                }
                raw
            }
            TypeDescriptor::Class(raw) => raw,
            TypeDescriptor::Variable(_) | TypeDescriptor::Unknown => continue,
        };

        if let Some(found) = bindings.get(variable) {
            return match found {
                TypeDescriptor::Variable(_) => None,
                concrete => Some(concrete.clone()),
            };
        }

        if expanded.insert(raw.clone()) {
            queue.extend(registry.supertypes(raw).cloned());
        }
    }

    trace!(
        instantiated = %instantiated,
        owner = %variable.owner,
        index = variable.index,
        "Type parameter not bound along hierarchy"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::core::{builtin, ClassDef};

    #[test]
    fn test_bind_is_first_writer_wins() {
        let mut map = GenericBindingMap::new();
        let v = TypeVariable::new("Promise", 0);
        assert!(map.bind(v.clone(), TypeDescriptor::class("A")));
        assert!(!map.bind(v.clone(), TypeDescriptor::class("B")));
        assert_eq!(map.get(&v), Some(&TypeDescriptor::class("A")));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_substitute_nested() {
        let mut map = GenericBindingMap::new();
        map.bind(TypeVariable::new("Box", 0), TypeDescriptor::class("Pet"));
        let ty = TypeDescriptor::parameterized(
            builtin::LIST,
            vec![TypeDescriptor::variable("Box", 0)],
        );
        assert_eq!(
            map.substitute(&ty),
            TypeDescriptor::parameterized(builtin::LIST, vec![TypeDescriptor::class("Pet")])
        );
    }

    #[test]
    fn test_direct_instantiation() {
        let registry = TypeRegistry::new();
        let ty = TypeDescriptor::parameterized(builtin::PROMISE, vec![TypeDescriptor::class("Pet")]);
        assert_eq!(
            resolve(&registry, &ty, &ClassId::new(builtin::PROMISE), 0),
            Some(TypeDescriptor::class("Pet"))
        );
    }

    #[test]
    fn test_raw_class_without_binding() {
        let registry = TypeRegistry::new();
        let ty = TypeDescriptor::class(builtin::PROMISE);
        assert_eq!(resolve(&registry, &ty, &ClassId::new(builtin::PROMISE), 0), None);
    }

    #[test]
    fn test_raw_subclass_binding_through_superclass() {
        let mut registry = TypeRegistry::new();
        registry.define(ClassDef::new("PetPromise").extends(TypeDescriptor::parameterized(
            builtin::PROMISE,
            vec![TypeDescriptor::class("Pet")],
        )));
        let ty = TypeDescriptor::class("PetPromise");
        assert_eq!(
            resolve(&registry, &ty, &ClassId::new(builtin::PROMISE), 0),
            Some(TypeDescriptor::class("Pet"))
        );
    }

    #[test]
    fn test_unknown_target_index() {
        let registry = TypeRegistry::new();
        let ty = TypeDescriptor::parameterized(builtin::PROMISE, vec![TypeDescriptor::class("Pet")]);
        assert_eq!(resolve(&registry, &ty, &ClassId::new(builtin::PROMISE), 3), None);
    }
}
