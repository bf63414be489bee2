use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::warn;

/// Names of the classes every [`TypeRegistry`] starts with.
pub mod builtin {
    /// Root of every hierarchy; also the meaning of [`super::TypeDescriptor::Unknown`].
    pub const OBJECT: &str = "Object";
    /// Settle-once future: `Promise<T>`.
    pub const PROMISE: &str = "Promise";
    /// Callback future: `ListenableFuture<V>`.
    pub const LISTENABLE_FUTURE: &str = "ListenableFuture";
    /// `SettableFuture<V> : ListenableFuture<V>`.
    pub const SETTABLE_FUTURE: &str = "SettableFuture";
    pub const STRING: &str = "String";
    pub const INTEGER: &str = "Integer";
    pub const FLOAT: &str = "Float";
    pub const BOOLEAN: &str = "Boolean";
    pub const VOID: &str = "Void";
    /// `List<E>`.
    pub const LIST: &str = "List";
    /// `Map<K, V>`.
    pub const MAP: &str = "Map";
}

/// Identity of a raw class (the erasure of a type).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(Arc<str>);

impl ClassId {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClassId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A formal type parameter: the `index`-th declared parameter of `owner`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TypeVariable {
    pub owner: ClassId,
    pub index: usize,
}

impl TypeVariable {
    #[must_use]
    pub fn new(owner: impl Into<ClassId>, index: usize) -> Self {
        Self {
            owner: owner.into(),
            index,
        }
    }
}

/// Handle to a possibly-generic type.
///
/// Descriptors are plain values: cheap to clone, compared structurally, and
/// produced once per handler at registration time.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum TypeDescriptor {
    /// A raw class with no bound arguments.
    Class(ClassId),
    /// A generic instantiation such as `Promise<Pet>`.
    Parameterized {
        raw: ClassId,
        args: Vec<TypeDescriptor>,
    },
    /// A formal parameter that has not been bound.
    Variable(TypeVariable),
    /// Nothing more specific is known; routes like `Object`.
    #[default]
    Unknown,
}

impl TypeDescriptor {
    #[must_use]
    pub fn class(name: &str) -> Self {
        Self::Class(ClassId::new(name))
    }

    #[must_use]
    pub fn parameterized(raw: &str, args: Vec<TypeDescriptor>) -> Self {
        Self::Parameterized {
            raw: ClassId::new(raw),
            args,
        }
    }

    #[must_use]
    pub fn variable(owner: &str, index: usize) -> Self {
        Self::Variable(TypeVariable::new(owner, index))
    }

    /// Raw class of this type, if it has one.
    #[must_use]
    pub fn erasure(&self) -> Option<&ClassId> {
        match self {
            Self::Class(raw) | Self::Parameterized { raw, .. } => Some(raw),
            Self::Variable(_) | Self::Unknown => None,
        }
    }

    /// Bound type arguments of a parameterized instance; empty otherwise.
    #[must_use]
    pub fn type_arguments(&self) -> &[TypeDescriptor] {
        match self {
            Self::Parameterized { args, .. } => args,
            _ => &[],
        }
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(raw) => write!(f, "{raw}"),
            Self::Parameterized { raw, args } => {
                write!(f, "{raw}<")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(">")
            }
            Self::Variable(v) => write!(f, "{}#{}", v.owner, v.index),
            Self::Unknown => f.write_str(builtin::OBJECT),
        }
    }
}

/// Declaration of one class in the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassDef {
    pub id: ClassId,
    pub type_params: Vec<Arc<str>>,
    pub superclass: Option<TypeDescriptor>,
    pub interfaces: Vec<TypeDescriptor>,
}

impl ClassDef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            id: ClassId::new(name),
            type_params: Vec::new(),
            superclass: None,
            interfaces: Vec::new(),
        }
    }

    /// Declare the class's formal type parameters in order.
    #[must_use]
    pub fn with_params<const N: usize>(mut self, params: [&str; N]) -> Self {
        self.type_params = params.iter().map(|p| Arc::from(*p)).collect();
        self
    }

    #[must_use]
    pub fn extends(mut self, superclass: TypeDescriptor) -> Self {
        self.superclass = Some(superclass);
        self
    }

    #[must_use]
    pub fn implements(mut self, interface: TypeDescriptor) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Formal variable for the parameter at `index`, for use in supertypes.
    #[must_use]
    pub fn param(&self, index: usize) -> TypeDescriptor {
        TypeDescriptor::Variable(TypeVariable::new(self.id.clone(), index))
    }

    /// Declared supertypes, superclass first, then interfaces in declared order.
    pub fn supertypes(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.superclass.iter().chain(self.interfaces.iter())
    }
}

/// Inheritance graph the classifier and resolver walk.
///
/// Classes referenced but never defined behave as leaf classes with no type
/// parameters, so a sparse registry degrades to less specific answers rather
/// than errors.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    classes: HashMap<ClassId, ClassDef>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Registry seeded with the built-in classes.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for name in [
            builtin::OBJECT,
            builtin::STRING,
            builtin::INTEGER,
            builtin::FLOAT,
            builtin::BOOLEAN,
            builtin::VOID,
        ] {
            registry.insert(ClassDef::new(name));
        }
        registry.insert(ClassDef::new(builtin::LIST).with_params(["E"]));
        registry.insert(ClassDef::new(builtin::MAP).with_params(["K", "V"]));
        registry.insert(ClassDef::new(builtin::PROMISE).with_params(["T"]));
        registry.insert(ClassDef::new(builtin::LISTENABLE_FUTURE).with_params(["V"]));
        let settable = ClassDef::new(builtin::SETTABLE_FUTURE).with_params(["V"]);
        let settable = settable.clone().implements(TypeDescriptor::Parameterized {
            raw: ClassId::new(builtin::LISTENABLE_FUTURE),
            args: vec![settable.param(0)],
        });
        registry.insert(settable);
        registry
    }

    /// Registry with no classes at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            classes: HashMap::new(),
        }
    }

    fn insert(&mut self, def: ClassDef) -> Option<ClassDef> {
        self.classes.insert(def.id.clone(), def)
    }

    /// Add or replace a class definition, returning the one it replaced.
    pub fn define(&mut self, def: ClassDef) -> Option<ClassDef> {
        let id = def.id.clone();
        let previous = self.insert(def);
        if previous.is_some() {
            warn!(class = %id, "Replaced existing class definition");
        }
        previous
    }

    #[must_use]
    pub fn lookup(&self, id: &ClassId) -> Option<&ClassDef> {
        self.classes.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ClassId) -> bool {
        self.classes.contains_key(id)
    }

    /// Number of type parameters `id` declares (0 for unknown classes).
    #[must_use]
    pub fn arity(&self, id: &ClassId) -> usize {
        self.lookup(id).map_or(0, |def| def.type_params.len())
    }

    /// Declared supertypes of `id`, superclass before interfaces.
    pub fn supertypes<'a>(&'a self, id: &ClassId) -> impl Iterator<Item = &'a TypeDescriptor> {
        self.lookup(id).into_iter().flat_map(ClassDef::supertypes)
    }

    /// Whether a value of raw class `from` can be used where `to` is expected.
    #[must_use]
    pub fn is_assignable(&self, from: &ClassId, to: &ClassId) -> bool {
        if from == to || to.name() == builtin::OBJECT {
            return true;
        }
        let mut seen: HashSet<&ClassId> = HashSet::new();
        let mut queue: VecDeque<&ClassId> = VecDeque::from([from]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            for parent in self.supertypes(next).filter_map(TypeDescriptor::erasure) {
                if parent == to {
                    return true;
                }
                queue.push_back(parent);
            }
        }
        false
    }
}
