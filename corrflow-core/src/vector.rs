use crate::path::{PathScope, VariablePath};
use crate::value::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Ordered sequence of child values under one field name.
///
/// Two variants:
/// - `Owned`: concrete storage.
/// - `Linked`: no storage. Every operation resolves the link's path against
///   its scope at call time and forwards to the vector found there.
///
/// Like [`Value`], this is a handle: `Clone` shares the same storage (or the
/// same link). [`ValueVector::create_clone`] gives copy semantics.
#[derive(Clone)]
pub enum ValueVector {
    Owned(Arc<RwLock<Vec<Value>>>),
    Linked(Link),
}

/// Target of a linked vector: a path evaluated inside a scope.
#[derive(Clone)]
pub struct Link {
    scope: Arc<dyn PathScope>,
    path: VariablePath,
}

impl Link {
    pub fn new(scope: Arc<dyn PathScope>, path: VariablePath) -> Self {
        Self { scope, path }
    }

    pub fn path(&self) -> &VariablePath {
        &self.path
    }

    /// Resolve the link now. A link whose path leads back to itself
    /// recurses without bound.
    pub fn target(&self) -> ValueVector {
        self.path.vector_in(&self.scope.root())
    }

    /// Resolve the link only if its path already leads to a vector.
    pub fn find_target(&self) -> Option<ValueVector> {
        self.path.find_vector(&self.scope.root())
    }
}

/// Grow `values` so that position `i` exists. `false` when no vector could
/// hold that many elements; `values` is then left as it was.
fn extend_to(values: &mut Vec<Value>, i: usize) -> bool {
    let Some(needed) = i.checked_add(1) else {
        return false;
    };
    if values.len() < needed {
        if values.try_reserve(needed - values.len()).is_err() {
            return false;
        }
        values.resize_with(needed, Value::new);
    }
    true
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").field("path", &self.path).finish()
    }
}

impl Default for ValueVector {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueVector {
    /// Empty owned storage.
    pub fn new() -> Self {
        ValueVector::Owned(Arc::new(RwLock::new(Vec::new())))
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        ValueVector::Owned(Arc::new(RwLock::new(values)))
    }

    /// A vector that aliases whatever `path` designates inside `scope`.
    ///
    /// Cycles are not detected: a link whose path runs through itself
    /// recurses without bound.
    pub fn link(scope: Arc<dyn PathScope>, path: VariablePath) -> Self {
        ValueVector::Linked(Link::new(scope, path))
    }

    /// Follow links down to concrete storage without creating anything.
    /// `None` when a link's path does not currently lead to a vector.
    pub fn resolved(&self) -> Option<ValueVector> {
        match self {
            ValueVector::Owned(_) => Some(self.clone()),
            ValueVector::Linked(link) => link.find_target(),
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, ValueVector::Linked(_))
    }

    /// True when both handles share the same owned storage, or are links
    /// over the same scope and path.
    pub fn ptr_eq(&self, other: &ValueVector) -> bool {
        match (self, other) {
            (ValueVector::Owned(a), ValueVector::Owned(b)) => Arc::ptr_eq(a, b),
            (ValueVector::Linked(a), ValueVector::Linked(b)) => {
                Arc::ptr_eq(&a.scope, &b.scope) && a.path == b.path
            }
            _ => false,
        }
    }

    fn read(storage: &RwLock<Vec<Value>>) -> RwLockReadGuard<'_, Vec<Value>> {
        storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(storage: &RwLock<Vec<Value>>) -> RwLockWriteGuard<'_, Vec<Value>> {
        storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> usize {
        match self {
            ValueVector::Owned(storage) => Self::read(storage).len(),
            ValueVector::Linked(link) => link.target().size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Element `i`. Missing positions up to and including `i` are filled
    /// with undefined values first.
    ///
    /// An index no vector can reach yields a detached undefined value and
    /// leaves the vector unchanged.
    pub fn get(&self, i: usize) -> Value {
        match self {
            ValueVector::Owned(storage) => {
                if let Some(v) = Self::read(storage).get(i) {
                    return v.clone();
                }
                let mut values = Self::write(storage);
                if !extend_to(&mut values, i) {
                    warn!(index = i, "vector index out of reach; returning detached value");
                    return Value::new();
                }
                values[i].clone()
            }
            ValueVector::Linked(link) => link.target().get(i),
        }
    }

    pub fn first(&self) -> Value {
        self.get(0)
    }

    /// Place `value` at position `i`, padding with undefined values when
    /// `i` is past the end. An index no vector can reach is ignored.
    pub fn set(&self, value: Value, i: usize) {
        match self {
            ValueVector::Owned(storage) => {
                let mut values = Self::write(storage);
                if !extend_to(&mut values, i) {
                    warn!(index = i, "vector index out of reach; value dropped");
                    return;
                }
                values[i] = value;
            }
            ValueVector::Linked(link) => link.target().set(value, i),
        }
    }

    pub fn add(&self, value: Value) {
        match self {
            ValueVector::Owned(storage) => Self::write(storage).push(value),
            ValueVector::Linked(link) => link.target().add(value),
        }
    }

    /// Remove and return element `i`, shifting later elements down.
    /// Out-of-range indices return `None` and leave the vector untouched.
    pub fn remove(&self, i: usize) -> Option<Value> {
        match self {
            ValueVector::Owned(storage) => {
                let mut values = Self::write(storage);
                (i < values.len()).then(|| values.remove(i))
            }
            ValueVector::Linked(link) => link.target().remove(i),
        }
    }

    /// Handles to the current elements.
    pub fn values(&self) -> Vec<Value> {
        match self {
            ValueVector::Owned(storage) => Self::read(storage).clone(),
            ValueVector::Linked(link) => link.target().values(),
        }
    }

    /// Deep-copy each element of `other` into the element at the same
    /// position here, growing this vector as needed.
    pub fn deep_copy(&self, other: &ValueVector) {
        match self {
            ValueVector::Owned(_) => {
                if self.ptr_eq(other) {
                    return;
                }
                for (i, source) in other.values().iter().enumerate() {
                    self.get(i).deep_copy(source);
                }
            }
            ValueVector::Linked(link) => link.target().deep_copy(other),
        }
    }

    /// Copy semantics: owned storage is duplicated element by element into
    /// an independent vector; a link yields a new link to the same path.
    pub fn create_clone(&self) -> ValueVector {
        match self {
            ValueVector::Owned(_) => {
                let copies = self.values().iter().map(Value::create_clone).collect();
                ValueVector::from_values(copies)
            }
            ValueVector::Linked(link) => ValueVector::Linked(link.clone()),
        }
    }
}

impl fmt::Debug for ValueVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueVector::Owned(storage) => f
                .debug_tuple("Owned")
                .field(&Self::read(storage).len())
                .finish(),
            ValueVector::Linked(link) => f.debug_tuple("Linked").field(link).finish(),
        }
    }
}
