use crate::vector::ValueVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ─── Scalar ───────────────────────────────────────────────────

/// The scalar content of a tree node. `Undefined` means "never assigned".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    #[default]
    Undefined,
    Str(String),
    Int(i64),
    Real(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Scalar {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Scalar::Undefined)
    }

    /// Textual form. Undefined renders as the empty string.
    pub fn str_value(&self) -> String {
        match self {
            Scalar::Undefined => String::new(),
            Scalar::Str(s) => s.clone(),
            Scalar::Int(n) => n.to_string(),
            Scalar::Real(r) => r.to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    pub fn int_value(&self) -> i64 {
        match self {
            Scalar::Undefined | Scalar::Bytes(_) => 0,
            Scalar::Str(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|r| r as i64))
                    .unwrap_or(0)
            }
            Scalar::Int(n) => *n,
            Scalar::Real(r) => *r as i64,
            Scalar::Bool(b) => i64::from(*b),
        }
    }

    pub fn real_value(&self) -> f64 {
        match self {
            Scalar::Undefined | Scalar::Bytes(_) => 0.0,
            Scalar::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Scalar::Int(n) => *n as f64,
            Scalar::Real(r) => *r,
            Scalar::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn bool_value(&self) -> bool {
        match self {
            Scalar::Undefined => false,
            Scalar::Str(s) => s.trim().eq_ignore_ascii_case("true"),
            Scalar::Int(n) => *n != 0,
            Scalar::Real(r) => *r != 0.0,
            Scalar::Bool(b) => *b,
            Scalar::Bytes(b) => !b.is_empty(),
        }
    }

    pub fn bytes_value(&self) -> Vec<u8> {
        match self {
            Scalar::Bytes(b) => b.clone(),
            other => other.str_value().into_bytes(),
        }
    }

    /// Type-insensitive equality: `self` is coerced to the type of `other`
    /// before comparing, so `Str("42")` equals `Int(42)`.
    ///
    /// Not symmetric in general (`Str("042")` equals `Int(42)`, the reverse
    /// compares `"42"` against `"042"`).
    pub fn loose_eq(&self, other: &Scalar) -> bool {
        if !self.is_defined() {
            return !other.is_defined();
        }
        match other {
            Scalar::Undefined => false,
            Scalar::Str(s) => self.str_value() == *s,
            Scalar::Int(n) => self.int_value() == *n,
            Scalar::Real(r) => self.real_value() == *r,
            Scalar::Bool(b) => self.bool_value() == *b,
            Scalar::Bytes(b) => self.bytes_value() == *b,
        }
    }

    /// Name of the scalar type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Undefined => "undefined",
            Scalar::Str(_) => "string",
            Scalar::Int(_) => "int",
            Scalar::Real(_) => "real",
            Scalar::Bool(_) => "bool",
            Scalar::Bytes(_) => "bytes",
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Int(n)
    }
}

impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Scalar::Int(i64::from(n))
    }
}

impl From<f64> for Scalar {
    fn from(r: f64) -> Self {
        Scalar::Real(r)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(b: Vec<u8>) -> Self {
        Scalar::Bytes(b)
    }
}

// ─── Value ────────────────────────────────────────────────────

#[derive(Default)]
struct Node {
    scalar: Scalar,
    children: BTreeMap<String, ValueVector>,
}

/// A node of a value tree: an optional scalar plus named child vectors.
///
/// `Value` is a shared handle. `Clone` produces another handle to the same
/// node (mutations through either are visible through both); use
/// [`Value::create_clone`] for an independent copy of the subtree.
///
/// Locks are held only for the duration of a single node access and are
/// never held across a recursive descent, so links pointing back into an
/// ancestor cannot self-deadlock.
#[derive(Clone, Default)]
pub struct Value {
    node: Arc<RwLock<Node>>,
}

impl Value {
    /// A fresh undefined value.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scalar(scalar: impl Into<Scalar>) -> Self {
        let v = Self::new();
        v.set_scalar(scalar);
        v
    }

    fn read(&self) -> RwLockReadGuard<'_, Node> {
        self.node.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Node> {
        self.node.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when both handles point at the same node.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    // ── Scalar access ──

    pub fn scalar(&self) -> Scalar {
        self.read().scalar.clone()
    }

    pub fn set_scalar(&self, scalar: impl Into<Scalar>) {
        self.write().scalar = scalar.into();
    }

    /// Reset the scalar to undefined, keeping children.
    pub fn erase_scalar(&self) {
        self.write().scalar = Scalar::Undefined;
    }

    pub fn is_defined(&self) -> bool {
        self.read().scalar.is_defined()
    }

    pub fn str_value(&self) -> String {
        self.read().scalar.str_value()
    }

    pub fn int_value(&self) -> i64 {
        self.read().scalar.int_value()
    }

    pub fn real_value(&self) -> f64 {
        self.read().scalar.real_value()
    }

    pub fn bool_value(&self) -> bool {
        self.read().scalar.bool_value()
    }

    /// Copy only the scalar of `other` into this node.
    pub fn assign(&self, other: &Value) {
        if self.ptr_eq(other) {
            return;
        }
        let scalar = other.scalar();
        self.write().scalar = scalar;
    }

    /// Type-insensitive scalar equality (see [`Scalar::loose_eq`]).
    pub fn loose_eq(&self, other: &Value) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let (a, b) = (self.scalar(), other.scalar());
        a.loose_eq(&b)
    }

    /// Scalar equality that also requires matching types.
    pub fn strict_eq(&self, other: &Value) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.scalar() == other.scalar()
    }

    // ── Children ──

    pub fn has_children(&self, name: &str) -> bool {
        self.read().children.contains_key(name)
    }

    pub fn child_names(&self) -> Vec<String> {
        self.read().children.keys().cloned().collect()
    }

    pub fn has_any_children(&self) -> bool {
        !self.read().children.is_empty()
    }

    /// The child vector named `name`, creating an empty one if absent.
    pub fn children(&self, name: &str) -> ValueVector {
        if let Some(existing) = self.read().children.get(name) {
            return existing.clone();
        }
        self.write()
            .children
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// The child vector named `name`, without creating it.
    pub fn find_children(&self, name: &str) -> Option<ValueVector> {
        self.read().children.get(name).cloned()
    }

    /// Shorthand for `children(name).get(0)`.
    pub fn first_child(&self, name: &str) -> Value {
        self.children(name).get(0)
    }

    /// Install `vector` under `name`, replacing any existing vector.
    /// This is how a field is turned into a link.
    pub fn set_children(&self, name: &str, vector: ValueVector) {
        self.write().children.insert(name.to_string(), vector);
    }

    pub fn remove_children(&self, name: &str) -> Option<ValueVector> {
        self.write().children.remove(name)
    }

    fn children_snapshot(&self) -> Vec<(String, ValueVector)> {
        self.read()
            .children
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ── Copying ──

    /// Merge `other` into this node: its scalar is copied (when defined) and
    /// every child vector is deep-copied positionally into the matching
    /// vector here.
    pub fn deep_copy(&self, other: &Value) {
        if self.ptr_eq(other) {
            return;
        }
        let scalar = other.scalar();
        if scalar.is_defined() {
            self.write().scalar = scalar;
        }
        for (name, source) in other.children_snapshot() {
            self.children(&name).deep_copy(&source);
        }
    }

    /// An independent copy of this subtree. Linked child vectors stay links
    /// to the same path.
    pub fn create_clone(&self) -> Value {
        let copy = Value::from_scalar(self.scalar());
        let children: BTreeMap<String, ValueVector> = self
            .children_snapshot()
            .into_iter()
            .map(|(name, vec)| (name, vec.create_clone()))
            .collect();
        copy.write().children = children;
        copy
    }
}

impl fmt::Debug for Value {
    // Shallow on purpose: children may be links into other trees.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.read();
        let mut s = f.debug_struct("Value");
        s.field("scalar", &node.scalar);
        let fields: Vec<(&str, bool)> = node
            .children
            .iter()
            .map(|(k, v)| (k.as_str(), v.is_link()))
            .collect();
        s.field("children", &fields);
        s.finish()
    }
}

macro_rules! value_from_scalar {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(scalar: $t) -> Self {
                    Value::from_scalar(scalar)
                }
            }
        )*
    };
}

value_from_scalar!(&str, String, i64, i32, f64, bool, Vec<u8>, Scalar);
