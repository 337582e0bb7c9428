use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::schema::ScalarKind;

/// A single value held by a property slot or container element.
///
/// References are stored as the target's [`EntityId`], never as a live handle,
/// so a stored reference survives every versioning operation and resolves (or
/// fails to resolve) against whichever state it is read from.
///
/// `Value` implements `Eq` and `Ord` so it can key a `BTreeSet`. Floats are
/// compared with `f64::total_cmp`, which gives NaN a fixed position instead of
/// poisoning the ordering.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ref(EntityId),
}

impl Value {
    /// Discriminant rank used to order values of different kinds.
    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Ref(_) => 4,
        }
    }

    /// Human-readable kind name, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Ref(_) => "reference",
        }
    }

    /// Returns `true` if this value is a scalar of the given kind.
    pub fn is_scalar_of(&self, kind: ScalarKind) -> bool {
        matches!(
            (self, kind),
            (Value::Bool(_), ScalarKind::Bool)
                | (Value::Int(_), ScalarKind::Int)
                | (Value::Float(_), ScalarKind::Float)
                | (Value::Str(_), ScalarKind::Str)
        )
    }

    /// The referenced entity id, if this is a reference.
    pub fn as_ref_id(&self) -> Option<EntityId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Bool(b) => b.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Float(x) => x.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Ref(id) => id.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Ref(id) => write!(f, "→{}", id.short()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Ref(id)
    }
}

/// Key of a map-valued property.
///
/// Maps are keyed either by string or by entity id; the declared
/// [`MapKeyKind`](crate::schema::MapKeyKind) of the property decides which.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MapKey {
    Str(String),
    Id(EntityId),
}

impl MapKey {
    /// Human-readable kind name, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            MapKey::Str(_) => "string",
            MapKey::Id(_) => "id",
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Str(s) => write!(f, "{s}"),
            MapKey::Id(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::Str(s.to_string())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        MapKey::Str(s)
    }
}

impl From<EntityId> for MapKey {
    fn from(id: EntityId) -> Self {
        MapKey::Id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn float_equality_uses_bits() {
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn mixed_kinds_are_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Bool(true), Value::Int(1));
    }

    #[test]
    fn values_key_a_btree_set() {
        let mut set = BTreeSet::new();
        set.insert(Value::Int(2));
        set.insert(Value::Int(1));
        set.insert(Value::Float(f64::NAN));
        set.insert(Value::Str("a".into()));
        assert_eq!(set.len(), 4);
        assert!(set.contains(&Value::Float(f64::NAN)));
    }

    #[test]
    fn ordering_groups_by_kind_rank() {
        let mut values = vec![
            Value::Str("z".into()),
            Value::Int(3),
            Value::Bool(false),
            Value::Float(0.5),
        ];
        values.sort();
        assert_eq!(values[0], Value::Bool(false));
        assert_eq!(values[3], Value::Str("z".into()));
    }

    #[test]
    fn scalar_kind_check() {
        assert!(Value::Int(7).is_scalar_of(ScalarKind::Int));
        assert!(!Value::Int(7).is_scalar_of(ScalarKind::Float));
        assert!(!Value::Ref(EntityId::generate()).is_scalar_of(ScalarKind::Str));
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from("abc"), Value::Str("abc".into()));
        assert_eq!(Value::from(5i64), Value::Int(5));
        let id = EntityId::generate();
        assert_eq!(Value::from(id).as_ref_id(), Some(id));
    }

    #[test]
    fn map_key_orders_strings_before_ids() {
        let a = MapKey::from("alpha");
        let b = MapKey::from(EntityId::generate());
        assert!(a < b);
    }
}
