//! Initial-value trees for entity creation.
//!
//! An [`InitObject`] describes the starting property values of a new entity,
//! including nested objects to create alongside it. Nested objects are held
//! behind `Arc` so one object can appear at several points of the tree;
//! materialization creates each distinct `Arc` exactly once and wires every
//! other occurrence to the same entity.

use std::collections::BTreeMap;
use std::sync::Arc;

use varve_types::{EntityId, MapKey, Value};

use crate::access::Entity;

/// Initial property values for one entity to create.
#[derive(Clone, Debug, Default)]
pub struct InitObject {
    pub values: BTreeMap<String, InitValue>,
}

impl InitObject {
    /// An initializer that sets nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one property's initial value.
    pub fn with(mut self, property: impl Into<String>, value: impl Into<InitValue>) -> Self {
        self.values.insert(property.into(), value.into());
        self
    }
}

/// One initial value.
#[derive(Clone, Debug)]
pub enum InitValue {
    /// A scalar, or a reference to an entity that already exists.
    Value(Value),
    /// A reference to an existing entity by handle.
    Entity(Entity),
    /// A nested entity to create; the property's declared reference target
    /// decides its type.
    New(Arc<InitObject>),
    /// Elements of a list-valued property.
    List(Vec<InitValue>),
    /// Elements of a set-valued property.
    Set(Vec<InitValue>),
    /// Entries of a map-valued property.
    Map(Vec<(MapKey, InitValue)>),
}

impl InitValue {
    /// A nested object to create.
    pub fn object(init: InitObject) -> Self {
        InitValue::New(Arc::new(init))
    }

    /// Another occurrence of an already-shared nested object.
    pub fn shared(init: &Arc<InitObject>) -> Self {
        InitValue::New(Arc::clone(init))
    }

    pub fn list(items: impl IntoIterator<Item = InitValue>) -> Self {
        InitValue::List(items.into_iter().collect())
    }

    pub fn set(items: impl IntoIterator<Item = InitValue>) -> Self {
        InitValue::Set(items.into_iter().collect())
    }

    pub fn map(entries: impl IntoIterator<Item = (MapKey, InitValue)>) -> Self {
        InitValue::Map(entries.into_iter().collect())
    }
}

impl From<Value> for InitValue {
    fn from(value: Value) -> Self {
        InitValue::Value(value)
    }
}

impl From<bool> for InitValue {
    fn from(b: bool) -> Self {
        InitValue::Value(Value::Bool(b))
    }
}

impl From<i64> for InitValue {
    fn from(n: i64) -> Self {
        InitValue::Value(Value::Int(n))
    }
}

impl From<f64> for InitValue {
    fn from(x: f64) -> Self {
        InitValue::Value(Value::Float(x))
    }
}

impl From<&str> for InitValue {
    fn from(s: &str) -> Self {
        InitValue::Value(Value::Str(s.to_string()))
    }
}

impl From<String> for InitValue {
    fn from(s: String) -> Self {
        InitValue::Value(Value::Str(s))
    }
}

impl From<EntityId> for InitValue {
    fn from(id: EntityId) -> Self {
        InitValue::Value(Value::Ref(id))
    }
}

impl From<Entity> for InitValue {
    fn from(handle: Entity) -> Self {
        InitValue::Entity(handle)
    }
}

impl From<Arc<InitObject>> for InitValue {
    fn from(init: Arc<InitObject>) -> Self {
        InitValue::New(init)
    }
}

impl From<InitObject> for InitValue {
    fn from(init: InitObject) -> Self {
        InitValue::New(Arc::new(init))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_values() {
        let init = InitObject::new()
            .with("name", "Iain")
            .with("age", 61i64)
            .with("active", true);
        assert_eq!(init.values.len(), 3);
        assert!(matches!(
            init.values.get("name"),
            Some(InitValue::Value(Value::Str(_)))
        ));
    }

    #[test]
    fn shared_occurrences_point_at_one_object() {
        let nested = Arc::new(InitObject::new().with("title", "Use of Weapons"));
        let a = InitValue::shared(&nested);
        let b = InitValue::shared(&nested);
        match (&a, &b) {
            (InitValue::New(x), InitValue::New(y)) => assert!(Arc::ptr_eq(x, y)),
            _ => panic!("expected shared objects"),
        }
    }
}
