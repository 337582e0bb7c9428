//! Read-only views over ledger states.
//!
//! A [`StateView`] borrows the store and reads one state, current or
//! historical, through the same resolution rules everywhere: entities are
//! found by id in that state's table, and reference values resolve against
//! that state. Views are `Copy`; minting one costs nothing.

use serde::Serialize;

use varve_types::{ChangeRecord, EntityId, PropertyKind, Schema, Shape, Stamp, Value};

use crate::access::Entity;
use crate::containers::{self, ListRef, MapRef, SetRef};
use crate::error::{StoreError, StoreResult};
use crate::record::CopyIdx;
use crate::state::State;
use crate::store::Store;

/// Read-only view of one state.
#[derive(Clone, Copy)]
pub struct StateView<'s> {
    pub(crate) store: &'s Store,
    pub(crate) state: &'s State,
    pub(crate) index: usize,
}

impl<'s> StateView<'s> {
    /// Ledger index of the viewed state.
    pub fn index(self) -> usize {
        self.index
    }

    /// The schema the viewed store runs on.
    pub fn schema(self) -> &'s Schema {
        self.store.schema()
    }

    /// Stamp of the viewed state.
    pub fn stamp(self) -> Stamp {
        self.state.stamp()
    }

    /// Number of live entities in the viewed state.
    pub fn entity_count(self) -> usize {
        self.state.entity_count()
    }

    /// The changes recorded by the transaction that produced this state.
    /// Empty for the genesis state.
    pub fn changes(self) -> &'s [ChangeRecord] {
        self.state.log()
    }

    /// Whether `id` is live in this state.
    pub fn contains(self, id: EntityId) -> bool {
        self.state.contains(id)
    }

    /// Handle for `id` in this state, if live.
    pub fn get(self, id: EntityId) -> Option<Entity> {
        self.store.handle_at(self.index, id)
    }

    /// Handles for every entity live in this state, in id order.
    pub fn entities(self) -> Vec<Entity> {
        self.state
            .entries()
            .filter_map(|(id, _)| self.store.handle_at(self.index, id))
            .collect()
    }

    /// Type name of an entity.
    pub fn type_of(self, target: Entity) -> StoreResult<&'s str> {
        let cidx = self.resolve(target)?;
        Ok(self.store.type_name_of(self.store.arena.get(cidx).type_idx()))
    }

    /// Raw value of a single-valued property; `None` when unset.
    pub fn value(self, target: Entity, property: &str) -> StoreResult<Option<Value>> {
        let cidx = self.resolve(target)?;
        let type_idx = self.store.arena.get(cidx).type_idx();
        let (prop_idx, prop) = self.store.prop_of(type_idx, property)?;
        if prop.shape() != Shape::Single {
            return Err(StoreError::InvalidValue {
                type_name: self.store.type_name_of(type_idx).to_string(),
                property: property.to_string(),
                reason: format!("expected a single property, found {}", prop.shape()),
            });
        }
        Ok(self
            .store
            .arena
            .get(cidx)
            .slot(prop_idx)
            .as_single()
            .cloned()
            .unwrap_or(None))
    }

    /// Scalar property value; `None` when unset.
    pub fn scalar(self, target: Entity, property: &str) -> StoreResult<Option<Value>> {
        let cidx = self.resolve(target)?;
        let type_idx = self.store.arena.get(cidx).type_idx();
        let (prop_idx, prop) = self.store.prop_of(type_idx, property)?;
        if !matches!(prop.kind, PropertyKind::Scalar(_)) {
            return Err(StoreError::InvalidValue {
                type_name: self.store.type_name_of(type_idx).to_string(),
                property: property.to_string(),
                reason: "not a scalar property".to_string(),
            });
        }
        Ok(self
            .store
            .arena
            .get(cidx)
            .slot(prop_idx)
            .as_single()
            .cloned()
            .unwrap_or(None))
    }

    /// Single-reference property resolved in this state. `None` when the
    /// slot is unset or its target is not live here.
    pub fn reference(self, target: Entity, property: &str) -> StoreResult<Option<Entity>> {
        let cidx = self.resolve(target)?;
        let type_idx = self.store.arena.get(cidx).type_idx();
        let (prop_idx, prop) = self.store.prop_of(type_idx, property)?;
        if !matches!(prop.kind, PropertyKind::Reference(_)) {
            return Err(StoreError::InvalidValue {
                type_name: self.store.type_name_of(type_idx).to_string(),
                property: property.to_string(),
                reason: "not a single-reference property".to_string(),
            });
        }
        let id = self
            .store
            .arena
            .get(cidx)
            .slot(prop_idx)
            .as_single()
            .and_then(|v| v.as_ref())
            .and_then(Value::as_ref_id);
        Ok(id.and_then(|id| self.store.handle_at(self.index, id)))
    }

    /// Read view of a list property.
    pub fn list(self, target: Entity, property: &str) -> StoreResult<ListRef<'s>> {
        let (cidx, prop) =
            containers::view_prop(self.store, self.index, target.id(), property, Shape::List)?;
        Ok(ListRef {
            store: self.store,
            state: self.index,
            cidx,
            prop,
        })
    }

    /// Read view of a set property.
    pub fn set(self, target: Entity, property: &str) -> StoreResult<SetRef<'s>> {
        let (cidx, prop) =
            containers::view_prop(self.store, self.index, target.id(), property, Shape::Set)?;
        Ok(SetRef {
            store: self.store,
            state: self.index,
            cidx,
            prop,
        })
    }

    /// Read view of a map property.
    pub fn map(self, target: Entity, property: &str) -> StoreResult<MapRef<'s>> {
        let (cidx, prop) =
            containers::view_prop(self.store, self.index, target.id(), property, Shape::Map)?;
        Ok(MapRef {
            store: self.store,
            state: self.index,
            cidx,
            prop,
        })
    }

    /// All entities of one type, oldest creation first.
    pub fn find(self, type_name: &str) -> StoreResult<Vec<Entity>> {
        let type_idx = self
            .store
            .schema
            .type_idx(type_name)
            .ok_or_else(|| StoreError::UnknownType(type_name.to_string()))?;
        // table iteration is id-ordered, and v7 ids sort by creation time
        Ok(self
            .state
            .entries()
            .filter(|(_, cidx)| self.store.arena.get(*cidx).type_idx() == type_idx)
            .filter_map(|(id, _)| self.store.handle_at(self.index, id))
            .collect())
    }

    /// Entities of one type passing a predicate.
    pub fn find_where(
        self,
        type_name: &str,
        mut pred: impl FnMut(Entity) -> bool,
    ) -> StoreResult<Vec<Entity>> {
        let mut found = self.find(type_name)?;
        found.retain(|e| pred(*e));
        Ok(found)
    }

    /// Entity-level difference from this state to `other`.
    pub fn diff_to(self, other: StateView<'_>) -> StateDiff {
        diff(self.store, self.state, other.state)
    }

    fn resolve(self, target: Entity) -> StoreResult<CopyIdx> {
        self.state
            .lookup(target.id())
            .ok_or(StoreError::UnknownEntity(target.id()))
    }
}

/// Entity-level difference between two states.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StateDiff {
    /// Live in the target state but not the source.
    pub added: Vec<EntityId>,
    /// Live in the source state but not the target.
    pub removed: Vec<EntityId>,
    /// Live in both with different property values.
    pub modified: Vec<EntityId>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Compare two states entity by entity. Sharing makes the common case
/// cheap: entities whose table entries point at the same copy are skipped
/// without touching their slots.
pub(crate) fn diff(store: &Store, from: &State, to: &State) -> StateDiff {
    let mut out = StateDiff::default();
    for (id, to_idx) in to.entries() {
        match from.lookup(id) {
            None => out.added.push(id),
            Some(from_idx) if from_idx != to_idx => {
                let a = store.arena.get(from_idx);
                let b = store.arena.get(to_idx);
                if !a.slots_eq(b) {
                    out.modified.push(id);
                }
            }
            Some(_) => {}
        }
    }
    for (id, _) in from.entries() {
        if !to.contains(id) {
            out.removed.push(id);
        }
    }
    out
}
