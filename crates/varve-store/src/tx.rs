//! Transactions.
//!
//! Every mutation runs inside a transaction. [`Store::update`] opens a fresh
//! state, hands a [`Tx`] to the mutator closure, and commits or rolls back
//! when the closure returns. The convenience mutators on [`Store`] wrap a
//! single operation in its own transaction the same way.
//!
//! # Invariants
//!
//! - At most one transaction is open per store; [`Store::update`] inside a
//!   mutator fails with [`StoreError::NestedTransaction`].
//! - A mutator that returns `Err` rolls the open state back completely; the
//!   ledger and arena end exactly where they started.
//! - A vetoed mutation poisons the transaction: even if the mutator catches
//!   the error and returns `Ok`, the commit is refused and rolled back.
//! - A transaction whose change log ends up empty leaves no state behind;
//!   no commit notification fires.
//! - A panic inside the mutator propagates. The store keeps the half-open
//!   state, and every later `update` fails with `NestedTransaction`; a store
//!   that survived a panicking mutator is done mutating.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use varve_types::{
    ChangeRecord, ElementKind, EntityId, MapKey, PropertyKind, Shape, Value,
};
use varve_events::CommitNotice;

use crate::access::Entity;
use crate::containers::{ListMut, MapMut, PropCtx, SetMut};
use crate::error::{StoreError, StoreResult};
use crate::init::{InitObject, InitValue};
use crate::inverse;
use crate::record::{CopyIdx, EntityRecord};
use crate::store::Store;

/// One copy-on-write clone made during the open transaction.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CloneEntry {
    pub id: EntityId,
    pub old: CopyIdx,
    pub new: CopyIdx,
}

/// Bookkeeping for the open transaction.
#[derive(Debug, Default)]
pub(crate) struct OpenTx {
    /// Clones made so far, in order. Commit unwinds the ones whose entity
    /// never reached the change log.
    pub clones: Vec<CloneEntry>,
    /// Set when a before-hook vetoed a mutation; forces rollback at commit.
    pub vetoed: bool,
}

impl Store {
    /// Run `mutator` inside a transaction against a fresh state.
    ///
    /// Commits if the mutator returns `Ok` and no veto fired; rolls back
    /// otherwise. A transaction that ends up changing nothing is discarded
    /// without leaving a state in history.
    pub fn update<T>(
        &mut self,
        mutator: impl FnOnce(&mut Tx<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.begin()?;
        let result = {
            let mut tx = Tx { store: self };
            mutator(&mut tx)
        };
        self.finish(result)
    }

    /// Like [`Store::update`], but re-resolves `root` afterwards and returns
    /// its post-commit handle. Fails with [`StoreError::UnknownEntity`] if
    /// the mutator deleted the root.
    pub fn update_with_root(
        &mut self,
        root: Entity,
        mutator: impl FnOnce(&mut Tx<'_>) -> StoreResult<()>,
    ) -> StoreResult<Entity> {
        self.update(mutator)?;
        self.entity(root.id())
    }

    /// Create one entity in its own transaction.
    pub fn create(&mut self, type_name: &str, init: InitObject) -> StoreResult<Entity> {
        self.update(|tx| tx.create(type_name, init))
    }

    /// Delete one entity in its own transaction.
    pub fn delete(&mut self, target: Entity) -> StoreResult<()> {
        self.update(|tx| tx.delete(target))
    }

    /// Set one scalar property in its own transaction.
    pub fn set_scalar(
        &mut self,
        target: Entity,
        property: &str,
        value: impl Into<Value>,
    ) -> StoreResult<()> {
        let value = value.into();
        self.update(|tx| tx.set_scalar(target, property, value))
    }

    /// Set one reference property in its own transaction.
    pub fn set_reference(
        &mut self,
        target: Entity,
        property: &str,
        value: Option<Entity>,
    ) -> StoreResult<()> {
        self.update(|tx| tx.set_reference(target, property, value))
    }

    /// Clear one single-valued property in its own transaction.
    pub fn clear(&mut self, target: Entity, property: &str) -> StoreResult<()> {
        self.update(|tx| tx.clear(target, property))
    }

    fn begin(&mut self) -> StoreResult<()> {
        if self.tx.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        let stamp = self.ledger.open_state(&mut self.arena);
        self.tx = Some(OpenTx::default());
        debug!(%stamp, "transaction opened");
        Ok(())
    }

    fn finish<T>(&mut self, result: StoreResult<T>) -> StoreResult<T> {
        let open = self
            .tx
            .take()
            .expect("open transaction bookkeeping is missing");
        match result {
            Ok(value) if !open.vetoed => {
                self.commit_open(open);
                Ok(value)
            }
            Ok(_) => {
                self.rollback_open(open);
                Err(StoreError::TransactionVetoed)
            }
            Err(err) => {
                self.rollback_open(open);
                Err(err)
            }
        }
    }

    fn commit_open(&mut self, open: OpenTx) {
        // Entities that logged at least one change keep their new copies.
        // Clones made for mutations that were then suppressed as no-ops are
        // unwound so the state keeps sharing the predecessor copy.
        let changed: BTreeSet<EntityId> = self
            .ledger
            .current()
            .log()
            .iter()
            .map(|record| record.entity)
            .collect();
        for entry in &open.clones {
            self.arena.get_mut(entry.old).set_successor(None);
            if !changed.contains(&entry.id) {
                self.ledger.current_mut().insert(entry.id, entry.old);
            }
        }
        if self.ledger.current().log().is_empty() {
            self.ledger.discard_open(&mut self.arena);
            debug!("transaction changed nothing, state discarded");
            return;
        }
        let state = self.ledger.current();
        let notice = CommitNotice {
            state: self.ledger.cursor(),
            stamp: state.stamp(),
            records: state.log(),
        };
        debug!(
            state = notice.state,
            records = notice.records.len(),
            "transaction committed"
        );
        self.bus.notify_commit(notice);
    }

    fn rollback_open(&mut self, open: OpenTx) {
        // Successor pointers must drop before the arena truncates under them.
        for entry in &open.clones {
            self.arena.get_mut(entry.old).set_successor(None);
        }
        self.ledger.discard_open(&mut self.arena);
        debug!("transaction rolled back");
    }
}

/// Mutation surface of one open transaction.
///
/// Obtained through [`Store::update`]. Every method validates against the
/// schema, suppresses no-ops, offers the change to before-hooks, clones
/// entities copy-on-write as needed, maintains inverse relationships, and
/// appends to the state's change log.
pub struct Tx<'s> {
    pub(crate) store: &'s mut Store,
}

impl Tx<'_> {
    /// Read access to the store mid-transaction. Reads see the open state,
    /// mutations included.
    pub fn store(&self) -> &Store {
        self.store
    }

    /// Handle for an id in the open state.
    pub fn get(&self, id: EntityId) -> Option<Entity> {
        self.store.get(id)
    }

    /// Like [`Tx::get`], but an absent id is an error.
    pub fn entity(&self, id: EntityId) -> StoreResult<Entity> {
        self.store.entity(id)
    }

    // -----------------------------------------------------------------------
    // Creation and deletion
    // -----------------------------------------------------------------------

    /// Create an entity of `type_name` and apply the initializer tree.
    ///
    /// Nested [`InitValue::New`] objects are created as their property's
    /// declared reference target. A nested object shared between several
    /// points of the tree is created once and referenced from each.
    pub fn create(&mut self, type_name: &str, init: InitObject) -> StoreResult<Entity> {
        let mut seen = BTreeMap::new();
        let handle = self.create_empty(EntityId::generate(), type_name)?;
        self.apply_init(handle, &init, &mut seen)?;
        Ok(handle)
    }

    /// Create an entity under a caller-chosen id, with every property at its
    /// empty value. Fails with [`StoreError::DuplicateEntity`] if the id is
    /// already live.
    pub fn create_with_id(&mut self, id: EntityId, type_name: &str) -> StoreResult<Entity> {
        self.create_empty(id, type_name)
    }

    fn create_empty(&mut self, id: EntityId, type_name: &str) -> StoreResult<Entity> {
        let type_idx = self
            .store
            .schema
            .type_idx(type_name)
            .ok_or_else(|| StoreError::UnknownType(type_name.to_string()))?;
        if self.store.ledger.current().contains(id) {
            return Err(StoreError::DuplicateEntity(id));
        }
        let record = ChangeRecord::created(id, type_name);
        self.store.veto_guard(&record)?;
        let stamp = self.store.ledger.current().stamp();
        let fresh = EntityRecord::new(id, type_idx, stamp, self.store.schema.type_at(type_idx));
        let idx = self.store.arena.push(fresh);
        self.store.ledger.current_mut().insert(id, idx);
        debug!(entity = %id.short(), type_name, "entity created");
        self.store.finish_record(record);
        Ok(Entity::new(id, stamp))
    }

    /// Delete an entity, disconnecting all of its declared relationships
    /// first so no counterpart keeps a maintained slot pointing at it.
    pub fn delete(&mut self, target: Entity) -> StoreResult<()> {
        let cur = self.store.resolve_read(target)?;
        let type_idx = self.store.arena.get(cur).type_idx();
        let type_name = self.store.type_name_of(type_idx).to_string();
        let record = ChangeRecord::deleted(target.id(), &type_name);
        self.store.veto_guard(&record)?;

        let ref_props: Vec<_> = self.store.schema.type_at(type_idx).ref_props().to_vec();
        for prop_idx in ref_props {
            let Some(link) = self.store.schema.type_at(type_idx).prop(prop_idx).inverse else {
                continue;
            };
            // Re-resolve each pass: an earlier disconnection may have cloned
            // this entity (self-referencing relationships do).
            let cur = self.store.resolve_current(target.id())?;
            let counterparts = referenced_ids(self.store.arena.get(cur).slot(prop_idx));
            for counterpart in counterparts {
                inverse::apply(
                    self.store,
                    target.id(),
                    prop_idx,
                    &link,
                    Some(counterpart),
                    None,
                )?;
            }
        }

        self.store.ledger.current_mut().remove(target.id());
        debug!(entity = %target.id().short(), type_name, "entity deleted");
        self.store.finish_record(record);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Single-slot writes
    // -----------------------------------------------------------------------

    /// Set a scalar property.
    pub fn set_scalar(
        &mut self,
        target: Entity,
        property: &str,
        value: impl Into<Value>,
    ) -> StoreResult<()> {
        self.set_value(target, property, Some(value.into()))
    }

    /// Set or clear a single-reference property. The value handle, if any,
    /// must be live.
    pub fn set_reference(
        &mut self,
        target: Entity,
        property: &str,
        value: Option<Entity>,
    ) -> StoreResult<()> {
        if let Some(handle) = value {
            self.store.check_live(handle)?;
        }
        self.set_value(target, property, value.map(|h| Value::Ref(h.id())))
    }

    /// Clear a single-valued property back to unset.
    pub fn clear(&mut self, target: Entity, property: &str) -> StoreResult<()> {
        self.set_value(target, property, None)
    }

    /// Set or clear a single-valued property from a raw [`Value`].
    ///
    /// This is the generic form behind [`Tx::set_scalar`] and
    /// [`Tx::set_reference`]; scalar kinds and reference targets are checked
    /// against the schema either way.
    pub fn set_value(
        &mut self,
        target: Entity,
        property: &str,
        value: Option<Value>,
    ) -> StoreResult<()> {
        let cur = self.store.resolve_read(target)?;
        let type_idx = self.store.arena.get(cur).type_idx();
        let (prop_idx, prop) = self.store.prop_of(type_idx, property)?;
        let type_name = self.store.type_name_of(type_idx).to_string();
        let prop_name = prop.name.clone();
        let inverse_link = prop.inverse;
        match &prop.kind {
            PropertyKind::Scalar(kind) => {
                if let Some(v) = &value {
                    if !v.is_scalar_of(*kind) {
                        return Err(StoreError::InvalidValue {
                            type_name,
                            property: prop_name,
                            reason: format!("expected {kind}, got {}", v.kind_name()),
                        });
                    }
                }
            }
            PropertyKind::Reference(spec) => {
                if let Some(v) = &value {
                    let Some(rid) = v.as_ref_id() else {
                        return Err(StoreError::InvalidValue {
                            type_name,
                            property: prop_name,
                            reason: format!(
                                "expected a {} reference, got {}",
                                spec.target,
                                v.kind_name()
                            ),
                        });
                    };
                    let target_cur = self.store.resolve_current(rid)?;
                    let actual = self
                        .store
                        .type_name_of(self.store.arena.get(target_cur).type_idx());
                    if actual != spec.target {
                        return Err(StoreError::InvalidValue {
                            type_name,
                            property: prop_name,
                            reason: format!(
                                "expected a {} reference, got {actual}",
                                spec.target
                            ),
                        });
                    }
                }
            }
            _ => {
                return Err(StoreError::InvalidValue {
                    type_name,
                    property: prop_name,
                    reason: "container properties mutate through their views".to_string(),
                });
            }
        }

        let old = self
            .store
            .arena
            .get(cur)
            .slot(prop_idx)
            .as_single()
            .cloned()
            .unwrap_or(None);
        if old == value {
            return Ok(());
        }
        let record = ChangeRecord::replaced(
            target.id(),
            &type_name,
            &prop_name,
            old.clone(),
            value.clone(),
        );
        self.store.veto_guard(&record)?;
        let idx = self.store.resolve_write(target)?;
        if let Some(slot) = self
            .store
            .arena
            .get_mut(idx)
            .slot_mut(prop_idx)
            .as_single_mut()
        {
            *slot = value.clone();
        }
        if let Some(link) = inverse_link {
            let disconnected = old.as_ref().and_then(Value::as_ref_id);
            let connected = value.as_ref().and_then(Value::as_ref_id);
            inverse::apply(
                self.store,
                target.id(),
                prop_idx,
                &link,
                disconnected,
                connected,
            )?;
        }
        self.store.finish_record(record);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Container views
    // -----------------------------------------------------------------------

    /// Mutable view of a list property.
    pub fn list(&mut self, target: Entity, property: &str) -> StoreResult<ListMut<'_>> {
        let ctx = PropCtx::resolve(self.store, target, property, Shape::List)?;
        Ok(ListMut {
            store: self.store,
            ctx,
        })
    }

    /// Mutable view of a set property.
    pub fn set(&mut self, target: Entity, property: &str) -> StoreResult<SetMut<'_>> {
        let ctx = PropCtx::resolve(self.store, target, property, Shape::Set)?;
        Ok(SetMut {
            store: self.store,
            ctx,
        })
    }

    /// Mutable view of a map property.
    pub fn map(&mut self, target: Entity, property: &str) -> StoreResult<MapMut<'_>> {
        let ctx = PropCtx::resolve(self.store, target, property, Shape::Map)?;
        Ok(MapMut {
            store: self.store,
            ctx,
        })
    }

    // -----------------------------------------------------------------------
    // Initializer trees
    // -----------------------------------------------------------------------

    fn apply_init(
        &mut self,
        target: Entity,
        init: &InitObject,
        seen: &mut BTreeMap<usize, EntityId>,
    ) -> StoreResult<()> {
        for (prop_name, init_value) in &init.values {
            let cur = self.store.resolve_read(target)?;
            let type_idx = self.store.arena.get(cur).type_idx();
            let (_, prop) = self.store.prop_of(type_idx, prop_name)?;
            let shape = prop.shape();
            let ref_target = prop.ref_spec().map(|spec| spec.target.clone());
            let type_name = self.store.type_name_of(type_idx).to_string();
            match shape {
                Shape::Single => {
                    let value = match init_value {
                        InitValue::List(_) | InitValue::Set(_) | InitValue::Map(_) => {
                            return Err(invalid_init(
                                &type_name,
                                prop_name,
                                "container initializer on a single-valued property",
                            ));
                        }
                        element => self.init_element(
                            element,
                            ref_target.as_deref(),
                            &type_name,
                            prop_name,
                            seen,
                        )?,
                    };
                    self.set_value(target, prop_name, Some(value))?;
                }
                Shape::List => {
                    let InitValue::List(items) = init_value else {
                        return Err(invalid_init(&type_name, prop_name, "expected a list initializer"));
                    };
                    for item in items {
                        let value = self.init_element(
                            item,
                            ref_target.as_deref(),
                            &type_name,
                            prop_name,
                            seen,
                        )?;
                        self.list(target, prop_name)?.push(value)?;
                    }
                }
                Shape::Set => {
                    let InitValue::Set(items) = init_value else {
                        return Err(invalid_init(&type_name, prop_name, "expected a set initializer"));
                    };
                    for item in items {
                        let value = self.init_element(
                            item,
                            ref_target.as_deref(),
                            &type_name,
                            prop_name,
                            seen,
                        )?;
                        self.set(target, prop_name)?.insert(value)?;
                    }
                }
                Shape::Map => {
                    let InitValue::Map(entries) = init_value else {
                        return Err(invalid_init(&type_name, prop_name, "expected a map initializer"));
                    };
                    for (key, item) in entries {
                        let value = self.init_element(
                            item,
                            ref_target.as_deref(),
                            &type_name,
                            prop_name,
                            seen,
                        )?;
                        self.map(target, prop_name)?.insert(key.clone(), value)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Turn one element initializer into a value, creating nested objects
    /// as they are first encountered.
    fn init_element(
        &mut self,
        init: &InitValue,
        ref_target: Option<&str>,
        type_name: &str,
        prop_name: &str,
        seen: &mut BTreeMap<usize, EntityId>,
    ) -> StoreResult<Value> {
        match init {
            InitValue::Value(value) => Ok(value.clone()),
            InitValue::Entity(handle) => {
                self.store.check_live(*handle)?;
                Ok(Value::Ref(handle.id()))
            }
            InitValue::New(nested) => {
                let Some(target_type) = ref_target else {
                    return Err(invalid_init(
                        type_name,
                        prop_name,
                        "nested object initializer on a non-reference property",
                    ));
                };
                let identity = Arc::as_ptr(nested) as usize;
                if let Some(&id) = seen.get(&identity) {
                    return Ok(Value::Ref(id));
                }
                let handle = self.create_empty(EntityId::generate(), target_type)?;
                seen.insert(identity, handle.id());
                self.apply_init(handle, nested, seen)?;
                Ok(Value::Ref(handle.id()))
            }
            InitValue::List(_) | InitValue::Set(_) | InitValue::Map(_) => Err(invalid_init(
                type_name,
                prop_name,
                "nested container initializer where an element was expected",
            )),
        }
    }

    // -----------------------------------------------------------------------
    // JSON initializers
    // -----------------------------------------------------------------------

    /// Create an entity from a JSON object, interpreting each field against
    /// the schema. Reference fields accept an entity id string or a nested
    /// JSON object to create; `null` fields are skipped.
    pub fn create_from_json(
        &mut self,
        type_name: &str,
        json: &serde_json::Value,
    ) -> StoreResult<Entity> {
        let type_idx = self
            .store
            .schema
            .type_idx(type_name)
            .ok_or_else(|| StoreError::UnknownType(type_name.to_string()))?;
        let init = self.init_from_json(type_idx, json)?;
        self.create(type_name, init)
    }

    fn init_from_json(
        &self,
        type_idx: usize,
        json: &serde_json::Value,
    ) -> StoreResult<InitObject> {
        let type_name = self.store.type_name_of(type_idx).to_string();
        let serde_json::Value::Object(fields) = json else {
            return Err(invalid_init(&type_name, "<root>", "expected a JSON object"));
        };
        let mut init = InitObject::new();
        for (field, raw) in fields {
            if raw.is_null() {
                continue;
            }
            let (_, prop) = self.store.prop_of(type_idx, field)?;
            let value = match &prop.kind {
                PropertyKind::Scalar(kind) => InitValue::Value(scalar_from_json(
                    &type_name, field, *kind, raw,
                )?),
                PropertyKind::Reference(spec) => {
                    self.element_from_json(&type_name, field, &ElementKind::Reference(spec.clone()), raw)?
                }
                PropertyKind::List(elem) => {
                    let serde_json::Value::Array(items) = raw else {
                        return Err(invalid_init(&type_name, field, "expected a JSON array"));
                    };
                    InitValue::List(
                        items
                            .iter()
                            .map(|item| self.element_from_json(&type_name, field, elem, item))
                            .collect::<StoreResult<_>>()?,
                    )
                }
                PropertyKind::Set(elem) => {
                    let serde_json::Value::Array(items) = raw else {
                        return Err(invalid_init(&type_name, field, "expected a JSON array"));
                    };
                    InitValue::Set(
                        items
                            .iter()
                            .map(|item| self.element_from_json(&type_name, field, elem, item))
                            .collect::<StoreResult<_>>()?,
                    )
                }
                PropertyKind::Map { key, value } => {
                    let serde_json::Value::Object(entries) = raw else {
                        return Err(invalid_init(&type_name, field, "expected a JSON object"));
                    };
                    let mut converted = Vec::with_capacity(entries.len());
                    for (k, item) in entries {
                        let map_key = match key {
                            varve_types::MapKeyKind::Str => MapKey::Str(k.clone()),
                            varve_types::MapKeyKind::Id => MapKey::Id(
                                EntityId::parse(k).map_err(|_| {
                                    invalid_init(
                                        &type_name,
                                        field,
                                        format!("map key {k:?} is not an entity id"),
                                    )
                                })?,
                            ),
                        };
                        converted.push((
                            map_key,
                            self.element_from_json(&type_name, field, value, item)?,
                        ));
                    }
                    InitValue::Map(converted)
                }
            };
            init.values.insert(field.clone(), value);
        }
        Ok(init)
    }

    fn element_from_json(
        &self,
        type_name: &str,
        field: &str,
        elem: &ElementKind,
        raw: &serde_json::Value,
    ) -> StoreResult<InitValue> {
        match elem {
            ElementKind::Scalar(kind) => Ok(InitValue::Value(scalar_from_json(
                type_name, field, *kind, raw,
            )?)),
            ElementKind::Reference(spec) => match raw {
                serde_json::Value::String(s) => {
                    let id = EntityId::parse(s).map_err(|_| {
                        invalid_init(type_name, field, format!("{s:?} is not an entity id"))
                    })?;
                    Ok(InitValue::Value(Value::Ref(id)))
                }
                serde_json::Value::Object(_) => {
                    let target_idx = self.store.schema.type_idx(&spec.target).ok_or_else(|| {
                        StoreError::UnknownType(spec.target.clone())
                    })?;
                    let nested = self.init_from_json(target_idx, raw)?;
                    Ok(InitValue::object(nested))
                }
                other => Err(invalid_init(
                    type_name,
                    field,
                    format!("expected an id string or object, got {other}"),
                )),
            },
        }
    }
}

/// Ids referenced anywhere in a slot, deduplicated.
fn referenced_ids(slot: &crate::record::Slot) -> BTreeSet<EntityId> {
    use crate::record::Slot;
    let mut out = BTreeSet::new();
    match slot {
        Slot::Single(value) => {
            if let Some(id) = value.as_ref().and_then(Value::as_ref_id) {
                out.insert(id);
            }
        }
        Slot::List(items) => out.extend(items.iter().filter_map(Value::as_ref_id)),
        Slot::Set(items) => out.extend(items.iter().filter_map(Value::as_ref_id)),
        Slot::Map(entries) => out.extend(entries.values().filter_map(Value::as_ref_id)),
    }
    out
}

fn invalid_init(type_name: &str, property: &str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidValue {
        type_name: type_name.to_string(),
        property: property.to_string(),
        reason: reason.into(),
    }
}

fn scalar_from_json(
    type_name: &str,
    property: &str,
    kind: varve_types::ScalarKind,
    raw: &serde_json::Value,
) -> StoreResult<Value> {
    use varve_types::ScalarKind;
    let converted = match (kind, raw) {
        (ScalarKind::Bool, serde_json::Value::Bool(b)) => Some(Value::Bool(*b)),
        (ScalarKind::Int, serde_json::Value::Number(n)) => n.as_i64().map(Value::Int),
        (ScalarKind::Float, serde_json::Value::Number(n)) => n.as_f64().map(Value::Float),
        (ScalarKind::Str, serde_json::Value::String(s)) => Some(Value::Str(s.clone())),
        _ => None,
    };
    converted.ok_or_else(|| invalid_init(type_name, property, format!("expected {kind}, got {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use varve_events::{Hook, Pattern};
    use varve_types::{
        ElementKind, MapKeyKind, Operation, PropertyDescriptor, RefSpec, ScalarKind,
        TypeDescriptor,
    };

    fn catalog() -> Store {
        let types = vec![
            TypeDescriptor::new("Author")
                .with(PropertyDescriptor::scalar("name", ScalarKind::Str))
                .with(PropertyDescriptor::list(
                    "books",
                    ElementKind::Reference(
                        RefSpec::to("Book").with_inverse("author", Shape::Single),
                    ),
                )),
            TypeDescriptor::new("Book")
                .with(PropertyDescriptor::scalar("title", ScalarKind::Str))
                .with(PropertyDescriptor::reference(
                    "author",
                    RefSpec::to("Author").with_inverse("books", Shape::List),
                ))
                .with(PropertyDescriptor::set(
                    "tags",
                    ElementKind::Scalar(ScalarKind::Str),
                ))
                .with(PropertyDescriptor::map(
                    "ratings",
                    MapKeyKind::Str,
                    ElementKind::Scalar(ScalarKind::Int),
                )),
            TypeDescriptor::new("Note")
                .with(PropertyDescriptor::scalar("text", ScalarKind::Str)),
        ];
        Store::from_descriptors(types).unwrap()
    }

    #[test]
    fn update_batches_changes_into_one_state() {
        let mut store = catalog();
        store
            .update(|tx| {
                let author = tx.create("Author", InitObject::new().with("name", "Banks"))?;
                let book = tx.create("Book", InitObject::new().with("title", "Matter"))?;
                tx.set_reference(book, "author", Some(author))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.state_count(), 2);
        // two creates, two initializer replaces, the author assignment, and
        // the silent inverse add on the author's books list
        assert_eq!(store.changes().len(), 6);
    }

    #[test]
    fn error_rolls_back_everything() {
        let mut store = catalog();
        let existing = store.create("Note", InitObject::new()).unwrap();
        let states = store.state_count();

        let result: StoreResult<()> = store.update(|tx| {
            tx.create("Author", InitObject::new())?;
            tx.set_scalar(existing, "text", "touched")?;
            Err(StoreError::UnknownType("forced".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.state_count(), states);
        assert_eq!(store.scalar(existing, "text").unwrap(), None);
        assert_eq!(store.find("Author").unwrap().len(), 0);
    }

    #[test]
    fn veto_poisons_even_when_the_mutator_catches_it() {
        let mut store = catalog();
        let note = store.create("Note", InitObject::new()).unwrap();
        store.on_before(Pattern::any().operation(Operation::Update), |_| Hook::Veto);

        let result = store.update(|tx| {
            // swallow the veto error and pretend all is well
            let _ = tx.set_scalar(note, "text", "sneaky");
            Ok(())
        });
        assert_eq!(result, Err(StoreError::TransactionVetoed));
        assert_eq!(store.scalar(note, "text").unwrap(), None);
    }

    #[test]
    fn transaction_that_changes_nothing_leaves_no_state() {
        let mut store = catalog();
        let note = store
            .create("Note", InitObject::new().with("text", "same"))
            .unwrap();
        let states = store.state_count();
        let commits = std::sync::Arc::new(AtomicUsize::new(0));
        let seen = std::sync::Arc::clone(&commits);
        store.on_commit(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.set_scalar(note, "text", "same").unwrap();
        store.update(|_tx| Ok(())).unwrap();

        assert_eq!(store.state_count(), states);
        assert_eq!(commits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unwound_clone_keeps_sharing_the_old_copy() {
        let mut store = catalog();
        let touched = store.create("Note", InitObject::new().with("text", "t")).unwrap();
        let untouched = store.create("Note", InitObject::new().with("text", "u")).unwrap();
        let before = store.cursor();

        store
            .update(|tx| {
                tx.set_scalar(untouched, "text", "u")?; // suppressed no-op
                tx.set_scalar(touched, "text", "t2")?;
                Ok(())
            })
            .unwrap();

        let diff = store.diff_states(before, store.cursor()).unwrap();
        assert_eq!(diff.modified, vec![touched.id()]);
    }

    #[test]
    fn panicking_mutator_poisons_the_store() {
        let mut store = catalog();
        let escaped = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = store.update(|_tx| -> StoreResult<()> { panic!("mutator blew up") });
        }));
        assert!(escaped.is_err());
        assert_eq!(
            store.update(|_tx| Ok(())),
            Err(StoreError::NestedTransaction)
        );
        assert_eq!(store.undo(), Err(StoreError::NestedTransaction));
    }

    #[test]
    fn create_with_id_rejects_live_ids() {
        let mut store = catalog();
        let id = EntityId::generate();
        store
            .update(|tx| tx.create_with_id(id, "Note"))
            .unwrap();
        let result = store.update(|tx| tx.create_with_id(id, "Note"));
        assert_eq!(result, Err(StoreError::DuplicateEntity(id)));
    }

    #[test]
    fn mid_transaction_reads_see_uncommitted_changes() {
        let mut store = catalog();
        store
            .update(|tx| {
                let note = tx.create("Note", InitObject::new().with("text", "draft"))?;
                assert_eq!(
                    tx.store().scalar(note, "text")?,
                    Some(Value::from("draft"))
                );
                tx.delete(note)?;
                assert!(tx.get(note.id()).is_none());
                Ok(())
            })
            .unwrap();
        // create plus delete of the same entity still commits as a state
        assert_eq!(store.state_count(), 2);
    }

    #[test]
    fn delete_unwires_a_self_linked_entity() {
        let types = vec![TypeDescriptor::new("Node")
            .with(PropertyDescriptor::list(
                "children",
                ElementKind::Reference(
                    RefSpec::to("Node").with_inverse("parent", Shape::Single),
                ),
            ))
            .with(PropertyDescriptor::reference(
                "parent",
                RefSpec::to("Node").with_inverse("children", Shape::List),
            ))];
        let mut store = Store::from_descriptors(types).unwrap();

        let node = store.create("Node", InitObject::new()).unwrap();
        store
            .update(|tx| tx.list(node, "children")?.push(node.id()))
            .unwrap();
        assert_eq!(
            store.reference(node, "parent").unwrap().map(|e| e.id()),
            Some(node.id())
        );

        // Disconnecting `children` clones the node, so the `parent` pass
        // must read that clone rather than the copy the walk started from.
        store.delete(node).unwrap();
        assert!(store.get(node.id()).is_none());
        assert_eq!(store.entity_count(), 0);

        assert!(store.undo().unwrap());
        let revived = store.entity(node.id()).unwrap();
        assert_eq!(
            store.list(revived, "children").unwrap().values(),
            vec![Value::Ref(node.id())]
        );
        assert_eq!(
            store.reference(revived, "parent").unwrap().map(|e| e.id()),
            Some(node.id())
        );
    }

    #[test]
    fn scalar_kind_mismatch_is_rejected() {
        let mut store = catalog();
        let note = store.create("Note", InitObject::new()).unwrap();
        let result = store.set_scalar(note, "text", 42i64);
        assert!(matches!(
            result,
            Err(StoreError::InvalidValue { property, .. }) if property == "text"
        ));
    }

    #[test]
    fn reference_target_type_is_checked() {
        let mut store = catalog();
        let book = store.create("Book", InitObject::new()).unwrap();
        let note = store.create("Note", InitObject::new()).unwrap();
        let result = store.set_reference(book, "author", Some(note));
        assert!(matches!(result, Err(StoreError::InvalidValue { .. })));
    }

    #[test]
    fn container_properties_refuse_single_slot_writes() {
        let mut store = catalog();
        let book = store.create("Book", InitObject::new()).unwrap();
        let result = store.update(|tx| tx.set_value(book, "tags", Some(Value::from("x"))));
        assert!(matches!(result, Err(StoreError::InvalidValue { .. })));
    }

    #[test]
    fn init_tree_creates_nested_objects() {
        let mut store = catalog();
        let book = store
            .create(
                "Book",
                InitObject::new()
                    .with("title", "Excession")
                    .with("author", InitObject::new().with("name", "Banks")),
            )
            .unwrap();

        let author = store.reference(book, "author").unwrap().unwrap();
        assert_eq!(
            store.scalar(author, "name").unwrap(),
            Some(Value::from("Banks"))
        );
        // the inverse connected during initialization
        assert_eq!(
            store.list(author, "books").unwrap().values(),
            vec![Value::Ref(book.id())]
        );
    }

    #[test]
    fn shared_init_object_materializes_once() {
        let mut store = catalog();
        let book = Arc::new(InitObject::new().with("title", "shared"));
        let author = store
            .create(
                "Author",
                InitObject::new().with(
                    "books",
                    InitValue::list([InitValue::shared(&book), InitValue::shared(&book)]),
                ),
            )
            .unwrap();

        assert_eq!(store.find("Book").unwrap().len(), 1);
        let books = store.list(author, "books").unwrap();
        assert_eq!(books.len(), 2);
        assert_eq!(books.get(0), books.get(1));
    }

    #[test]
    fn create_from_json_walks_the_schema() {
        let mut store = catalog();
        let book = store
            .update(|tx| {
                tx.create_from_json(
                    "Book",
                    &json!({
                        "title": "Matter",
                        "author": { "name": "Banks" },
                        "tags": ["sf", "culture"],
                        "ratings": { "nyt": 5 }
                    }),
                )
            })
            .unwrap();

        assert_eq!(
            store.scalar(book, "title").unwrap(),
            Some(Value::from("Matter"))
        );
        let author = store.reference(book, "author").unwrap().unwrap();
        assert_eq!(
            store.scalar(author, "name").unwrap(),
            Some(Value::from("Banks"))
        );
        assert_eq!(store.set(book, "tags").unwrap().len(), 2);
        assert_eq!(
            store
                .map(book, "ratings")
                .unwrap()
                .get(&MapKey::from("nyt")),
            Some(&Value::Int(5))
        );
    }

    #[test]
    fn create_from_json_rejects_unknown_fields_and_bad_kinds() {
        let mut store = catalog();
        let unknown = store.update(|tx| {
            tx.create_from_json("Note", &json!({ "subtitle": "nope" }))
        });
        assert!(matches!(
            unknown,
            Err(StoreError::UnknownProperty { .. })
        ));

        let bad_kind = store.update(|tx| {
            tx.create_from_json("Note", &json!({ "text": 12 }))
        });
        assert!(matches!(bad_kind, Err(StoreError::InvalidValue { .. })));
    }

    #[test]
    fn update_with_root_returns_the_post_commit_handle() {
        let mut store = catalog();
        let note = store.create("Note", InitObject::new()).unwrap();
        let same = store
            .update_with_root(note, |tx| tx.set_scalar(note, "text", "v"))
            .unwrap();
        assert_eq!(same.id(), note.id());

        let gone = store.update_with_root(note, |tx| tx.delete(note));
        assert_eq!(gone, Err(StoreError::UnknownEntity(note.id())));
    }
}
