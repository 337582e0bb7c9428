//! Entity handles and physical-copy resolution.
//!
//! A handle pairs an entity's stable id with the stamp of the state it was
//! obtained from. Handles stay cheap and copyable; every access re-resolves
//! them against the ledger, which is what makes reads version-safe and
//! writes copy-on-write.
//!
//! # Invariants
//!
//! - Read resolution first checks that the handle's birth stamp is an
//!   ancestor of the active state, then resolves the id through the active
//!   table. Handles from truncated redo branches fail the first check;
//!   deleted entities fail the second.
//! - Write resolution clones the current copy into the open state at most
//!   once per entity per transaction; a copy already born at the active
//!   stamp is written in place.

use std::fmt;

use tracing::trace;

use varve_types::{ChangeRecord, EntityId, PropIdx, PropSchema, Stamp, TypeIdx};

use crate::error::{StoreError, StoreResult};
use crate::record::CopyIdx;
use crate::store::Store;
use crate::tx::CloneEntry;

/// Cheap, copyable reference to one entity.
///
/// Carries the id plus the stamp of the state the handle was minted in.
/// Handles never pin entity data; they are revalidated on every use, so a
/// handle held across undo, redo, and further edits either resolves to the
/// entity's current copy or fails with a precise error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    id: EntityId,
    born: Stamp,
}

impl Entity {
    pub(crate) fn new(id: EntityId, born: Stamp) -> Self {
        Self { id, born }
    }

    /// The entity's stable id.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Stamp of the state this handle was minted in.
    pub fn born(&self) -> Stamp {
        self.born
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}@{})", self.id.short(), self.born)
    }
}

impl From<Entity> for EntityId {
    fn from(handle: Entity) -> Self {
        handle.id
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

impl Store {
    /// Fail with [`StoreError::StaleReference`] if the handle's birth state
    /// is not an ancestor of the active state.
    pub(crate) fn check_live(&self, handle: Entity) -> StoreResult<()> {
        if self.ledger.is_ancestor_stamp(handle.born) {
            Ok(())
        } else {
            Err(StoreError::StaleReference {
                id: handle.id,
                born: handle.born,
            })
        }
    }

    /// Resolve a handle to its current physical copy for reading.
    pub(crate) fn resolve_read(&self, handle: Entity) -> StoreResult<CopyIdx> {
        self.check_live(handle)?;
        self.resolve_current(handle.id)
    }

    /// Resolve an id through the active state's table.
    pub(crate) fn resolve_current(&self, id: EntityId) -> StoreResult<CopyIdx> {
        self.ledger
            .current()
            .lookup(id)
            .ok_or(StoreError::UnknownEntity(id))
    }

    /// Resolve a handle for writing, cloning the copy into the open state
    /// if it is still shared with an ancestor state.
    pub(crate) fn resolve_write(&mut self, handle: Entity) -> StoreResult<CopyIdx> {
        self.check_live(handle)?;
        self.write_current(handle.id)
    }

    /// Write resolution by id. The inverse engine uses this directly: a
    /// counterpart is always adjusted at its current copy, regardless of
    /// how old the handle that triggered the edit was.
    pub(crate) fn write_current(&mut self, id: EntityId) -> StoreResult<CopyIdx> {
        if self.tx.is_none() {
            return Err(StoreError::FrozenViolation);
        }
        let cur = self.resolve_current(id)?;
        let active = self.ledger.current().stamp();
        if self.arena.get(cur).born() == active {
            return Ok(cur);
        }
        let clone = self.arena.get(cur).clone_for(active);
        let new_idx = self.arena.push(clone);
        self.arena.get_mut(cur).set_successor(Some(new_idx));
        self.ledger.current_mut().insert(id, new_idx);
        if let Some(tx) = &mut self.tx {
            tx.clones.push(CloneEntry {
                id,
                old: cur,
                new: new_idx,
            });
        }
        trace!(
            entity = %id.short(),
            from = cur.as_usize(),
            to = new_idx.as_usize(),
            "copy-on-write clone"
        );
        Ok(new_idx)
    }

    /// Mint a handle for an id in the state at `index`, if present there.
    pub(crate) fn handle_at(&self, index: usize, id: EntityId) -> Option<Entity> {
        let state = self.ledger.state_at(index)?;
        let idx = state.lookup(id)?;
        Some(Entity::new(id, self.arena.get(idx).born()))
    }

    // -- schema lookups ----------------------------------------------------

    pub(crate) fn type_name_of(&self, type_idx: TypeIdx) -> &str {
        &self.schema.type_at(type_idx).name
    }

    /// Resolve a property name on a type to its slot index and schema.
    pub(crate) fn prop_of(
        &self,
        type_idx: TypeIdx,
        property: &str,
    ) -> StoreResult<(PropIdx, &PropSchema)> {
        let ty = self.schema.type_at(type_idx);
        let idx = ty
            .prop_idx(property)
            .ok_or_else(|| StoreError::UnknownProperty {
                type_name: ty.name.clone(),
                property: property.to_string(),
            })?;
        Ok((idx, ty.prop(idx)))
    }

    // -- record pipeline ---------------------------------------------------

    /// Offer a prospective record to before-hooks. A veto poisons the open
    /// transaction and surfaces as [`StoreError::TransactionVetoed`].
    pub(crate) fn veto_guard(&mut self, record: &ChangeRecord) -> StoreResult<()> {
        if self.bus.dispatch_before(record).is_veto() {
            if let Some(tx) = &mut self.tx {
                tx.vetoed = true;
            }
            trace!(record = %record, "mutation vetoed");
            return Err(StoreError::TransactionVetoed);
        }
        Ok(())
    }

    /// Append an applied record to the open state's log and deliver it to
    /// after-hooks and entity subscriptions.
    pub(crate) fn finish_record(&mut self, record: ChangeRecord) {
        self.ledger.current_mut().push_record(record.clone());
        self.bus.dispatch_after(&record);
    }

    /// Append a record without delivering events. Inverse-side edits are
    /// logged this way so a relationship change surfaces exactly one event.
    pub(crate) fn log_silent(&mut self, record: ChangeRecord) {
        self.ledger.current_mut().push_record(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varve_types::{PropertyDescriptor, ScalarKind, TypeDescriptor};

    use crate::init::InitObject;

    fn store() -> Store {
        let types = vec![TypeDescriptor::new("Widget")
            .with(PropertyDescriptor::scalar("label", ScalarKind::Str))];
        Store::from_descriptors(types).unwrap()
    }

    #[test]
    fn handles_are_small_and_comparable() {
        let mut store = store();
        let w = store.create("Widget", InitObject::new()).unwrap();
        let again = store.get(w.id()).unwrap();
        assert_eq!(w, again);
        assert_eq!(std::mem::size_of::<Entity>(), 24);
    }

    #[test]
    fn debug_form_shows_id_and_stamp() {
        let mut store = store();
        let w = store.create("Widget", InitObject::new()).unwrap();
        let shown = format!("{w:?}");
        assert!(shown.starts_with("Entity("));
        assert!(shown.contains('@'));
    }

    #[test]
    fn write_resolution_outside_a_transaction_is_frozen() {
        // not reachable through the public surface; the guard still holds
        let mut store = store();
        let w = store.create("Widget", InitObject::new()).unwrap();
        assert!(store.tx.is_none());
        assert_eq!(
            store.write_current(w.id()),
            Err(StoreError::FrozenViolation)
        );
    }

    #[test]
    fn clone_happens_once_per_entity_per_transaction() {
        let mut store = store();
        let w = store.create("Widget", InitObject::new()).unwrap();
        store
            .update(|tx| {
                tx.set_scalar(w, "label", "one")?;
                tx.set_scalar(w, "label", "two")?;
                tx.set_scalar(w, "label", "three")?;
                Ok(())
            })
            .unwrap();
        // one copy at birth, one clone for the whole transaction
        assert_eq!(store.arena.len(), 2);
    }

    #[test]
    fn entities_created_in_the_open_state_mutate_in_place() {
        let mut store = store();
        store
            .update(|tx| {
                let w = tx.create("Widget", InitObject::new())?;
                tx.set_scalar(w, "label", "fresh")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.arena.len(), 1);
    }
}
