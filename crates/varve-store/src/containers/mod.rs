//! Observable container views over list, set, and map properties.
//!
//! Read views ([`ListRef`], [`SetRef`], [`MapRef`]) borrow the store
//! immutably and read one property of one entity as it stands in a chosen
//! state. Write views ([`ListMut`], [`SetMut`], [`MapMut`]) are handed out
//! by [`Tx`](crate::tx::Tx) and run every mutation through the same
//! pipeline as scalar setters: validate, suppress no-ops, offer the change
//! to before-hooks, copy-on-write, mutate, maintain the inverse side, then
//! record and notify.
//!
//! # Invariants
//!
//! - A view is bound to the property it was opened for; shape and element
//!   kinds were checked at construction.
//! - Inverse connections track membership, not occurrences: a reference
//!   connects when it first enters the container and disconnects when its
//!   last occurrence leaves.

mod list;
mod map;
mod set;

pub use list::{ListMut, ListRef};
pub use map::{MapMut, MapRef};
pub use set::{SetMut, SetRef};

use varve_types::{
    ElementKind, EntityId, InverseLink, MapKeyKind, PropIdx, Shape, Value,
};

use crate::access::Entity;
use crate::error::{StoreError, StoreResult};
use crate::record::CopyIdx;
use crate::store::Store;

/// Everything a write view needs to know about its property, resolved once
/// when the view is opened so later mutations don't re-touch the schema.
#[derive(Clone, Debug)]
pub(crate) struct PropCtx {
    pub entity: Entity,
    pub prop: PropIdx,
    pub type_name: String,
    pub prop_name: String,
    pub element: ElementKind,
    pub inverse: Option<InverseLink>,
    pub key_kind: Option<MapKeyKind>,
}

impl PropCtx {
    pub(crate) fn resolve(
        store: &Store,
        target: Entity,
        property: &str,
        want: Shape,
    ) -> StoreResult<PropCtx> {
        let cur = store.resolve_read(target)?;
        let type_idx = store.arena.get(cur).type_idx();
        let (prop_idx, prop) = store.prop_of(type_idx, property)?;
        if prop.shape() != want {
            return Err(StoreError::InvalidValue {
                type_name: store.type_name_of(type_idx).to_string(),
                property: property.to_string(),
                reason: format!("expected a {want} property, found {}", prop.shape()),
            });
        }
        let element = prop
            .kind
            .element()
            .cloned()
            .expect("container property carries an element kind");
        Ok(PropCtx {
            entity: target,
            prop: prop_idx,
            type_name: store.type_name_of(type_idx).to_string(),
            prop_name: prop.name.clone(),
            element,
            inverse: prop.inverse,
            key_kind: prop.kind.map_key_kind(),
        })
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> StoreError {
        StoreError::InvalidValue {
            type_name: self.type_name.clone(),
            property: self.prop_name.clone(),
            reason: reason.into(),
        }
    }

    /// Check one element value against the declared element kind. For
    /// reference elements the target entity must exist in the active state
    /// and carry the declared type; its id is returned so callers can drive
    /// the inverse side.
    pub(crate) fn check_element(
        &self,
        store: &Store,
        value: &Value,
    ) -> StoreResult<Option<EntityId>> {
        match &self.element {
            ElementKind::Scalar(kind) => {
                if value.is_scalar_of(*kind) {
                    Ok(None)
                } else {
                    Err(self.invalid(format!(
                        "expected {kind} element, got {}",
                        value.kind_name()
                    )))
                }
            }
            ElementKind::Reference(spec) => {
                let Some(id) = value.as_ref_id() else {
                    return Err(self.invalid(format!(
                        "expected a {} reference, got {}",
                        spec.target,
                        value.kind_name()
                    )));
                };
                let cur = store.resolve_current(id)?;
                let actual = store.type_name_of(store.arena.get(cur).type_idx());
                if actual == spec.target {
                    Ok(Some(id))
                } else {
                    Err(self.invalid(format!(
                        "expected a {} reference, got {actual}",
                        spec.target
                    )))
                }
            }
        }
    }
}

/// Resolve an entity's property inside a specific state for a read view.
pub(crate) fn view_prop(
    store: &Store,
    state: usize,
    id: EntityId,
    property: &str,
    want: Shape,
) -> StoreResult<(CopyIdx, PropIdx)> {
    let st = store
        .ledger
        .state_at(state)
        .ok_or(StoreError::UnknownState(state))?;
    let cidx = st.lookup(id).ok_or(StoreError::UnknownEntity(id))?;
    let type_idx = store.arena.get(cidx).type_idx();
    let (prop_idx, prop) = store.prop_of(type_idx, property)?;
    if prop.shape() != want {
        return Err(StoreError::InvalidValue {
            type_name: store.type_name_of(type_idx).to_string(),
            property: property.to_string(),
            reason: format!("expected a {want} property, found {}", prop.shape()),
        });
    }
    Ok((cidx, prop_idx))
}
