//! Unordered set views.

use std::collections::BTreeSet;

use varve_types::{ChangeRecord, ElementKind, PropIdx, Value};

use crate::access::Entity;
use crate::containers::PropCtx;
use crate::error::StoreResult;
use crate::inverse;
use crate::record::CopyIdx;
use crate::store::Store;

/// Read-only view of a set property in one state.
#[derive(Clone, Copy)]
pub struct SetRef<'s> {
    pub(crate) store: &'s Store,
    pub(crate) state: usize,
    pub(crate) cidx: CopyIdx,
    pub(crate) prop: PropIdx,
}

static EMPTY_SET: BTreeSet<Value> = BTreeSet::new();

impl<'s> SetRef<'s> {
    fn entries(&self) -> &'s BTreeSet<Value> {
        self.store
            .arena
            .get(self.cidx)
            .slot(self.prop)
            .as_set()
            .unwrap_or(&EMPTY_SET)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.entries().contains(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'s Value> {
        self.entries().iter()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries().iter().cloned().collect()
    }

    /// All members that resolve to entities in this view's state.
    pub fn entities(&self) -> Vec<Entity> {
        self.entries()
            .iter()
            .filter_map(|v| v.as_ref_id())
            .filter_map(|id| self.store.handle_at(self.state, id))
            .collect()
    }
}

/// Mutable view of a set property inside an open transaction.
pub struct SetMut<'t> {
    pub(crate) store: &'t mut Store,
    pub(crate) ctx: PropCtx,
}

impl SetMut<'_> {
    fn entries(&self) -> StoreResult<&BTreeSet<Value>> {
        let cur = self.store.resolve_read(self.ctx.entity)?;
        Ok(self
            .store
            .arena
            .get(cur)
            .slot(self.ctx.prop)
            .as_set()
            .unwrap_or(&EMPTY_SET))
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.entries()?.is_empty())
    }

    pub fn contains(&self, value: &Value) -> StoreResult<bool> {
        Ok(self.entries()?.contains(value))
    }

    pub fn values(&self) -> StoreResult<Vec<Value>> {
        Ok(self.entries()?.iter().cloned().collect())
    }

    /// Add a member. Returns whether the set changed; adding a member that
    /// is already present does nothing and logs nothing.
    pub fn insert(&mut self, value: impl Into<Value>) -> StoreResult<bool> {
        let value = value.into();
        let ref_id = self.ctx.check_element(self.store, &value)?;
        if self.entries()?.contains(&value) {
            return Ok(false);
        }
        let record = ChangeRecord::added(
            self.ctx.entity.id(),
            &self.ctx.type_name,
            &self.ctx.prop_name,
            value.clone(),
            None,
        );
        self.store.veto_guard(&record)?;
        let idx = self.store.resolve_write(self.ctx.entity)?;
        if let Some(entries) = self
            .store
            .arena
            .get_mut(idx)
            .slot_mut(self.ctx.prop)
            .as_set_mut()
        {
            entries.insert(value);
        }
        if let (Some(link), Some(rid)) = (self.ctx.inverse, ref_id) {
            inverse::apply(self.store, self.ctx.entity.id(), self.ctx.prop, &link, None, Some(rid))?;
        }
        self.store.finish_record(record);
        Ok(true)
    }

    /// Remove a member. Returns whether the set changed.
    pub fn remove(&mut self, value: &Value) -> StoreResult<bool> {
        if !self.entries()?.contains(value) {
            return Ok(false);
        }
        let old_ref = match self.ctx.element {
            ElementKind::Reference(_) => value.as_ref_id(),
            ElementKind::Scalar(_) => None,
        };
        let record = ChangeRecord::removed(
            self.ctx.entity.id(),
            &self.ctx.type_name,
            &self.ctx.prop_name,
            value.clone(),
            None,
        );
        self.store.veto_guard(&record)?;
        let idx = self.store.resolve_write(self.ctx.entity)?;
        if let Some(entries) = self
            .store
            .arena
            .get_mut(idx)
            .slot_mut(self.ctx.prop)
            .as_set_mut()
        {
            entries.remove(value);
        }
        if let (Some(link), Some(rid)) = (self.ctx.inverse, old_ref) {
            inverse::apply(self.store, self.ctx.entity.id(), self.ctx.prop, &link, Some(rid), None)?;
        }
        self.store.finish_record(record);
        Ok(true)
    }

    /// Remove every member, logging one removal each.
    pub fn clear(&mut self) -> StoreResult<()> {
        let members = self.values()?;
        for value in members {
            self.remove(&value)?;
        }
        Ok(())
    }
}
