//! Ordered list views.

use varve_types::{ChangeRecord, ElementKind, Locus, PropIdx, Value};

use crate::access::Entity;
use crate::containers::PropCtx;
use crate::error::StoreResult;
use crate::inverse;
use crate::record::CopyIdx;
use crate::store::Store;

/// Read-only view of a list property in one state.
#[derive(Clone, Copy)]
pub struct ListRef<'s> {
    pub(crate) store: &'s Store,
    pub(crate) state: usize,
    pub(crate) cidx: CopyIdx,
    pub(crate) prop: PropIdx,
}

impl<'s> ListRef<'s> {
    fn items(&self) -> &'s [Value] {
        self.store
            .arena
            .get(self.cidx)
            .slot(self.prop)
            .as_list()
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'s Value> {
        self.items().get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'s Value> {
        self.items().iter()
    }

    pub fn values(&self) -> Vec<Value> {
        self.items().to_vec()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items().contains(value)
    }

    /// Index of the first occurrence of `value`.
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.items().iter().position(|v| v == value)
    }

    /// Resolve the element at `index` as an entity handle in this view's
    /// state. `None` for scalars, out-of-range indexes, and references whose
    /// target is absent from the state.
    pub fn entity(&self, index: usize) -> Option<Entity> {
        let id = self.items().get(index)?.as_ref_id()?;
        self.store.handle_at(self.state, id)
    }

    /// All elements that resolve to entities in this view's state, in order.
    pub fn entities(&self) -> Vec<Entity> {
        self.items()
            .iter()
            .filter_map(|v| v.as_ref_id())
            .filter_map(|id| self.store.handle_at(self.state, id))
            .collect()
    }
}

/// Mutable view of a list property inside an open transaction.
pub struct ListMut<'t> {
    pub(crate) store: &'t mut Store,
    pub(crate) ctx: PropCtx,
}

impl ListMut<'_> {
    fn items(&self) -> StoreResult<&[Value]> {
        let cur = self.store.resolve_read(self.ctx.entity)?;
        Ok(self
            .store
            .arena
            .get(cur)
            .slot(self.ctx.prop)
            .as_list()
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.items()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.items()?.is_empty())
    }

    pub fn get(&self, index: usize) -> StoreResult<Option<Value>> {
        Ok(self.items()?.get(index).cloned())
    }

    pub fn values(&self) -> StoreResult<Vec<Value>> {
        Ok(self.items()?.to_vec())
    }

    pub fn contains(&self, value: &Value) -> StoreResult<bool> {
        Ok(self.items()?.contains(value))
    }

    pub fn index_of(&self, value: &Value) -> StoreResult<Option<usize>> {
        Ok(self.items()?.iter().position(|v| v == value))
    }

    /// Append an element.
    pub fn push(&mut self, value: impl Into<Value>) -> StoreResult<()> {
        let position = self.items()?.len();
        self.insert(position, value)
    }

    /// Insert an element at `index`, shifting later elements right.
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) -> StoreResult<()> {
        let value = value.into();
        let ref_id = self.ctx.check_element(self.store, &value)?;
        let len = self.items()?.len();
        if index > len {
            return Err(self
                .ctx
                .invalid(format!("index {index} out of bounds (len {len})")));
        }
        let record = ChangeRecord::added(
            self.ctx.entity.id(),
            &self.ctx.type_name,
            &self.ctx.prop_name,
            value.clone(),
            Some(Locus::Index(index)),
        );
        self.store.veto_guard(&record)?;
        let idx = self.store.resolve_write(self.ctx.entity)?;
        let mut first_occurrence = false;
        if let Some(items) = self
            .store
            .arena
            .get_mut(idx)
            .slot_mut(self.ctx.prop)
            .as_list_mut()
        {
            items.insert(index, value.clone());
            first_occurrence = items.iter().filter(|v| **v == value).count() == 1;
        }
        if let (Some(link), Some(rid), true) = (self.ctx.inverse, ref_id, first_occurrence) {
            inverse::apply(self.store, self.ctx.entity.id(), self.ctx.prop, &link, None, Some(rid))?;
        }
        self.store.finish_record(record);
        Ok(())
    }

    /// Replace the element at `index`.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> StoreResult<()> {
        let value = value.into();
        let new_ref = self.ctx.check_element(self.store, &value)?;
        let items = self.items()?;
        let len = items.len();
        let Some(old) = items.get(index).cloned() else {
            return Err(self
                .ctx
                .invalid(format!("index {index} out of bounds (len {len})")));
        };
        if old == value {
            return Ok(());
        }
        let old_ref = match self.ctx.element {
            ElementKind::Reference(_) => old.as_ref_id(),
            ElementKind::Scalar(_) => None,
        };
        let record = ChangeRecord::replaced_at(
            self.ctx.entity.id(),
            &self.ctx.type_name,
            &self.ctx.prop_name,
            old.clone(),
            value.clone(),
            Locus::Index(index),
        );
        self.store.veto_guard(&record)?;
        let idx = self.store.resolve_write(self.ctx.entity)?;
        let mut old_gone = false;
        let mut new_first = false;
        if let Some(items) = self
            .store
            .arena
            .get_mut(idx)
            .slot_mut(self.ctx.prop)
            .as_list_mut()
        {
            items[index] = value.clone();
            old_gone = !items.contains(&old);
            new_first = items.iter().filter(|v| **v == value).count() == 1;
        }
        if let Some(link) = self.ctx.inverse {
            let disconnected = old_ref.filter(|_| old_gone);
            let connected = new_ref.filter(|_| new_first);
            if disconnected.is_some() || connected.is_some() {
                inverse::apply(
                    self.store,
                    self.ctx.entity.id(),
                    self.ctx.prop,
                    &link,
                    disconnected,
                    connected,
                )?;
            }
        }
        self.store.finish_record(record);
        Ok(())
    }

    /// Remove and return the element at `index`.
    pub fn remove(&mut self, index: usize) -> StoreResult<Value> {
        let items = self.items()?;
        let len = items.len();
        let Some(old) = items.get(index).cloned() else {
            return Err(self
                .ctx
                .invalid(format!("index {index} out of bounds (len {len})")));
        };
        let old_ref = match self.ctx.element {
            ElementKind::Reference(_) => old.as_ref_id(),
            ElementKind::Scalar(_) => None,
        };
        let record = ChangeRecord::removed(
            self.ctx.entity.id(),
            &self.ctx.type_name,
            &self.ctx.prop_name,
            old.clone(),
            Some(Locus::Index(index)),
        );
        self.store.veto_guard(&record)?;
        let idx = self.store.resolve_write(self.ctx.entity)?;
        let mut last_occurrence = false;
        if let Some(items) = self
            .store
            .arena
            .get_mut(idx)
            .slot_mut(self.ctx.prop)
            .as_list_mut()
        {
            items.remove(index);
            last_occurrence = !items.contains(&old);
        }
        if let (Some(link), Some(rid), true) = (self.ctx.inverse, old_ref, last_occurrence) {
            inverse::apply(self.store, self.ctx.entity.id(), self.ctx.prop, &link, Some(rid), None)?;
        }
        self.store.finish_record(record);
        Ok(old)
    }

    /// Remove the first occurrence of `value`. Returns whether anything was
    /// removed.
    pub fn remove_value(&mut self, value: &Value) -> StoreResult<bool> {
        match self.index_of(value)? {
            Some(index) => {
                self.remove(index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove `delete_count` elements starting at `start`, then insert
    /// `replacement` in their place. Returns the removed elements. The
    /// deletion count is clamped to the tail length, matching splice
    /// conventions.
    pub fn splice(
        &mut self,
        start: usize,
        delete_count: usize,
        replacement: Vec<Value>,
    ) -> StoreResult<Vec<Value>> {
        let len = self.items()?.len();
        if start > len {
            return Err(self
                .ctx
                .invalid(format!("splice start {start} out of bounds (len {len})")));
        }
        let count = delete_count.min(len - start);
        let mut removed = Vec::with_capacity(count);
        for _ in 0..count {
            removed.push(self.remove(start)?);
        }
        for (offset, value) in replacement.into_iter().enumerate() {
            self.insert(start + offset, value)?;
        }
        Ok(removed)
    }

    /// Move the element at `from` so it ends up at index `to`. Membership is
    /// unchanged, so no inverse work happens; a single reorder record is
    /// logged.
    pub fn move_item(&mut self, from: usize, to: usize) -> StoreResult<()> {
        let items = self.items()?;
        let len = items.len();
        if from >= len || to >= len {
            return Err(self
                .ctx
                .invalid(format!("move {from} -> {to} out of bounds (len {len})")));
        }
        if from == to {
            return Ok(());
        }
        let value = items[from].clone();
        let record = ChangeRecord::reordered(
            self.ctx.entity.id(),
            &self.ctx.type_name,
            &self.ctx.prop_name,
            value.clone(),
            from,
            to,
        );
        self.store.veto_guard(&record)?;
        let idx = self.store.resolve_write(self.ctx.entity)?;
        if let Some(items) = self
            .store
            .arena
            .get_mut(idx)
            .slot_mut(self.ctx.prop)
            .as_list_mut()
        {
            let value = items.remove(from);
            items.insert(to, value);
        }
        self.store.finish_record(record);
        Ok(())
    }

    /// Remove every element, newest index first, logging one removal per
    /// element.
    pub fn clear(&mut self) -> StoreResult<()> {
        let len = self.items()?.len();
        for index in (0..len).rev() {
            self.remove(index)?;
        }
        Ok(())
    }
}
