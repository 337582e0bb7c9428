//! Keyed map views.

use std::collections::BTreeMap;

use varve_types::{ChangeRecord, ElementKind, Locus, MapKey, MapKeyKind, PropIdx, Value};

use crate::access::Entity;
use crate::containers::PropCtx;
use crate::error::StoreResult;
use crate::inverse;
use crate::record::CopyIdx;
use crate::store::Store;

/// Read-only view of a map property in one state.
#[derive(Clone, Copy)]
pub struct MapRef<'s> {
    pub(crate) store: &'s Store,
    pub(crate) state: usize,
    pub(crate) cidx: CopyIdx,
    pub(crate) prop: PropIdx,
}

static EMPTY_MAP: BTreeMap<MapKey, Value> = BTreeMap::new();

impl<'s> MapRef<'s> {
    fn entries(&self) -> &'s BTreeMap<MapKey, Value> {
        self.store
            .arena
            .get(self.cidx)
            .slot(self.prop)
            .as_map()
            .unwrap_or(&EMPTY_MAP)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn get(&self, key: &MapKey) -> Option<&'s Value> {
        self.entries().get(key)
    }

    pub fn contains_key(&self, key: &MapKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'s MapKey> {
        self.entries().keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'s MapKey, &'s Value)> {
        self.entries().iter()
    }

    /// Resolve the value under `key` as an entity handle in this view's
    /// state.
    pub fn entity(&self, key: &MapKey) -> Option<Entity> {
        let id = self.entries().get(key)?.as_ref_id()?;
        self.store.handle_at(self.state, id)
    }

    /// All values that resolve to entities in this view's state, in key
    /// order.
    pub fn entities(&self) -> Vec<Entity> {
        self.entries()
            .values()
            .filter_map(|v| v.as_ref_id())
            .filter_map(|id| self.store.handle_at(self.state, id))
            .collect()
    }
}

/// Mutable view of a map property inside an open transaction.
pub struct MapMut<'t> {
    pub(crate) store: &'t mut Store,
    pub(crate) ctx: PropCtx,
}

impl MapMut<'_> {
    fn entries(&self) -> StoreResult<&BTreeMap<MapKey, Value>> {
        let cur = self.store.resolve_read(self.ctx.entity)?;
        Ok(self
            .store
            .arena
            .get(cur)
            .slot(self.ctx.prop)
            .as_map()
            .unwrap_or(&EMPTY_MAP))
    }

    fn check_key(&self, key: &MapKey) -> StoreResult<()> {
        let declared = self
            .ctx
            .key_kind
            .expect("map property carries a key kind");
        let ok = matches!(
            (declared, key),
            (MapKeyKind::Str, MapKey::Str(_)) | (MapKeyKind::Id, MapKey::Id(_))
        );
        if ok {
            Ok(())
        } else {
            Err(self.ctx.invalid(format!(
                "expected {} key, got {}",
                match declared {
                    MapKeyKind::Str => "string",
                    MapKeyKind::Id => "id",
                },
                key.kind_name()
            )))
        }
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.entries()?.is_empty())
    }

    pub fn get(&self, key: &MapKey) -> StoreResult<Option<Value>> {
        Ok(self.entries()?.get(key).cloned())
    }

    pub fn contains_key(&self, key: &MapKey) -> StoreResult<bool> {
        Ok(self.entries()?.contains_key(key))
    }

    pub fn keys(&self) -> StoreResult<Vec<MapKey>> {
        Ok(self.entries()?.keys().cloned().collect())
    }

    /// Put `value` under `key`, replacing any previous entry. Writing the
    /// value a key already holds does nothing and logs nothing.
    pub fn insert(&mut self, key: impl Into<MapKey>, value: impl Into<Value>) -> StoreResult<()> {
        let key = key.into();
        let value = value.into();
        self.check_key(&key)?;
        let new_ref = self.ctx.check_element(self.store, &value)?;
        let previous = self.entries()?.get(&key).cloned();
        if previous.as_ref() == Some(&value) {
            return Ok(());
        }
        let old_ref = match (&self.ctx.element, &previous) {
            (ElementKind::Reference(_), Some(old)) => old.as_ref_id(),
            _ => None,
        };
        let record = match previous.clone() {
            Some(old) => ChangeRecord::replaced_at(
                self.ctx.entity.id(),
                &self.ctx.type_name,
                &self.ctx.prop_name,
                old,
                value.clone(),
                Locus::Key(key.clone()),
            ),
            None => ChangeRecord::added(
                self.ctx.entity.id(),
                &self.ctx.type_name,
                &self.ctx.prop_name,
                value.clone(),
                Some(Locus::Key(key.clone())),
            ),
        };
        self.store.veto_guard(&record)?;
        let idx = self.store.resolve_write(self.ctx.entity)?;
        let mut old_gone = false;
        let mut new_first = false;
        if let Some(entries) = self
            .store
            .arena
            .get_mut(idx)
            .slot_mut(self.ctx.prop)
            .as_map_mut()
        {
            entries.insert(key, value.clone());
            if let Some(old) = &previous {
                old_gone = !entries.values().any(|v| v == old);
            }
            new_first = entries.values().filter(|v| **v == value).count() == 1;
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

    /// Remove the entry under `key`, returning its value if one was there.
    pub fn remove(&mut self, key: &MapKey) -> StoreResult<Option<Value>> {
        let Some(old) = self.entries()?.get(key).cloned() else {
            return Ok(None);
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
            Some(Locus::Key(key.clone())),
        );
        self.store.veto_guard(&record)?;
        let idx = self.store.resolve_write(self.ctx.entity)?;
        let mut last_occurrence = false;
        if let Some(entries) = self
            .store
            .arena
            .get_mut(idx)
            .slot_mut(self.ctx.prop)
            .as_map_mut()
        {
            entries.remove(key);
            last_occurrence = !entries.values().any(|v| *v == old);
        }
        if let (Some(link), Some(rid), true) = (self.ctx.inverse, old_ref, last_occurrence) {
            inverse::apply(self.store, self.ctx.entity.id(), self.ctx.prop, &link, Some(rid), None)?;
        }
        self.store.finish_record(record);
        Ok(Some(old))
    }

    /// Remove every entry, logging one removal each.
    pub fn clear(&mut self) -> StoreResult<()> {
        let keys = self.keys()?;
        for key in keys {
            self.remove(&key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use varve_types::{
        ChangeKind, ElementKind, EntityId, Locus, MapKey, MapKeyKind, PropertyDescriptor,
        ScalarKind, TypeDescriptor, Value,
    };

    use crate::access::Entity;
    use crate::error::StoreError;
    use crate::init::InitObject;
    use crate::store::Store;

    fn config() -> (Store, Entity) {
        let types = vec![TypeDescriptor::new("Config").with(PropertyDescriptor::map(
            "settings",
            MapKeyKind::Str,
            ElementKind::Scalar(ScalarKind::Int),
        ))];
        let mut store = Store::from_descriptors(types).unwrap();
        let entity = store.create("Config", InitObject::new()).unwrap();
        (store, entity)
    }

    #[test]
    fn insert_get_and_remove() {
        let (mut store, cfg) = config();
        store
            .update(|tx| {
                let mut settings = tx.map(cfg, "settings")?;
                settings.insert("retries", 3i64)?;
                settings.insert("timeout", 30i64)?;
                Ok(())
            })
            .unwrap();
        let settings = store.map(cfg, "settings").unwrap();
        assert_eq!(settings.len(), 2);
        assert_eq!(settings.get(&MapKey::from("retries")), Some(&Value::Int(3)));

        let removed = store
            .update(|tx| tx.map(cfg, "settings")?.remove(&MapKey::from("retries")))
            .unwrap();
        assert_eq!(removed, Some(Value::Int(3)));
        assert!(!store
            .map(cfg, "settings")
            .unwrap()
            .contains_key(&MapKey::from("retries")));
    }

    #[test]
    fn replacing_a_key_logs_a_keyed_replace() {
        let (mut store, cfg) = config();
        store
            .update(|tx| tx.map(cfg, "settings")?.insert("retries", 3i64))
            .unwrap();
        store
            .update(|tx| tx.map(cfg, "settings")?.insert("retries", 5i64))
            .unwrap();

        let record = &store.changes()[0];
        assert_eq!(record.kind, Some(ChangeKind::Replace));
        assert_eq!(record.locus, Some(Locus::Key(MapKey::from("retries"))));
        assert_eq!(record.old, Some(Value::Int(3)));
        assert_eq!(record.new, Some(Value::Int(5)));
    }

    #[test]
    fn rewriting_the_same_entry_is_a_no_op() {
        let (mut store, cfg) = config();
        store
            .update(|tx| tx.map(cfg, "settings")?.insert("retries", 3i64))
            .unwrap();
        let states = store.state_count();
        store
            .update(|tx| tx.map(cfg, "settings")?.insert("retries", 3i64))
            .unwrap();
        assert_eq!(store.state_count(), states);
    }

    #[test]
    fn key_kind_is_enforced() {
        let (mut store, cfg) = config();
        let result = store.update(|tx| {
            tx.map(cfg, "settings")?
                .insert(MapKey::Id(EntityId::generate()), 1i64)
        });
        assert!(matches!(result, Err(StoreError::InvalidValue { .. })));
    }

    #[test]
    fn removing_a_missing_key_changes_nothing() {
        let (mut store, cfg) = config();
        let states = store.state_count();
        let removed = store
            .update(|tx| tx.map(cfg, "settings")?.remove(&MapKey::from("absent")))
            .unwrap();
        assert_eq!(removed, None);
        assert_eq!(store.state_count(), states);
    }

    #[test]
    fn clear_empties_the_map() {
        let (mut store, cfg) = config();
        store
            .update(|tx| {
                let mut settings = tx.map(cfg, "settings")?;
                settings.insert("a", 1i64)?;
                settings.insert("b", 2i64)?;
                Ok(())
            })
            .unwrap();
        store
            .update(|tx| tx.map(cfg, "settings")?.clear())
            .unwrap();
        assert!(store.map(cfg, "settings").unwrap().is_empty());
        assert_eq!(store.changes().len(), 2);
    }
}
