//! Inverse-relationship maintenance.
//!
//! When a reference-bearing property with a declared inverse changes, the
//! counterpart property on the referenced entity is brought in sync. The
//! (owner shape × inverse shape) pair selects one of sixteen pairing
//! functions; each composes the four slot editors below.
//!
//! # Invariants
//!
//! - Counterparts are resolved by id to their *current* copy in the active
//!   state, never through the possibly-stale handle that triggered the edit.
//!   Changed counterparts are cloned copy-on-write like any other write.
//! - Every inverse-side edit appends change records but fires no events;
//!   one relationship change surfaces exactly one event, on the side the
//!   caller touched.
//! - Editors are idempotent: connecting an already-connected pair or
//!   disconnecting an absent one is a no-op with no record.
//! - When a single-valued inverse is displaced, the previous owner's
//!   forward slot is adjusted one hop, with no recursive inverse work.
//!   That single hop is what terminates every update cycle.

use varve_types::{ChangeRecord, EntityId, InverseLink, Locus, MapKey, MapKeyKind, PropIdx, Shape, Value};

use crate::error::StoreResult;
use crate::store::Store;

/// Apply the inverse consequences of one owner-side edit.
///
/// `disconnected` is the counterpart the owner's property no longer
/// references; `connected` is the one it now references. Either may be
/// absent.
pub(crate) fn apply(
    store: &mut Store,
    owner: EntityId,
    owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    match (link.owner_shape, link.inverse_shape) {
        (Shape::Single, Shape::Single) => {
            single_single(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Single, Shape::List) => {
            single_list(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Single, Shape::Set) => {
            single_set(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Single, Shape::Map) => {
            single_map(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::List, Shape::Single) => {
            list_single(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::List, Shape::List) => {
            list_list(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::List, Shape::Set) => {
            list_set(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::List, Shape::Map) => {
            list_map(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Set, Shape::Single) => {
            set_single(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Set, Shape::List) => {
            set_list(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Set, Shape::Set) => {
            set_set(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Set, Shape::Map) => {
            set_map(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Map, Shape::Single) => {
            map_single(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Map, Shape::List) => {
            map_list(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Map, Shape::Set) => {
            map_set(store, owner, owner_prop, link, disconnected, connected)
        }
        (Shape::Map, Shape::Map) => {
            map_map(store, owner, owner_prop, link, disconnected, connected)
        }
    }
}

// ---------------------------------------------------------------------------
// The sixteen pairings
// ---------------------------------------------------------------------------

/// Owner: single reference. Inverse: single reference.
fn single_single(
    store: &mut Store,
    owner: EntityId,
    owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_single(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_single(store, next, link.target_prop, owner, owner_prop, Shape::Single)?;
    }
    Ok(())
}

/// Owner: single reference. Inverse: list.
fn single_list(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_list(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_list(store, next, link.target_prop, owner)?;
    }
    Ok(())
}

/// Owner: single reference. Inverse: set.
fn single_set(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_set(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_set(store, next, link.target_prop, owner)?;
    }
    Ok(())
}

/// Owner: single reference. Inverse: map keyed by the owner.
fn single_map(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_map(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_map(store, next, link.target_prop, link.key_kind, owner)?;
    }
    Ok(())
}

/// Owner: list. Inverse: single reference.
fn list_single(
    store: &mut Store,
    owner: EntityId,
    owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_single(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_single(store, next, link.target_prop, owner, owner_prop, Shape::List)?;
    }
    Ok(())
}

/// Owner: list. Inverse: list.
fn list_list(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_list(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_list(store, next, link.target_prop, owner)?;
    }
    Ok(())
}

/// Owner: list. Inverse: set.
fn list_set(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_set(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_set(store, next, link.target_prop, owner)?;
    }
    Ok(())
}

/// Owner: list. Inverse: map keyed by the owner.
fn list_map(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_map(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_map(store, next, link.target_prop, link.key_kind, owner)?;
    }
    Ok(())
}

/// Owner: set. Inverse: single reference.
fn set_single(
    store: &mut Store,
    owner: EntityId,
    owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_single(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_single(store, next, link.target_prop, owner, owner_prop, Shape::Set)?;
    }
    Ok(())
}

/// Owner: set. Inverse: list.
fn set_list(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_list(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_list(store, next, link.target_prop, owner)?;
    }
    Ok(())
}

/// Owner: set. Inverse: set.
fn set_set(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_set(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_set(store, next, link.target_prop, owner)?;
    }
    Ok(())
}

/// Owner: set. Inverse: map keyed by the owner.
fn set_map(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_map(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_map(store, next, link.target_prop, link.key_kind, owner)?;
    }
    Ok(())
}

/// Owner: map. Inverse: single reference.
fn map_single(
    store: &mut Store,
    owner: EntityId,
    owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_single(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_single(store, next, link.target_prop, owner, owner_prop, Shape::Map)?;
    }
    Ok(())
}

/// Owner: map. Inverse: list.
fn map_list(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_list(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_list(store, next, link.target_prop, owner)?;
    }
    Ok(())
}

/// Owner: map. Inverse: set.
fn map_set(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_set(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_set(store, next, link.target_prop, owner)?;
    }
    Ok(())
}

/// Owner: map. Inverse: map keyed by the owner.
fn map_map(
    store: &mut Store,
    owner: EntityId,
    _owner_prop: PropIdx,
    link: &InverseLink,
    disconnected: Option<EntityId>,
    connected: Option<EntityId>,
) -> StoreResult<()> {
    if let Some(prev) = disconnected {
        erase_from_map(store, prev, link.target_prop, owner)?;
    }
    if let Some(next) = connected {
        insert_into_map(store, next, link.target_prop, link.key_kind, owner)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Slot editors
// ---------------------------------------------------------------------------

fn names(store: &Store, target: EntityId, prop: PropIdx) -> StoreResult<(String, String)> {
    let cur = store.resolve_current(target)?;
    let type_idx = store.arena.get(cur).type_idx();
    let ty = store.schema.type_at(type_idx);
    Ok((ty.name.clone(), ty.prop(prop).name.clone()))
}

/// Clear `target.prop` if it currently references `value`.
fn erase_from_single(
    store: &mut Store,
    target: EntityId,
    prop: PropIdx,
    value: EntityId,
) -> StoreResult<()> {
    let cur = store.resolve_current(target)?;
    let current = store
        .arena
        .get(cur)
        .slot(prop)
        .as_single()
        .and_then(|v| v.clone());
    if current != Some(Value::Ref(value)) {
        return Ok(());
    }
    let (type_name, prop_name) = names(store, target, prop)?;
    let idx = store.write_current(target)?;
    if let Some(slot) = store.arena.get_mut(idx).slot_mut(prop).as_single_mut() {
        *slot = None;
    }
    store.log_silent(ChangeRecord::replaced(
        target,
        type_name,
        prop_name,
        Some(Value::Ref(value)),
        None,
    ));
    Ok(())
}

/// Remove every occurrence of `value` from the list at `target.prop`.
fn erase_from_list(
    store: &mut Store,
    target: EntityId,
    prop: PropIdx,
    value: EntityId,
) -> StoreResult<()> {
    let needle = Value::Ref(value);
    let cur = store.resolve_current(target)?;
    if !store
        .arena
        .get(cur)
        .slot(prop)
        .as_list()
        .is_some_and(|items| items.contains(&needle))
    {
        return Ok(());
    }
    let (type_name, prop_name) = names(store, target, prop)?;
    let idx = store.write_current(target)?;
    let mut removals = Vec::new();
    if let Some(items) = store.arena.get_mut(idx).slot_mut(prop).as_list_mut() {
        while let Some(pos) = items.iter().position(|v| *v == needle) {
            items.remove(pos);
            removals.push(pos);
        }
    }
    for pos in removals {
        store.log_silent(ChangeRecord::removed(
            target,
            type_name.clone(),
            prop_name.clone(),
            needle.clone(),
            Some(Locus::Index(pos)),
        ));
    }
    Ok(())
}

/// Remove `value` from the set at `target.prop`.
fn erase_from_set(
    store: &mut Store,
    target: EntityId,
    prop: PropIdx,
    value: EntityId,
) -> StoreResult<()> {
    let needle = Value::Ref(value);
    let cur = store.resolve_current(target)?;
    if !store
        .arena
        .get(cur)
        .slot(prop)
        .as_set()
        .is_some_and(|items| items.contains(&needle))
    {
        return Ok(());
    }
    let (type_name, prop_name) = names(store, target, prop)?;
    let idx = store.write_current(target)?;
    if let Some(items) = store.arena.get_mut(idx).slot_mut(prop).as_set_mut() {
        items.remove(&needle);
    }
    store.log_silent(ChangeRecord::removed(target, type_name, prop_name, needle, None));
    Ok(())
}

/// Remove every entry whose value references `value` from the map at
/// `target.prop`.
fn erase_from_map(
    store: &mut Store,
    target: EntityId,
    prop: PropIdx,
    value: EntityId,
) -> StoreResult<()> {
    let needle = Value::Ref(value);
    let cur = store.resolve_current(target)?;
    let doomed: Vec<MapKey> = store
        .arena
        .get(cur)
        .slot(prop)
        .as_map()
        .map(|entries| {
            entries
                .iter()
                .filter(|(_, v)| **v == needle)
                .map(|(k, _)| k.clone())
                .collect()
        })
        .unwrap_or_default();
    if doomed.is_empty() {
        return Ok(());
    }
    let (type_name, prop_name) = names(store, target, prop)?;
    let idx = store.write_current(target)?;
    for key in doomed {
        if let Some(entries) = store.arena.get_mut(idx).slot_mut(prop).as_map_mut() {
            entries.remove(&key);
        }
        store.log_silent(ChangeRecord::removed(
            target,
            type_name.clone(),
            prop_name.clone(),
            needle.clone(),
            Some(Locus::Key(key)),
        ));
    }
    Ok(())
}

/// Point `target.prop` at `owner`, displacing a previous owner if needed.
///
/// Displacement removes `target` from the previous owner's forward slot
/// (shape `owner_shape`) and stops there.
fn insert_into_single(
    store: &mut Store,
    target: EntityId,
    prop: PropIdx,
    owner: EntityId,
    owner_prop: PropIdx,
    owner_shape: Shape,
) -> StoreResult<()> {
    let cur = store.resolve_current(target)?;
    let current = store
        .arena
        .get(cur)
        .slot(prop)
        .as_single()
        .and_then(|v| v.clone());
    if current == Some(Value::Ref(owner)) {
        return Ok(());
    }
    if let Some(prev) = current.as_ref().and_then(Value::as_ref_id) {
        match owner_shape {
            Shape::Single => erase_from_single(store, prev, owner_prop, target)?,
            Shape::List => erase_from_list(store, prev, owner_prop, target)?,
            Shape::Set => erase_from_set(store, prev, owner_prop, target)?,
            Shape::Map => erase_from_map(store, prev, owner_prop, target)?,
        }
    }
    let (type_name, prop_name) = names(store, target, prop)?;
    let idx = store.write_current(target)?;
    if let Some(slot) = store.arena.get_mut(idx).slot_mut(prop).as_single_mut() {
        *slot = Some(Value::Ref(owner));
    }
    store.log_silent(ChangeRecord::replaced(
        target,
        type_name,
        prop_name,
        current,
        Some(Value::Ref(owner)),
    ));
    Ok(())
}

/// Append `owner` to the list at `target.prop` unless already present.
fn insert_into_list(
    store: &mut Store,
    target: EntityId,
    prop: PropIdx,
    owner: EntityId,
) -> StoreResult<()> {
    let needle = Value::Ref(owner);
    let cur = store.resolve_current(target)?;
    if store
        .arena
        .get(cur)
        .slot(prop)
        .as_list()
        .is_some_and(|items| items.contains(&needle))
    {
        return Ok(());
    }
    let (type_name, prop_name) = names(store, target, prop)?;
    let idx = store.write_current(target)?;
    let mut position = 0;
    if let Some(items) = store.arena.get_mut(idx).slot_mut(prop).as_list_mut() {
        position = items.len();
        items.push(needle.clone());
    }
    store.log_silent(ChangeRecord::added(
        target,
        type_name,
        prop_name,
        needle,
        Some(Locus::Index(position)),
    ));
    Ok(())
}

/// Insert `owner` into the set at `target.prop` unless already present.
fn insert_into_set(
    store: &mut Store,
    target: EntityId,
    prop: PropIdx,
    owner: EntityId,
) -> StoreResult<()> {
    let needle = Value::Ref(owner);
    let cur = store.resolve_current(target)?;
    if store
        .arena
        .get(cur)
        .slot(prop)
        .as_set()
        .is_some_and(|items| items.contains(&needle))
    {
        return Ok(());
    }
    let (type_name, prop_name) = names(store, target, prop)?;
    let idx = store.write_current(target)?;
    if let Some(items) = store.arena.get_mut(idx).slot_mut(prop).as_set_mut() {
        items.insert(needle.clone());
    }
    store.log_silent(ChangeRecord::added(target, type_name, prop_name, needle, None));
    Ok(())
}

/// Insert `owner` into the map at `target.prop` under its derived key.
///
/// Id-keyed maps key by the owner's id; string-keyed maps use the id's
/// canonical string form.
fn insert_into_map(
    store: &mut Store,
    target: EntityId,
    prop: PropIdx,
    key_kind: Option<MapKeyKind>,
    owner: EntityId,
) -> StoreResult<()> {
    let needle = Value::Ref(owner);
    let key = match key_kind {
        Some(MapKeyKind::Id) => MapKey::Id(owner),
        _ => MapKey::Str(owner.to_string()),
    };
    let cur = store.resolve_current(target)?;
    let entries = store.arena.get(cur).slot(prop).as_map();
    if entries.is_some_and(|m| m.values().any(|v| *v == needle)) {
        return Ok(());
    }
    let displaced = entries.and_then(|m| m.get(&key).cloned());
    let (type_name, prop_name) = names(store, target, prop)?;
    let idx = store.write_current(target)?;
    if let Some(entries) = store.arena.get_mut(idx).slot_mut(prop).as_map_mut() {
        entries.insert(key.clone(), needle.clone());
    }
    let record = match displaced {
        Some(old) => ChangeRecord::replaced_at(
            target,
            type_name,
            prop_name,
            old,
            needle,
            Locus::Key(key),
        ),
        None => ChangeRecord::added(
            target,
            type_name,
            prop_name,
            needle,
            Some(Locus::Key(key)),
        ),
    };
    store.log_silent(record);
    Ok(())
}
