//! Physical copies and the arena that owns them.
//!
//! Every version of every entity is an [`EntityRecord`] in one append-only
//! [`Arena`]. States never own entity data; they map ids to [`CopyIdx`]
//! values, so unchanged entities are shared structurally across states.
//!
//! # Invariants
//!
//! - The arena only grows, except when a redo branch or an open transaction
//!   is discarded; both truncate a contiguous tail.
//! - `successor` is a plain forward index, not an owning link. It is set
//!   while a newer copy exists in an open transaction and cleared when that
//!   transaction finalizes or rolls back.

use std::collections::{BTreeMap, BTreeSet};

use varve_types::{EntityId, MapKey, PropIdx, PropertyKind, Stamp, TypeIdx, TypeSchema, Value};

/// Arena index of one physical copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CopyIdx(u32);

impl CopyIdx {
    pub(crate) fn new(raw: usize) -> Self {
        Self(raw as u32)
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Backing storage for one property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    Single(Option<Value>),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Map(BTreeMap<MapKey, Value>),
}

impl Slot {
    /// The empty slot for a declared property kind.
    pub(crate) fn empty_for(kind: &PropertyKind) -> Slot {
        match kind {
            PropertyKind::Scalar(_) | PropertyKind::Reference(_) => Slot::Single(None),
            PropertyKind::List(_) => Slot::List(Vec::new()),
            PropertyKind::Set(_) => Slot::Set(BTreeSet::new()),
            PropertyKind::Map { .. } => Slot::Map(BTreeMap::new()),
        }
    }

    pub fn as_single(&self) -> Option<&Option<Value>> {
        match self {
            Slot::Single(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Slot::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Slot::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<MapKey, Value>> {
        match self {
            Slot::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub(crate) fn as_single_mut(&mut self) -> Option<&mut Option<Value>> {
        match self {
            Slot::Single(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Slot::List(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn as_set_mut(&mut self) -> Option<&mut BTreeSet<Value>> {
        match self {
            Slot::Set(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn as_map_mut(&mut self) -> Option<&mut BTreeMap<MapKey, Value>> {
        match self {
            Slot::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Returns `true` if the given id appears as a reference anywhere in
    /// this slot.
    pub(crate) fn contains_ref(&self, id: EntityId) -> bool {
        let target = Value::Ref(id);
        match self {
            Slot::Single(v) => v.as_ref() == Some(&target),
            Slot::List(items) => items.contains(&target),
            Slot::Set(items) => items.contains(&target),
            Slot::Map(entries) => entries.values().any(|v| *v == target),
        }
    }
}

/// One physical copy of an entity, pinned to the state it was created for.
#[derive(Clone, Debug)]
pub struct EntityRecord {
    id: EntityId,
    type_idx: TypeIdx,
    born: Stamp,
    successor: Option<CopyIdx>,
    slots: Vec<Slot>,
}

impl EntityRecord {
    /// A fresh copy with every slot empty.
    pub(crate) fn new(id: EntityId, type_idx: TypeIdx, born: Stamp, ty: &TypeSchema) -> Self {
        Self {
            id,
            type_idx,
            born,
            successor: None,
            slots: ty.props().map(|(_, p)| Slot::empty_for(&p.kind)).collect(),
        }
    }

    /// Clone this copy for a newer state. The clone starts with no successor.
    pub(crate) fn clone_for(&self, born: Stamp) -> Self {
        Self {
            id: self.id,
            type_idx: self.type_idx,
            born,
            successor: None,
            slots: self.slots.clone(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn type_idx(&self) -> TypeIdx {
        self.type_idx
    }

    pub fn born(&self) -> Stamp {
        self.born
    }

    pub fn successor(&self) -> Option<CopyIdx> {
        self.successor
    }

    pub(crate) fn set_successor(&mut self, successor: Option<CopyIdx>) {
        self.successor = successor;
    }

    pub fn slot(&self, idx: PropIdx) -> &Slot {
        &self.slots[idx]
    }

    pub(crate) fn slot_mut(&mut self, idx: PropIdx) -> &mut Slot {
        &mut self.slots[idx]
    }

    /// Value equality of all slots, ignoring version bookkeeping.
    pub(crate) fn slots_eq(&self, other: &EntityRecord) -> bool {
        self.slots == other.slots
    }
}

/// Append-only storage of physical copies.
///
/// Indices handed out by [`Arena::push`] stay valid until a truncation cuts
/// them off; the ledger only truncates indices at or above the floor of the
/// states being dropped, so indices referenced by surviving states are never
/// invalidated.
#[derive(Debug, Default)]
pub struct Arena {
    copies: Vec<EntityRecord>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    pub fn get(&self, idx: CopyIdx) -> &EntityRecord {
        &self.copies[idx.as_usize()]
    }

    pub(crate) fn get_mut(&mut self, idx: CopyIdx) -> &mut EntityRecord {
        &mut self.copies[idx.as_usize()]
    }

    pub(crate) fn push(&mut self, record: EntityRecord) -> CopyIdx {
        let idx = CopyIdx::new(self.copies.len());
        self.copies.push(record);
        idx
    }

    pub(crate) fn truncate(&mut self, floor: usize) {
        self.copies.truncate(floor);
    }
}
