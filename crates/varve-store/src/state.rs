//! The state ledger: an append-only chain of snapshots with an undo cursor.
//!
//! Each [`State`] is one committed transaction's view of the entity graph: a
//! stamp, an id-to-copy table, and the change log of the transaction that
//! produced it. Opening a state clones only the table; entity data stays in
//! the arena and is shared until written.
//!
//! # Invariants
//!
//! - `states` is sorted by stamp; stamps are allocated strictly increasing
//!   and never reused, even after a redo branch is dropped.
//! - `cursor` always points inside `states`; everything at or before it is
//!   the active ancestry, everything after it is the redo branch.
//! - Each state's `arena_floor` is the arena length at the moment it was
//!   opened, so dropping states from the tail can reclaim exactly the copies
//!   they introduced.

use std::collections::BTreeMap;

use tracing::debug;

use varve_types::{ChangeRecord, EntityId, Stamp};

use crate::record::{Arena, CopyIdx};

/// One snapshot of the entity graph.
#[derive(Clone, Debug)]
pub struct State {
    stamp: Stamp,
    table: BTreeMap<EntityId, CopyIdx>,
    log: Vec<ChangeRecord>,
    arena_floor: usize,
}

impl State {
    fn genesis() -> Self {
        Self {
            stamp: Stamp::ZERO,
            table: BTreeMap::new(),
            log: Vec::new(),
            arena_floor: 0,
        }
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Resolve an id to its physical copy in this state.
    pub fn lookup(&self, id: EntityId) -> Option<CopyIdx> {
        self.table.get(&id).copied()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.table.contains_key(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.table.len()
    }

    /// All live entities in creation order (ids are time-ordered).
    pub fn entries(&self) -> impl Iterator<Item = (EntityId, CopyIdx)> + '_ {
        self.table.iter().map(|(id, idx)| (*id, *idx))
    }

    /// The change log of the transaction that produced this state.
    pub fn log(&self) -> &[ChangeRecord] {
        &self.log
    }

    pub(crate) fn arena_floor(&self) -> usize {
        self.arena_floor
    }

    pub(crate) fn insert(&mut self, id: EntityId, idx: CopyIdx) {
        self.table.insert(id, idx);
    }

    pub(crate) fn remove(&mut self, id: EntityId) -> Option<CopyIdx> {
        self.table.remove(&id)
    }

    pub(crate) fn push_record(&mut self, record: ChangeRecord) {
        self.log.push(record);
    }
}

/// Append-only chain of states plus the undo cursor.
#[derive(Debug)]
pub struct Ledger {
    states: Vec<State>,
    cursor: usize,
    next_stamp: Stamp,
}

impl Ledger {
    /// A ledger holding only the empty genesis state.
    pub fn new() -> Self {
        Self {
            states: vec![State::genesis()],
            cursor: 0,
            next_stamp: Stamp::ZERO.next(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The active state.
    pub fn current(&self) -> &State {
        &self.states[self.cursor]
    }

    pub(crate) fn current_mut(&mut self) -> &mut State {
        &mut self.states[self.cursor]
    }

    pub fn state_at(&self, index: usize) -> Option<&State> {
        self.states.get(index)
    }

    /// Number of undo steps available.
    pub fn undo_depth(&self) -> usize {
        self.cursor
    }

    /// Number of redo steps available.
    pub fn redo_depth(&self) -> usize {
        self.states.len() - 1 - self.cursor
    }

    /// Returns `true` if `stamp` belongs to the active ancestry, i.e. the
    /// states at or before the cursor. Handles born on a truncated or
    /// not-yet-redone branch fail this check.
    pub fn is_ancestor_stamp(&self, stamp: Stamp) -> bool {
        self.states[..=self.cursor]
            .binary_search_by(|s| s.stamp.cmp(&stamp))
            .is_ok()
    }

    /// Open a new state on top of the cursor, dropping any redo branch.
    ///
    /// Returns the new state's stamp. The table is cloned shallowly from
    /// the predecessor; the arena is untouched except for reclaiming the
    /// dropped branch's copies.
    pub(crate) fn open_state(&mut self, arena: &mut Arena) -> Stamp {
        if self.cursor + 1 < self.states.len() {
            let dropped = self.states.len() - self.cursor - 1;
            let floor = self.states[self.cursor + 1].arena_floor;
            arena.truncate(floor);
            self.states.truncate(self.cursor + 1);
            debug!(dropped, floor, "redo branch truncated");
        }
        let stamp = self.next_stamp;
        self.next_stamp = stamp.next();
        let table = self.states[self.cursor].table.clone();
        self.states.push(State {
            stamp,
            table,
            log: Vec::new(),
            arena_floor: arena.len(),
        });
        self.cursor += 1;
        stamp
    }

    /// Drop the newest state and every copy it introduced. Used for
    /// rollback and for commits that turned out to be no-ops.
    pub(crate) fn discard_open(&mut self, arena: &mut Arena) {
        debug_assert!(self.cursor == self.states.len() - 1 && self.cursor > 0);
        if let Some(state) = self.states.pop() {
            arena.truncate(state.arena_floor);
            self.cursor -= 1;
        }
    }

    /// Step the cursor back one state. Returns `false` at the oldest state.
    pub(crate) fn undo(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        debug!(cursor = self.cursor, "undo");
        true
    }

    /// Step the cursor forward one state. Returns `false` at the newest.
    pub(crate) fn redo(&mut self) -> bool {
        if self.cursor + 1 >= self.states.len() {
            return false;
        }
        self.cursor += 1;
        debug!(cursor = self.cursor, "redo");
        true
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
