use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a logical entity.
///
/// An `EntityId` names the entity itself, not any particular version of it.
/// Every physical copy of an entity across the state ledger carries the same
/// `EntityId`. Ids are UUID v7, so iterating a `BTreeMap` keyed by `EntityId`
/// visits entities in creation order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Mint a fresh id. Time-ordered, so later entities sort after earlier ones.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID, e.g. one read back from an export.
    pub const fn from_uuid(raw: Uuid) -> Self {
        Self(raw)
    }

    /// Parse from the canonical hyphenated string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short representation (first 8 hex characters), for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.short())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(raw: Uuid) -> Self {
        Self(raw)
    }
}

/// Monotonic sequence number of one state in the ledger.
///
/// Stamps are allocated in strictly increasing order and never reused, even
/// after a redo branch is truncated. A physical copy records the stamp of the
/// state it was created for; comparing a handle's stamp against the ancestry
/// of the active state is what detects stale references.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Stamp(u64);

impl Stamp {
    /// The genesis stamp.
    pub const ZERO: Stamp = Stamp(0);

    /// Wrap a raw sequence number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw sequence number.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The stamp immediately after this one.
    pub fn next(self) -> Stamp {
        Stamp(self.0.saturating_add(1))
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
