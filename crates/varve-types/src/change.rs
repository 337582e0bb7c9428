use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::value::{MapKey, Value};

/// What a mutation did to an entity as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a mutation did to one property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A single slot, list position, or map key got a new value.
    Replace,
    /// An element was added to a container.
    Add,
    /// An element was removed from a container.
    Remove,
    /// A list element moved without changing membership.
    Reorder,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Replace => "replace",
            ChangeKind::Add => "add",
            ChangeKind::Remove => "remove",
            ChangeKind::Reorder => "reorder",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where inside a container a change landed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locus {
    /// List position.
    Index(usize),
    /// Map key.
    Key(MapKey),
    /// List reorder, original and final position.
    Move { from: usize, to: usize },
}

/// One recorded mutation.
///
/// Records carry ids and plain values, never live handles, so a record read
/// out of a historical state stays meaningful after any amount of undo, redo,
/// or further mutation. `old` and `new` are the before and after values where
/// the change kind has them; container adds fill only `new`, removes only
/// `old`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub entity: EntityId,
    pub type_name: String,
    pub op: Operation,
    /// Property touched; `None` for whole-entity create and delete.
    pub property: Option<String>,
    pub kind: Option<ChangeKind>,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub locus: Option<Locus>,
}

impl ChangeRecord {
    pub fn created(entity: EntityId, type_name: impl Into<String>) -> Self {
        Self {
            entity,
            type_name: type_name.into(),
            op: Operation::Create,
            property: None,
            kind: None,
            old: None,
            new: None,
            locus: None,
        }
    }

    pub fn deleted(entity: EntityId, type_name: impl Into<String>) -> Self {
        Self {
            entity,
            type_name: type_name.into(),
            op: Operation::Delete,
            property: None,
            kind: None,
            old: None,
            new: None,
            locus: None,
        }
    }

    pub fn replaced(
        entity: EntityId,
        type_name: impl Into<String>,
        property: impl Into<String>,
        old: Option<Value>,
        new: Option<Value>,
    ) -> Self {
        Self {
            entity,
            type_name: type_name.into(),
            op: Operation::Update,
            property: Some(property.into()),
            kind: Some(ChangeKind::Replace),
            old,
            new,
            locus: None,
        }
    }

    pub fn added(
        entity: EntityId,
        type_name: impl Into<String>,
        property: impl Into<String>,
        value: Value,
        locus: Option<Locus>,
    ) -> Self {
        Self {
            entity,
            type_name: type_name.into(),
            op: Operation::Update,
            property: Some(property.into()),
            kind: Some(ChangeKind::Add),
            old: None,
            new: Some(value),
            locus,
        }
    }

    pub fn removed(
        entity: EntityId,
        type_name: impl Into<String>,
        property: impl Into<String>,
        value: Value,
        locus: Option<Locus>,
    ) -> Self {
        Self {
            entity,
            type_name: type_name.into(),
            op: Operation::Update,
            property: Some(property.into()),
            kind: Some(ChangeKind::Remove),
            old: Some(value),
            new: None,
            locus,
        }
    }

    pub fn reordered(
        entity: EntityId,
        type_name: impl Into<String>,
        property: impl Into<String>,
        moved: Value,
        from: usize,
        to: usize,
    ) -> Self {
        Self {
            entity,
            type_name: type_name.into(),
            op: Operation::Update,
            property: Some(property.into()),
            kind: Some(ChangeKind::Reorder),
            old: None,
            new: Some(moved),
            locus: Some(Locus::Move { from, to }),
        }
    }

    /// Replace at a specific list index or map key.
    pub fn replaced_at(
        entity: EntityId,
        type_name: impl Into<String>,
        property: impl Into<String>,
        old: Value,
        new: Value,
        locus: Locus,
    ) -> Self {
        Self {
            entity,
            type_name: type_name.into(),
            op: Operation::Update,
            property: Some(property.into()),
            kind: Some(ChangeKind::Replace),
            old: Some(old),
            new: Some(new),
            locus: Some(locus),
        }
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}({})", self.op, self.type_name, self.entity.short())?;
        if let Some(prop) = &self.property {
            write!(f, ".{prop}")?;
        }
        if let Some(kind) = self.kind {
            write!(f, " [{kind}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_record_has_no_property() {
        let rec = ChangeRecord::created(EntityId::generate(), "Author");
        assert_eq!(rec.op, Operation::Create);
        assert!(rec.property.is_none());
        assert!(rec.kind.is_none());
    }

    #[test]
    fn replace_carries_both_values() {
        let rec = ChangeRecord::replaced(
            EntityId::generate(),
            "Author",
            "name",
            Some(Value::from("old")),
            Some(Value::from("new")),
        );
        assert_eq!(rec.kind, Some(ChangeKind::Replace));
        assert_eq!(rec.old, Some(Value::from("old")));
        assert_eq!(rec.new, Some(Value::from("new")));
    }

    #[test]
    fn reorder_tracks_both_positions() {
        let rec = ChangeRecord::reordered(
            EntityId::generate(),
            "Playlist",
            "tracks",
            Value::from("song"),
            3,
            0,
        );
        assert_eq!(rec.locus, Some(Locus::Move { from: 3, to: 0 }));
        assert_eq!(rec.kind, Some(ChangeKind::Reorder));
    }

    #[test]
    fn serde_roundtrip() {
        let rec = ChangeRecord::added(
            EntityId::generate(),
            "Author",
            "books",
            Value::Ref(EntityId::generate()),
            Some(Locus::Index(2)),
        );
        let json = serde_json::to_string(&rec).unwrap();
        let parsed: ChangeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, parsed);
    }

    #[test]
    fn display_is_compact() {
        let id = EntityId::generate();
        let rec = ChangeRecord::replaced(id, "Book", "title", None, Some(Value::from("t")));
        let shown = rec.to_string();
        assert!(shown.starts_with("update Book("));
        assert!(shown.contains(".title"));
    }
}
