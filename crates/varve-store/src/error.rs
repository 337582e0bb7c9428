use thiserror::Error;

use varve_types::{EntityId, Stamp};

/// Errors from store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The named type is not part of the compiled schema.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// The named property does not exist on the entity's type.
    #[error("unknown property {property} on type {type_name}")]
    UnknownProperty { type_name: String, property: String },

    /// No state exists at the requested ledger index.
    #[error("unknown state index: {0}")]
    UnknownState(usize),

    /// The id does not resolve in the state being read.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// The handle's birth state is no longer an ancestor of the active
    /// state, typically because a redo branch was truncated.
    #[error("stale reference to {id}: stamp {born} is not an ancestor of the active state")]
    StaleReference { id: EntityId, born: Stamp },

    /// Write resolution ran without an open transaction.
    #[error("cannot write: no transaction is open")]
    FrozenViolation,

    /// A value did not fit the property's declared kind.
    #[error("invalid value for {type_name}.{property}: {reason}")]
    InvalidValue {
        type_name: String,
        property: String,
        reason: String,
    },

    /// A before-hook vetoed a mutation; the enclosing transaction rolls back.
    #[error("transaction vetoed by a before-hook")]
    TransactionVetoed,

    /// A transaction is already open, or a previous transaction panicked
    /// and poisoned the store.
    #[error("a transaction is already open on this store")]
    NestedTransaction,

    /// The id already names a live entity (import collision).
    #[error("duplicate entity id: {0}")]
    DuplicateEntity(EntityId),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
