use thiserror::Error;

use varve_store::StoreError;
use varve_types::EntityId;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("unknown property {property} on type {type_name}")]
    UnknownProperty { type_name: String, property: String },

    #[error("invalid record for {id}: {reason}")]
    InvalidRecord { id: EntityId, reason: String },

    #[error("duplicate entity id: {0}")]
    DuplicateEntity(EntityId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;
