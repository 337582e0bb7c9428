//! Foundation types for Varve.
//!
//! This crate provides the identity, value, metadata, and change-tracking
//! types used throughout the Varve system. Every other Varve crate depends
//! on `varve-types`.
//!
//! # Key Types
//!
//! - [`EntityId`] -- Stable UUID v7 identity of a logical entity
//! - [`Stamp`] -- Monotonic sequence number of a state in the ledger
//! - [`Value`] -- Scalar or reference payload of a property slot
//! - [`MapKey`] -- String or id key of a map-valued property
//! - [`TypeDescriptor`] -- Host-supplied type metadata
//! - [`Schema`] -- Compiled dispatch tables, validated once up front
//! - [`ChangeRecord`] -- One recorded mutation, ids and values only

pub mod change;
pub mod error;
pub mod ids;
pub mod schema;
pub mod value;

pub use change::{ChangeKind, ChangeRecord, Locus, Operation};
pub use error::SchemaError;
pub use ids::{EntityId, Stamp};
pub use schema::{
    ElementKind, InverseLink, InverseSpec, MapKeyKind, PropIdx, PropSchema, PropertyDescriptor,
    PropertyKind, RefSpec, ScalarKind, Schema, Shape, TypeDescriptor, TypeIdx, TypeSchema,
};
pub use value::{MapKey, Value};
