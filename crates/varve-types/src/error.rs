use thiserror::Error;

use crate::schema::Shape;

/// Errors raised while compiling a descriptor set.
///
/// Every variant is a structural defect in the supplied type metadata; none
/// of them can occur once [`Schema::compile`](crate::schema::Schema::compile)
/// has returned `Ok`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate type: {0}")]
    DuplicateType(String),

    #[error("duplicate property {property} on type {type_name}")]
    DuplicateProperty { type_name: String, property: String },

    #[error("property {type_name}.{property} references unknown type {target}")]
    UnknownTargetType {
        type_name: String,
        property: String,
        target: String,
    },

    #[error("inverse of {type_name}.{property} names unknown property {target}.{inverse}")]
    UnknownInverseProperty {
        type_name: String,
        property: String,
        target: String,
        inverse: String,
    },

    #[error(
        "inverse of {type_name}.{property} declares {target}.{inverse} as {declared}, \
         but it is {actual}"
    )]
    InverseKindMismatch {
        type_name: String,
        property: String,
        target: String,
        inverse: String,
        declared: Shape,
        actual: Shape,
    },

    #[error(
        "inverse pair {type_name}.{property} and {target}.{inverse} is not symmetric: \
         both sides must declare each other"
    )]
    AsymmetricInverse {
        type_name: String,
        property: String,
        target: String,
        inverse: String,
    },
}
