//! # Data Loading Error Types
//!
//! Load-time errors. Any of these rejects the whole batch: the loader
//! produces either a complete per-table row set or an error, never a
//! partial result.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DataError {
    #[error("unknown object type `{entity}`")]
    UnknownEntity { entity: String },
    #[error("`{property}` is a reserved property name")]
    ReservedProperty { property: String },
    #[error("unknown property `{property}`")]
    UnknownProperty { property: String },
    #[error("`{property}` is not an array property")]
    NotAnArray { property: String },
    #[error("`{property}` expects an array value")]
    ArrayExpected { property: String },
    #[error("`{path}` expects an object value")]
    ObjectExpected { path: String },
    #[error("`{property}` expects a scalar value")]
    ScalarExpected { property: String },
    #[error("association property `{property}` expects an object value")]
    AssociationValue { property: String },
    #[error("association property `{property}` has no source property")]
    AssociationMissingSource { property: String },
    #[error("association property `{property}` has no source")]
    AssociationNoSource { property: String },
    #[error("association property `{property}` has conflicting sources")]
    AssociationConflictingSources { property: String },
    #[error("association property `{property}` source is not a list")]
    AssociationSourceNotList { property: String },
    #[error("data must not be provided for virtual property `{property}`")]
    VirtualData { property: String },
    #[error("object sources {sources:?} were already referenced with conflicting keys")]
    ConflictingReservations { sources: Vec<String> },
    #[error(
        "references to objects outside of one data package are not supported; \
         no object exists with source {sources:?}"
    )]
    DanglingReferences { sources: Vec<String> },
}
