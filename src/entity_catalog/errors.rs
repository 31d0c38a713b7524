//! # Entity Model Error Types
//!
//! Compile-time errors raised while turning a schema document into the
//! relational table model. Every variant carries the path of the offending
//! entity or element so callers can surface actionable diagnostics.
//!
//! Load-time errors live in [`crate::data_loader::errors`]; the two kinds are
//! deliberately separate types because they terminate different operations.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("failed to read schema document: {error}")]
    DocumentRead { error: String },
    #[error("failed to parse schema document: {error}")]
    DocumentParse { error: String },
    #[error("`{entity}`: an entity must have exactly one key element")]
    EntityKey { entity: String },
    #[error("`{path}`: unexpected type `{type_name}`")]
    UnknownType { path: String, type_name: String },
    #[error("`{path}`: association target `{target}` is not an entity definition")]
    UnknownTarget { path: String, target: String },
    #[error("`{path}`: element must declare a type, nested elements, or collection items")]
    MalformedElement { path: String },
    #[error("`{path}`: annotation `@search.isVirtual` is only allowed on associations")]
    VirtualNotAssociation { path: String },
    #[error("`{path}`: annotation `@search.isVirtual` is only allowed on root level")]
    VirtualNotRoot { path: String },
    #[error(
        "`{path}`: annotation `@search.isVirtual` is only allowed if exactly one \
         backward association exists from referred entity `{target}`, found {found}"
    )]
    VirtualBackwardAssociation {
        path: String,
        target: String,
        found: usize,
    },
}
