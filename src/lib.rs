//! Tablefold - nested entity models over relational tables
//!
//! This crate compiles an object-oriented schema into a relational model and
//! loads nested object payloads into it:
//! - Schema compilation: entities, nested structures, collections and
//!   associations flattened into per-level tables with surrogate key chains
//! - Per-entity external↔internal trees for property path translation
//! - Data loading: nested objects to per-table insert rows, with deferred
//!   cross-object reference resolution
//! - DDL rendering for the compiled tables

pub mod data_loader;
pub mod entity_catalog;
pub mod sql_render;

pub use data_loader::{load, load_with_keys, DataError, LoadResult};
pub use entity_catalog::{compile, CompiledModel, ModelError, SchemaDocument};
