pub mod compiler;
pub mod errors;
pub mod identifiers;
pub mod schema_config;
pub mod table_model;
pub mod type_resolver;

// Re-export commonly used types
pub use compiler::compile;
pub use errors::ModelError;
pub use schema_config::{Cardinality, SchemaDocument, TypeDef, TypeKind};
pub use table_model::{
    CompiledModel, EntityTree, ItemShape, KeySpec, PropertyDef, RelKind, Relationship,
    SqlTemplates, TableNode, TreeNode,
};
pub use type_resolver::ColumnType;
