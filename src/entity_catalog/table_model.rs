//! Compiled table model.
//!
//! The output of schema compilation: one [`TableNode`] per relational table
//! and one [`EntityTree`] per entity. Both are immutable after compilation
//! and shared read-only by every downstream consumer: the data loader walks
//! the entity trees, view and DDL generators read the table nodes. Nothing
//! in here refers back to the schema document.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema_config::Cardinality;
use super::type_resolver::ColumnType;

/// Base name of the generated surrogate key columns. A table at nesting
/// level N owns `_ID{N}` and references its parent through `_ID{N-1}`
/// (plain `_ID` at level 1, which holds the root entity's key).
pub const KEY_COLUMN_BASE: &str = "_ID";

/// Generated keys are hyphenated UUID strings.
pub const KEY_COLUMN_LENGTH: u32 = 36;

/// Column holding the item value in tables backing scalar collections.
pub const VALUE_COLUMN: &str = "_VALUE";

/// Placeholder substituted by [`SqlTemplates::select_for`] / `delete_for`.
pub const ID_LIST_PLACEHOLDER: &str = "{id_list}";

pub fn key_column_type() -> ColumnType {
    ColumnType::NVarchar {
        length: KEY_COLUMN_LENGTH,
    }
}

/// Own and parent key column names for a nested table. `level` must be >= 1;
/// level 0 tables use the entity's declared key element instead.
pub fn level_key_columns(level: usize) -> (String, String) {
    debug_assert!(level >= 1, "level 0 tables use the entity key element");
    let pk = format!("{KEY_COLUMN_BASE}{level}");
    let pk_parent = if level == 1 {
        KEY_COLUMN_BASE.to_string()
    } else {
        format!("{}{}", KEY_COLUMN_BASE, level - 1)
    };
    (pk, pk_parent)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelKind {
    /// Reference to another entity by key; no table of its own.
    Association,
    /// Repeated structural child owned by this table.
    Containment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub table_name: String,
    pub kind: RelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
}

/// One column or relationship of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Storage type; absent for containments, which store nothing here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<ColumnType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<Relationship>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, Value>,
    /// External path from the owning table's root, for traceability.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_path: Vec<String>,
    /// Virtual properties carry no stored column and are excluded from
    /// every projection.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_virtual: bool,
}

impl PropertyDef {
    pub fn column(column_type: ColumnType, external_path: Vec<String>) -> Self {
        PropertyDef {
            column_type: Some(column_type),
            rel: None,
            annotations: IndexMap::new(),
            external_path,
            is_virtual: false,
        }
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Precomputed statement templates, parameterized by an id list of root
/// entity keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlTemplates {
    pub select: String,
    pub delete: String,
}

impl SqlTemplates {
    pub fn select_for(&self, ids: &[&str]) -> String {
        self.select.replace(ID_LIST_PLACEHOLDER, &render_id_list(ids))
    }

    pub fn delete_for(&self, ids: &[&str]) -> String {
        self.delete.replace(ID_LIST_PLACEHOLDER, &render_id_list(ids))
    }
}

/// Render ids as a quoted SQL list, escaping embedded quotes.
pub fn render_id_list(ids: &[&str]) -> String {
    ids.iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One relational table of the compiled model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableNode {
    pub table_name: String,
    /// Names from the schema root down to this table.
    pub external_path: Vec<String>,
    /// 0 = entity root, N = the N-th nested collection level.
    pub level: usize,
    /// This table's own key column.
    pub pk: String,
    /// Column holding the immediate parent's key; absent at level 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_parent: Option<String>,
    /// Owning table at `level - 1`; absent at level 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub properties: IndexMap<String, PropertyDef>,
    /// Child tables at `level + 1` owned by this table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, Value>,
    pub sql: SqlTemplates,
}

impl TableNode {
    /// Column names that carry stored data, in declaration order.
    pub fn projected_columns(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, p)| !p.is_virtual)
            .map(|(name, _)| name.as_str())
    }
}

/// Where an entity's surrogate key lives: the external element reserved for
/// it and the column the generated value is written to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySpec {
    pub element: String,
    pub column: String,
}

/// Association details carried on the external tree, everything the loader
/// needs to resolve a reference without consulting the table nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDef {
    /// Column on the owning table that stores the foreign key.
    pub column_name: String,
    pub target_table: String,
    /// External name of the target entity's key element.
    pub target_key_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_virtual: bool,
}

/// One node of the external↔internal tree. The tree mirrors the external
/// object shape; each payload property maps onto exactly one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    /// Scalar leaf stored in a column of the owning table.
    Column { column_name: String },
    /// Nested structural object, flattened into the owning table.
    Object { elements: IndexMap<String, TreeNode> },
    /// Repeated collection backed by a child table.
    Collection { table_name: String, items: ItemShape },
    /// Reference to another entity.
    Association(AssociationDef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemShape {
    /// Structured items: one child row per object.
    Objects { elements: IndexMap<String, TreeNode> },
    /// Scalar items: one child row per value, stored in `column_name`.
    Values { column_name: String },
}

/// Per-entity external↔internal translation tree. This is the single
/// contract the data loader (and external property-path translation)
/// consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTree {
    pub table_name: String,
    pub key: KeySpec,
    pub elements: IndexMap<String, TreeNode>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, Value>,
}

/// Everything compilation produces. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledModel {
    pub tables: IndexMap<String, TableNode>,
    pub entities: IndexMap<String, EntityTree>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_key_columns() {
        assert_eq!(
            level_key_columns(1),
            ("_ID1".to_string(), "_ID".to_string())
        );
        assert_eq!(
            level_key_columns(2),
            ("_ID2".to_string(), "_ID1".to_string())
        );
        assert_eq!(
            level_key_columns(3),
            ("_ID3".to_string(), "_ID2".to_string())
        );
    }

    #[test]
    fn test_id_list_rendering() {
        assert_eq!(render_id_list(&["a", "b"]), "'a', 'b'");
        assert_eq!(render_id_list(&["o'brien"]), "'o''brien'");
    }

    #[test]
    fn test_template_substitution() {
        let sql = SqlTemplates {
            select: "SELECT \"ID\" from \"T\" where \"ID\" in ({id_list})".to_string(),
            delete: "DELETE from \"T\" where \"ID\" in ({id_list})".to_string(),
        };
        assert_eq!(
            sql.select_for(&["1", "2"]),
            "SELECT \"ID\" from \"T\" where \"ID\" in ('1', '2')"
        );
        assert_eq!(
            sql.delete_for(&["x"]),
            "DELETE from \"T\" where \"ID\" in ('x')"
        );
    }
}
