//! Scalar type resolution.
//!
//! Maps the document's `core.*` type names onto storage column types,
//! dereferencing alias chains (a definition whose `type` names another
//! definition) until a primitive or an association is reached. The resolver
//! is a pure function of the schema document plus the current descriptor.
//!
//! # Supported primitives
//!
//! - `core.UUID` - NVARCHAR(36)
//! - `core.String` - NVARCHAR, default length 5000
//! - `core.Integer` - INTEGER
//! - `core.Integer64` - BIGINT
//! - `core.Decimal` - DECIMAL with optional precision/scale
//! - `core.Boolean` - BOOLEAN
//! - `core.Date` / `core.Time` / `core.DateTime` / `core.Timestamp`
//! - `core.Association` - resolved to the target entity's key type by the
//!   compiler; the resolver only classifies it

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ModelError;
use super::schema_config::{SchemaDocument, TypeDef};

/// Default length for strings that do not declare one.
pub const DEFAULT_STRING_LENGTH: u32 = 5000;

/// Upper bound on alias-chain hops; a longer chain is reported as an
/// unresolvable type instead of looping on a cyclic document.
const MAX_ALIAS_DEPTH: usize = 32;

/// Storage type of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ColumnType {
    NVarchar {
        length: u32,
    },
    Integer,
    BigInt,
    Decimal {
        #[serde(skip_serializing_if = "Option::is_none")]
        precision: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        scale: Option<u32>,
    },
    Boolean,
    Date,
    Time,
    DateTime,
    Timestamp,
}

impl ColumnType {
    /// Render the type for DDL, e.g. `NVARCHAR(36)` or `DECIMAL(10,2)`.
    pub fn sql(&self) -> String {
        match self {
            ColumnType::NVarchar { length } => format!("NVARCHAR({length})"),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Decimal {
                precision: Some(p),
                scale: Some(s),
            } => format!("DECIMAL({p},{s})"),
            ColumnType::Decimal { .. } => "DECIMAL".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// Outcome of resolving an element's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedType {
    Column(ColumnType),
    Association { target: String },
}

/// Resolve `def`'s declared type to a storage type, following alias chains.
///
/// `path` is the external element path, used only for diagnostics.
pub fn resolve(
    doc: &SchemaDocument,
    def: &TypeDef,
    path: &[String],
) -> Result<ResolvedType, ModelError> {
    resolve_at_depth(doc, def, path, 0)
}

fn resolve_at_depth(
    doc: &SchemaDocument,
    def: &TypeDef,
    path: &[String],
    depth: usize,
) -> Result<ResolvedType, ModelError> {
    let Some(type_name) = def.type_name.as_deref() else {
        return Err(ModelError::MalformedElement {
            path: path.join("."),
        });
    };
    if depth > MAX_ALIAS_DEPTH {
        return Err(ModelError::UnknownType {
            path: path.join("."),
            type_name: type_name.to_string(),
        });
    }
    if let Some(alias) = doc.definitions.get(type_name) {
        if alias.type_name.is_some() {
            return resolve_at_depth(doc, alias, path, depth + 1);
        }
        // A named definition without a type is structural; the compiler
        // folds those before asking for a scalar type.
        return Err(ModelError::UnknownType {
            path: path.join("."),
            type_name: type_name.to_string(),
        });
    }
    let column = match type_name {
        "core.UUID" => ColumnType::NVarchar { length: 36 },
        "core.String" => ColumnType::NVarchar {
            length: def.length.unwrap_or(DEFAULT_STRING_LENGTH),
        },
        "core.Integer" => ColumnType::Integer,
        "core.Integer64" => ColumnType::BigInt,
        "core.Decimal" => ColumnType::Decimal {
            precision: def.precision,
            scale: def.scale,
        },
        "core.Boolean" => ColumnType::Boolean,
        "core.Date" => ColumnType::Date,
        "core.Time" => ColumnType::Time,
        "core.DateTime" => ColumnType::DateTime,
        "core.Timestamp" => ColumnType::Timestamp,
        "core.Association" => {
            let target = def.target.clone().ok_or_else(|| ModelError::MalformedElement {
                path: path.join("."),
            })?;
            return Ok(ResolvedType::Association { target });
        }
        _ => {
            return Err(ModelError::UnknownType {
                path: path.join("."),
                type_name: type_name.to_string(),
            })
        }
    };
    Ok(ResolvedType::Column(column))
}

/// Follow a named type chain until a structural definition (one carrying
/// `elements`) is reached. Returns `None` when the chain ends in a scalar or
/// leaves the document.
pub fn structural_elements<'a>(
    doc: &'a SchemaDocument,
    type_name: &str,
) -> Option<&'a IndexMap<String, TypeDef>> {
    let mut current = doc.definitions.get(type_name)?;
    for _ in 0..MAX_ALIAS_DEPTH {
        if let Some(elements) = &current.elements {
            return Some(elements);
        }
        current = doc.definitions.get(current.type_name.as_deref()?)?;
    }
    None
}
