//! Schema document loading and shapes.
//!
//! A schema document is the external, object-oriented description of the data
//! model: entities, structured types, nested elements, repeated collections
//! and associations. Documents load from YAML or JSON files and are read once
//! per compilation.
//!
//! ```yaml
//! namespace: demo
//! definitions:
//!   Person:
//!     kind: entity
//!     elements:
//!       id: { key: true, type: core.UUID }
//!       name: { type: core.String, length: 80 }
//!       emails:
//!         items: { type: core.String }
//!   Document:
//!     kind: entity
//!     elements:
//!       id: { key: true, type: core.UUID }
//!       author: { type: core.Association, target: Person }
//! ```
//!
//! Annotation keys start with `@` and are passed through opaquely; the
//! compiler copies them onto the generated properties and tables without
//! interpreting anything beyond the two keys named below.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

use super::errors::ModelError;

/// Marks an association as a derived back-reference with no stored column.
pub const VIRTUAL_ANNOTATION: &str = "@search.isVirtual";

/// Marks a column as full-text searchable; consumed by the DDL renderer.
pub const TEXT_ANNOTATION: &str = "@search.isText";

/// A parsed schema document: `namespace` plus named type definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub namespace: Option<String>,
    pub definitions: IndexMap<String, TypeDef>,
}

impl SchemaDocument {
    /// Load a document from a YAML or JSON file, dispatching on extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ModelError::DocumentRead {
            error: format!("{}: {}", path.display(), e),
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ModelError> {
        serde_yaml::from_str(content).map_err(|e| ModelError::DocumentParse {
            error: e.to_string(),
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self, ModelError> {
        serde_json::from_str(content).map_err(|e| ModelError::DocumentParse {
            error: e.to_string(),
        })
    }
}

/// Definition role: `entity` definitions compile to root tables, `type`
/// definitions are reusable structural or scalar building blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Entity,
    Type,
}

/// Association cardinality; `max` is `"1"` or `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    pub max: String,
}

impl Cardinality {
    pub fn is_many(&self) -> bool {
        self.max == "*"
    }
}

/// One type definition or element descriptor. The same shape serves both the
/// top-level `definitions` and the nested `elements`, mirroring the document
/// format: which fields are present decides the element's structural role
/// (see [`TypeDef::shape`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeDef {
    pub kind: Option<TypeKind>,
    /// Marks the entity key element. Exactly one per entity.
    pub key: bool,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    /// Association target entity name.
    pub target: Option<String>,
    pub cardinality: Option<Cardinality>,
    /// Nested structural elements, flattened into the owning table.
    pub elements: Option<IndexMap<String, TypeDef>>,
    /// Repeated collection item type; compiles to a child table.
    pub items: Option<Box<TypeDef>>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    /// Everything else, notably `@`-prefixed annotation keys.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Structural role of an element, decided by field presence. Checked in the
/// same precedence order the compiler descends: collections first, then named
/// types, then inline structures.
#[derive(Debug)]
pub enum ElementShape<'a> {
    /// `items` present: a repeated collection.
    Collection(&'a TypeDef),
    /// `type` present: a primitive, alias chain, or association.
    Typed(&'a str),
    /// `elements` present: an inline nested structure.
    Inline(&'a IndexMap<String, TypeDef>),
}

impl TypeDef {
    pub fn is_entity(&self) -> bool {
        self.kind == Some(TypeKind::Entity)
    }

    pub fn shape(&self) -> Option<ElementShape<'_>> {
        if let Some(items) = self.items.as_deref() {
            Some(ElementShape::Collection(items))
        } else if let Some(type_name) = self.type_name.as_deref() {
            Some(ElementShape::Typed(type_name))
        } else {
            self.elements.as_ref().map(ElementShape::Inline)
        }
    }

    /// The `@`-prefixed annotation keys, in document order.
    pub fn annotations(&self) -> IndexMap<String, Value> {
        self.extra
            .iter()
            .filter(|(k, _)| k.starts_with('@'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// True when `name` is annotated with a literal `true`.
    pub fn annotation_is_true(&self, name: &str) -> bool {
        matches!(self.extra.get(name), Some(Value::Bool(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_document() {
        let doc = SchemaDocument::from_yaml_str(
            r#"
namespace: demo
definitions:
  Person:
    kind: entity
    "@search.label": People
    elements:
      id: { key: true, type: core.UUID }
      name: { type: core.String, length: 80 }
"#,
        )
        .unwrap();
        assert_eq!(doc.namespace.as_deref(), Some("demo"));
        let person = &doc.definitions["Person"];
        assert!(person.is_entity());
        assert_eq!(person.annotations().len(), 1);
        let elements = person.elements.as_ref().unwrap();
        assert!(elements["id"].key);
        assert_eq!(elements["name"].length, Some(80));
    }

    #[test]
    fn test_element_shape_precedence() {
        let doc = SchemaDocument::from_yaml_str(
            r#"
definitions:
  T:
    kind: type
    elements:
      tags: { items: { type: core.String } }
      name: { type: core.String }
      address:
        elements:
          city: { type: core.String }
"#,
        )
        .unwrap();
        let elements = doc.definitions["T"].elements.as_ref().unwrap();
        assert!(matches!(
            elements["tags"].shape(),
            Some(ElementShape::Collection(_))
        ));
        assert!(matches!(
            elements["name"].shape(),
            Some(ElementShape::Typed("core.String"))
        ));
        assert!(matches!(
            elements["address"].shape(),
            Some(ElementShape::Inline(_))
        ));
    }

    #[test]
    fn test_virtual_annotation_flag() {
        let doc = SchemaDocument::from_json_str(
            r#"{
                "definitions": {
                    "E": {
                        "kind": "entity",
                        "elements": {
                            "id": { "key": true, "type": "core.UUID" },
                            "back": {
                                "type": "core.Association",
                                "target": "Other",
                                "@search.isVirtual": true
                            }
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let elements = doc.definitions["E"].elements.as_ref().unwrap();
        assert!(elements["back"].annotation_is_true(VIRTUAL_ANNOTATION));
        assert!(!elements["id"].annotation_is_true(VIRTUAL_ANNOTATION));
    }

    #[test]
    fn test_parse_error_reports_cause() {
        let err = SchemaDocument::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ModelError::DocumentParse { .. }));
    }
}
