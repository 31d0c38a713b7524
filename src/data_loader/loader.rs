//! Object-to-row transformation.
//!
//! Takes a batch of external objects and the compiled model and produces
//! per-table row sets ready for bulk insertion. The recursion mirrors the
//! per-entity external↔internal tree: structural nesting writes into the
//! current row, collections open child rows in child tables, associations
//! resolve to foreign keys through the identity map.
//!
//! Column slots are allocated per table in first-encounter order and grow
//! lazily as later objects introduce properties earlier objects did not
//! carry; finalization pads every row to the table's final column count.

use indexmap::IndexMap;
use log::debug;
use serde_json::{Map, Value};

use crate::entity_catalog::table_model::{
    level_key_columns, AssociationDef, CompiledModel, EntityTree, ItemShape, TreeNode,
};

use super::errors::DataError;
use super::identity_map::IdentityMap;
use super::keygen::{KeyGenerator, UuidKeys};

/// Name of the payload property carrying batch-local identifying values.
pub const SOURCE_PROPERTY: &str = "source";

/// Rows for one table: column names in first-encounter order, every row
/// padded to the same arity.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInserts {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Everything one load call produces, one entry per table touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadResult {
    pub tables: IndexMap<String, TableInserts>,
}

/// Load a batch with random UUID surrogate keys.
pub fn load(
    model: &CompiledModel,
    batch: &IndexMap<String, Vec<Value>>,
) -> Result<LoadResult, DataError> {
    let mut keys = UuidKeys;
    load_with_keys(model, batch, &mut keys)
}

/// Load a batch with a caller-supplied key generator.
pub fn load_with_keys(
    model: &CompiledModel,
    batch: &IndexMap<String, Vec<Value>>,
    keys: &mut dyn KeyGenerator,
) -> Result<LoadResult, DataError> {
    DataLoader {
        model,
        keys,
        buffers: IndexMap::new(),
        identity: IdentityMap::new(),
    }
    .run(batch)
}

#[derive(Debug, Default)]
struct TableBuffer {
    columns: IndexMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl TableBuffer {
    fn slot(&mut self, column: &str) -> usize {
        if let Some(&idx) = self.columns.get(column) {
            idx
        } else {
            let idx = self.columns.len();
            self.columns.insert(column.to_string(), idx);
            idx
        }
    }
}

struct DataLoader<'a> {
    model: &'a CompiledModel,
    keys: &'a mut dyn KeyGenerator,
    buffers: IndexMap<String, TableBuffer>,
    identity: IdentityMap,
}

impl<'a> DataLoader<'a> {
    fn run(mut self, batch: &IndexMap<String, Vec<Value>>) -> Result<LoadResult, DataError> {
        let model = self.model;
        for (entity_name, objects) in batch {
            let tree = model
                .entities
                .get(entity_name)
                .ok_or_else(|| DataError::UnknownEntity {
                    entity: entity_name.clone(),
                })?;
            debug!("loading {} objects of `{entity_name}`", objects.len());
            for object in objects {
                self.load_root_object(entity_name, tree, object)?;
            }
        }

        let dangling = self.identity.dangling();
        if !dangling.is_empty() {
            return Err(DataError::DanglingReferences { sources: dangling });
        }

        let mut tables = IndexMap::new();
        for (name, buffer) in self.buffers {
            let width = buffer.columns.len();
            let columns: Vec<String> = buffer.columns.keys().cloned().collect();
            let rows = buffer
                .rows
                .into_iter()
                .map(|mut row| {
                    row.resize(width, Value::Null);
                    row
                })
                .collect();
            tables.insert(name, TableInserts { columns, rows });
        }
        debug!("load produced rows for {} tables", tables.len());
        Ok(LoadResult { tables })
    }

    fn load_root_object(
        &mut self,
        entity_name: &str,
        tree: &EntityTree,
        object: &Value,
    ) -> Result<(), DataError> {
        let object = object.as_object().ok_or_else(|| DataError::ObjectExpected {
            path: entity_name.to_string(),
        })?;
        // The key element is reserved for the generated surrogate.
        if object.contains_key(&tree.key.element) {
            return Err(DataError::ReservedProperty {
                property: tree.key.element.clone(),
            });
        }

        let generated = self.keys.next_key(&tree.table_name, 0);
        // Source keys make this object addressable by associations anywhere
        // in the batch; a key already reserved by an association wins.
        let id = match object.get(SOURCE_PROPERTY) {
            Some(Value::Array(sources)) => {
                let encodings = sources.iter().map(IdentityMap::encode).collect();
                self.identity.claim(encodings, generated)?
            }
            _ => generated,
        };

        let mut row = Vec::new();
        self.write_cell(&tree.table_name, &mut row, &tree.key.column, Value::String(id.clone()));
        self.process_properties(&tree.table_name, 0, &tree.elements, object, &mut row, &id)?;
        self.push_row(&tree.table_name, row);
        Ok(())
    }

    /// Walk one object's properties against a tree level, writing scalars
    /// into `row` and spawning child rows for collections.
    fn process_properties(
        &mut self,
        table: &str,
        level: usize,
        elements: &IndexMap<String, TreeNode>,
        object: &Map<String, Value>,
        row: &mut Vec<Value>,
        object_id: &str,
    ) -> Result<(), DataError> {
        for (name, value) in object {
            let node = elements
                .get(name)
                .ok_or_else(|| DataError::UnknownProperty {
                    property: name.clone(),
                })?;
            match node {
                TreeNode::Column { column_name } => {
                    if value.is_array() {
                        return Err(DataError::NotAnArray {
                            property: name.clone(),
                        });
                    }
                    if value.is_object() {
                        return Err(DataError::ScalarExpected {
                            property: name.clone(),
                        });
                    }
                    self.write_cell(table, row, column_name, value.clone());
                }
                TreeNode::Object { elements: nested } => {
                    let nested_object =
                        value.as_object().ok_or_else(|| DataError::ObjectExpected {
                            path: name.clone(),
                        })?;
                    self.process_properties(table, level, nested, nested_object, row, object_id)?;
                }
                TreeNode::Collection { table_name, items } => {
                    let array = value.as_array().ok_or_else(|| DataError::ArrayExpected {
                        property: name.clone(),
                    })?;
                    self.process_collection(name, table_name, level + 1, items, array, object_id)?;
                }
                TreeNode::Association(assoc) => {
                    let foreign_key = self.resolve_association(name, assoc, value)?;
                    self.write_cell(table, row, &assoc.column_name, foreign_key);
                }
            }
        }
        Ok(())
    }

    /// One child row per collection item, carrying the parent's key.
    fn process_collection(
        &mut self,
        property: &str,
        table: &str,
        level: usize,
        items: &ItemShape,
        array: &[Value],
        parent_id: &str,
    ) -> Result<(), DataError> {
        let (pk, pk_parent) = level_key_columns(level);
        match items {
            ItemShape::Objects { elements } => {
                for item in array {
                    let item_object = item.as_object().ok_or_else(|| DataError::ObjectExpected {
                        path: property.to_string(),
                    })?;
                    let item_id = self.keys.next_key(table, level);
                    let mut row = Vec::new();
                    self.write_cell(table, &mut row, &pk_parent, Value::String(parent_id.into()));
                    self.write_cell(table, &mut row, &pk, Value::String(item_id.clone()));
                    self.process_properties(table, level, elements, item_object, &mut row, &item_id)?;
                    self.push_row(table, row);
                }
            }
            ItemShape::Values { column_name } => {
                for item in array {
                    let item_id = self.keys.next_key(table, level);
                    let mut row = Vec::new();
                    self.write_cell(table, &mut row, &pk_parent, Value::String(parent_id.into()));
                    self.write_cell(table, &mut row, &pk, Value::String(item_id));
                    self.write_cell(table, &mut row, column_name, item.clone());
                    self.push_row(table, row);
                }
            }
        }
        Ok(())
    }

    /// Foreign key value for an association property: the embedded target
    /// key when the payload carries it, otherwise exactly one source key
    /// resolved through the identity map.
    fn resolve_association(
        &mut self,
        property: &str,
        assoc: &AssociationDef,
        value: &Value,
    ) -> Result<Value, DataError> {
        if assoc.is_virtual {
            return Err(DataError::VirtualData {
                property: property.to_string(),
            });
        }
        let object = value
            .as_object()
            .ok_or_else(|| DataError::AssociationValue {
                property: property.to_string(),
            })?;
        if let Some(key_value) = object.get(&assoc.target_key_field) {
            return Ok(key_value.clone());
        }
        match object.get(SOURCE_PROPERTY) {
            Some(Value::Array(sources)) => {
                let encodings: Vec<String> = sources.iter().map(IdentityMap::encode).collect();
                let Some(first) = encodings.first() else {
                    return Err(DataError::AssociationNoSource {
                        property: property.to_string(),
                    });
                };
                if encodings.iter().any(|e| e != first) {
                    return Err(DataError::AssociationConflictingSources {
                        property: property.to_string(),
                    });
                }
                if let Some(id) = self.identity.lookup(first) {
                    return Ok(Value::String(id.to_string()));
                }
                // Nothing seen yet: reserve a key for the referenced object
                // and expect it to show up before the batch ends.
                let reserved = self.keys.next_key(&assoc.target_table, 0);
                self.identity.reserve(first.clone(), reserved.clone());
                Ok(Value::String(reserved))
            }
            Some(_) => Err(DataError::AssociationSourceNotList {
                property: property.to_string(),
            }),
            None => Err(DataError::AssociationMissingSource {
                property: property.to_string(),
            }),
        }
    }

    fn write_cell(&mut self, table: &str, row: &mut Vec<Value>, column: &str, value: Value) {
        let buffer = self.buffers.entry(table.to_string()).or_default();
        let idx = buffer.slot(column);
        if row.len() <= idx {
            row.resize(idx + 1, Value::Null);
        }
        row[idx] = value;
    }

    fn push_row(&mut self, table: &str, row: Vec<Value>) {
        self.buffers.entry(table.to_string()).or_default().rows.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_catalog::compiler::compile;
    use crate::entity_catalog::schema_config::SchemaDocument;
    use crate::data_loader::keygen::SequentialKeys;
    use serde_json::json;

    const LIBRARY: &str = r#"
definitions:
  Person:
    kind: entity
    elements:
      id: { key: true, type: core.UUID }
      name: { type: core.String }
      nickname: { type: core.String }
      source:
        items:
          elements:
            sid: { type: core.String }
      docs: { type: core.Association, target: Document }
  Document:
    kind: entity
    elements:
      id: { key: true, type: core.UUID }
      title: { type: core.String }
      details:
        elements:
          pages: { type: core.Integer }
      chapters:
        items:
          elements:
            heading: { type: core.String }
      keywords:
        items: { type: core.String }
      author: { type: core.Association, target: Person }
      readers: { type: core.Association, target: Person, "@search.isVirtual": true }
"#;

    fn model() -> CompiledModel {
        compile(&SchemaDocument::from_yaml_str(LIBRARY).unwrap()).unwrap()
    }

    fn batch(entries: &[(&str, Value)]) -> IndexMap<String, Vec<Value>> {
        entries
            .iter()
            .map(|(name, objects)| {
                (
                    name.to_string(),
                    objects.as_array().cloned().expect("fixture is an array"),
                )
            })
            .collect()
    }

    fn load_sequential(
        model: &CompiledModel,
        batch: &IndexMap<String, Vec<Value>>,
    ) -> Result<LoadResult, DataError> {
        let mut keys = SequentialKeys::default();
        load_with_keys(model, batch, &mut keys)
    }

    #[test]
    fn test_single_object_rows() {
        let model = model();
        let batch = batch(&[(
            "Document",
            json!([{
                "title": "Moby-Dick",
                "details": { "pages": 635 },
                "chapters": [ { "heading": "Loomings" }, { "heading": "The Carpet-Bag" } ],
                "keywords": [ "whale", "sea" ],
                "author": { "id": "a-1" }
            }]),
        )]);
        let result = load_sequential(&model, &batch).unwrap();

        let doc = &result.tables["ENTITY/DOCUMENT"];
        assert_eq!(
            doc.columns,
            vec!["ID", "TITLE", "DETAILS.PAGES", "AUTHOR"]
        );
        assert_eq!(
            doc.rows,
            vec![vec![json!("k0"), json!("Moby-Dick"), json!(635), json!("a-1")]]
        );

        let chapters = &result.tables["DOCUMENT.CHAPTERS"];
        assert_eq!(chapters.columns, vec!["_ID", "_ID1", "HEADING"]);
        assert_eq!(
            chapters.rows,
            vec![
                vec![json!("k0"), json!("k1"), json!("Loomings")],
                vec![json!("k0"), json!("k2"), json!("The Carpet-Bag")],
            ]
        );

        let keywords = &result.tables["DOCUMENT.KEYWORDS"];
        assert_eq!(keywords.columns, vec!["_ID", "_ID1", "_VALUE"]);
        assert_eq!(
            keywords.rows,
            vec![
                vec![json!("k0"), json!("k3"), json!("whale")],
                vec![json!("k0"), json!("k4"), json!("sea")],
            ]
        );
    }

    #[test]
    fn test_column_order_survives_later_objects() {
        let model = model();
        let batch = batch(&[(
            "Person",
            json!([
                { "name": "Ishmael" },
                { "nickname": "Ish", "name": "Ishmael II" }
            ]),
        )]);
        let result = load_sequential(&model, &batch).unwrap();
        let people = &result.tables["ENTITY/PERSON"];
        assert_eq!(people.columns, vec!["ID", "NAME", "NICKNAME"]);
        // First row keeps its positions and gets padded for the column the
        // second object introduced.
        assert_eq!(
            people.rows,
            vec![
                vec![json!("k0"), json!("Ishmael"), Value::Null],
                vec![json!("k1"), json!("Ishmael II"), json!("Ish")],
            ]
        );
    }

    #[test]
    fn test_reference_resolution_object_first() {
        let model = model();
        let batch = batch(&[
            (
                "Person",
                json!([{ "name": "Melville", "source": [ { "sid": "P-1" } ] }]),
            ),
            (
                "Document",
                json!([{ "title": "T", "author": { "source": [ { "sid": "P-1" } ] } }]),
            ),
        ]);
        let result = load_sequential(&model, &batch).unwrap();
        let person_key = result.tables["ENTITY/PERSON"].rows[0][0].clone();
        let doc = &result.tables["ENTITY/DOCUMENT"];
        let author_idx = doc.columns.iter().position(|c| c == "AUTHOR").unwrap();
        assert_eq!(doc.rows[0][author_idx], person_key);
    }

    #[test]
    fn test_reference_resolution_association_first() {
        let model = model();
        let batch = batch(&[
            (
                "Document",
                json!([{ "title": "T", "author": { "source": [ { "sid": "P-1" } ] } }]),
            ),
            (
                "Person",
                json!([{ "name": "Melville", "source": [ { "sid": "P-1" } ] }]),
            ),
        ]);
        let result = load_sequential(&model, &batch).unwrap();
        // The association reserved the key before the person arrived; the
        // person adopts it, so the foreign key still matches the row key.
        let person_key = result.tables["ENTITY/PERSON"].rows[0][0].clone();
        let doc = &result.tables["ENTITY/DOCUMENT"];
        let author_idx = doc.columns.iter().position(|c| c == "AUTHOR").unwrap();
        assert_eq!(doc.rows[0][author_idx], person_key);
    }

    #[test]
    fn test_dangling_reference_fails_the_batch() {
        let model = model();
        let batch = batch(&[(
            "Document",
            json!([{ "title": "T", "author": { "source": [ { "sid": "X" } ] } }]),
        )]);
        let err = load_sequential(&model, &batch).unwrap_err();
        assert_eq!(
            err,
            DataError::DanglingReferences {
                sources: vec![r#"{"sid":"X"}"#.to_string()]
            }
        );
    }

    #[test]
    fn test_dangling_references_aggregate() {
        let model = model();
        let batch = batch(&[(
            "Document",
            json!([
                { "title": "A", "author": { "source": [ { "sid": "X" } ] } },
                { "title": "B", "author": { "source": [ { "sid": "Y" } ] } }
            ]),
        )]);
        let err = load_sequential(&model, &batch).unwrap_err();
        assert_eq!(
            err,
            DataError::DanglingReferences {
                sources: vec![r#"{"sid":"X"}"#.to_string(), r#"{"sid":"Y"}"#.to_string()]
            }
        );
    }

    #[test]
    fn test_reserved_key_property_is_rejected() {
        let model = model();
        let batch = batch(&[("Person", json!([{ "id": "user-supplied" }]))]);
        assert_eq!(
            load_sequential(&model, &batch).unwrap_err(),
            DataError::ReservedProperty {
                property: "id".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_entity_and_property() {
        let model = model();
        let unknown_entity = batch(&[("Nope", json!([{}]))]);
        assert_eq!(
            load_sequential(&model, &unknown_entity).unwrap_err(),
            DataError::UnknownEntity {
                entity: "Nope".to_string()
            }
        );
        let unknown_property = batch(&[("Person", json!([{ "bogus": 1 }]))]);
        assert_eq!(
            load_sequential(&model, &unknown_property).unwrap_err(),
            DataError::UnknownProperty {
                property: "bogus".to_string()
            }
        );
    }

    #[test]
    fn test_virtual_association_rejects_data() {
        let model = model();
        let batch = batch(&[(
            "Document",
            json!([{ "readers": { "id": "p-1" } }]),
        )]);
        assert_eq!(
            load_sequential(&model, &batch).unwrap_err(),
            DataError::VirtualData {
                property: "readers".to_string()
            }
        );
    }

    #[test]
    fn test_association_source_shapes() {
        let model = model();
        let cases: Vec<(Value, DataError)> = vec![
            (
                json!([{ "author": { "source": [] } }]),
                DataError::AssociationNoSource {
                    property: "author".to_string(),
                },
            ),
            (
                json!([{ "author": { "source": [ { "sid": "a" }, { "sid": "b" } ] } }]),
                DataError::AssociationConflictingSources {
                    property: "author".to_string(),
                },
            ),
            (
                json!([{ "author": { "source": "a" } }]),
                DataError::AssociationSourceNotList {
                    property: "author".to_string(),
                },
            ),
            (
                json!([{ "author": {} }]),
                DataError::AssociationMissingSource {
                    property: "author".to_string(),
                },
            ),
            (
                json!([{ "author": "a" }]),
                DataError::AssociationValue {
                    property: "author".to_string(),
                },
            ),
        ];
        for (objects, expected) in cases {
            let batch = batch(&[("Document", objects)]);
            assert_eq!(load_sequential(&model, &batch).unwrap_err(), expected);
        }
    }

    #[test]
    fn test_repeated_identical_sources_resolve() {
        let model = model();
        let batch = batch(&[(
            "Document",
            json!([{
                "title": "T",
                "author": { "source": [ { "sid": "a" }, { "sid": "a" } ] }
            }]),
        )]);
        // Two identical entries count as one distinct source; it dangles
        // because no person supplies it, which is the expected failure here.
        let err = load_sequential(&model, &batch).unwrap_err();
        assert!(matches!(err, DataError::DanglingReferences { .. }));
    }

    #[test]
    fn test_shape_mismatches() {
        let model = model();
        let array_for_scalar = batch(&[("Person", json!([{ "name": ["x"] }]))]);
        assert_eq!(
            load_sequential(&model, &array_for_scalar).unwrap_err(),
            DataError::NotAnArray {
                property: "name".to_string()
            }
        );
        let object_for_collection = batch(&[("Document", json!([{ "chapters": {} }]))]);
        assert_eq!(
            load_sequential(&model, &object_for_collection).unwrap_err(),
            DataError::ArrayExpected {
                property: "chapters".to_string()
            }
        );
        let scalar_for_nested = batch(&[("Document", json!([{ "details": 3 }]))]);
        assert_eq!(
            load_sequential(&model, &scalar_for_nested).unwrap_err(),
            DataError::ObjectExpected {
                path: "details".to_string()
            }
        );
    }

    #[test]
    fn test_source_collection_also_loads_as_rows() {
        let model = model();
        let batch = batch(&[(
            "Person",
            json!([{ "name": "M", "source": [ { "sid": "P-1" } ] }]),
        )]);
        let result = load_sequential(&model, &batch).unwrap();
        let source = &result.tables["PERSON.SOURCE"];
        assert_eq!(source.columns, vec!["_ID", "_ID1", "SID"]);
        // Child rows carry the person's key.
        let person_key = result.tables["ENTITY/PERSON"].rows[0][0].clone();
        assert_eq!(source.rows[0][0], person_key);
        assert_eq!(source.rows[0][2], json!("P-1"));
    }
}
