//! DDL rendering.
//!
//! Turns the compiled table model into deployable SQL: one `create table`
//! statement per table plus full-text index statements for every column
//! annotated `@search.isText`. Virtual properties carry no stored column
//! and are skipped throughout.

use serde_json::Value;

use crate::entity_catalog::schema_config::TEXT_ANNOTATION;
use crate::entity_catalog::table_model::{CompiledModel, TableNode};

/// `create table` statements for every table, in compilation order.
pub fn create_table_statements(model: &CompiledModel, schema_name: &str) -> Vec<String> {
    model
        .tables
        .values()
        .map(|table| {
            format!(
                "create table \"{}\".\"{}\" ( {} )",
                schema_name,
                table.table_name,
                column_definitions(table).join(", ")
            )
        })
        .collect()
}

/// Full-text index statements for text-annotated columns. The index name
/// carries the column's position so repeated annotations on one table stay
/// distinct.
pub fn fulltext_index_statements(model: &CompiledModel, schema_name: &str) -> Vec<String> {
    let mut statements = Vec::new();
    for table in model.tables.values() {
        for (position, (column, property)) in table.properties.iter().enumerate() {
            if property.annotations.get(TEXT_ANNOTATION) == Some(&Value::Bool(true)) {
                statements.push(format!(
                    "create fulltext index \"{}_{}\" on \"{}\".\"{}\" (\"{}\") \
                     fast preprocess on fuzzy search index on search only off async",
                    table.table_name, position, schema_name, table.table_name, column
                ));
            }
        }
    }
    statements
}

/// Tables first, then indices: the order the statements must run in.
pub fn deployment_statements(model: &CompiledModel, schema_name: &str) -> Vec<String> {
    let mut statements = create_table_statements(model, schema_name);
    statements.extend(fulltext_index_statements(model, schema_name));
    statements
}

fn column_definitions(table: &TableNode) -> Vec<String> {
    table
        .properties
        .iter()
        .filter_map(|(name, property)| {
            if property.is_virtual {
                return None;
            }
            let column_type = property.column_type.as_ref()?;
            let suffix = if *name == table.pk { " PRIMARY KEY" } else { "" };
            Some(format!("\"{}\" {}{}", name, column_type.sql(), suffix))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_catalog::compiler::compile;
    use crate::entity_catalog::schema_config::SchemaDocument;

    fn model() -> CompiledModel {
        let doc = SchemaDocument::from_yaml_str(
            r#"
definitions:
  Document:
    kind: entity
    elements:
      id: { key: true, type: core.UUID }
      title: { type: core.String, length: 200, "@search.isText": true }
      rating: { type: core.Decimal, precision: 3, scale: 1 }
      keywords:
        items: { type: core.String }
"#,
        )
        .unwrap();
        compile(&doc).unwrap()
    }

    #[test]
    fn test_create_table_statements() {
        let statements = create_table_statements(&model(), "SEARCH");
        assert_eq!(
            statements,
            vec![
                "create table \"SEARCH\".\"ENTITY/DOCUMENT\" ( \
                 \"ID\" NVARCHAR(36) PRIMARY KEY, \"TITLE\" NVARCHAR(200), \
                 \"RATING\" DECIMAL(3,1) )",
                "create table \"SEARCH\".\"DOCUMENT.KEYWORDS\" ( \
                 \"_ID\" NVARCHAR(36), \"_ID1\" NVARCHAR(36) PRIMARY KEY, \
                 \"_VALUE\" NVARCHAR(5000) )",
            ]
        );
    }

    #[test]
    fn test_fulltext_index_statements() {
        let statements = fulltext_index_statements(&model(), "SEARCH");
        assert_eq!(
            statements,
            vec![
                "create fulltext index \"ENTITY/DOCUMENT_1\" on \"SEARCH\".\"ENTITY/DOCUMENT\" \
                 (\"TITLE\") fast preprocess on fuzzy search index on search only off async",
            ]
        );
    }

    #[test]
    fn test_deployment_statement_order() {
        let statements = deployment_statements(&model(), "S");
        assert!(statements[0].starts_with("create table"));
        assert!(statements.last().unwrap().starts_with("create fulltext index"));
    }
}
