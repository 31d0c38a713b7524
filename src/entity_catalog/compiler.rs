//! Schema compiler.
//!
//! Walks each entity definition depth-first and produces the compiled table
//! model: one table per nesting level, parent/child key chains, and the
//! per-entity external↔internal tree the data loader consumes.
//!
//! The in-progress model is held as an arena of [`TableNode`] values keyed
//! by table name; the recursion passes the "current table" around as a name
//! handle rather than a reference, so structural (non-collection) nesting
//! can fold elements into an ancestor table without aliasing trouble.
//!
//! Compilation runs in four passes:
//!
//! 1. key validation - every entity must declare exactly one key element
//! 2. per-entity descent - tables, properties, trees
//! 3. virtual back-reference validation - needs all entities compiled,
//!    since a virtual association may point at an entity defined later
//! 4. SQL template rendering - needs the full parent chains

use indexmap::IndexMap;
use log::debug;
use std::collections::HashMap;

use super::errors::ModelError;
use super::identifiers::{IdentifierAllocator, ENTITY_PREFIX};
use super::schema_config::{ElementShape, SchemaDocument, TypeDef, VIRTUAL_ANNOTATION};
use super::table_model::{
    key_column_type, level_key_columns, AssociationDef, CompiledModel, EntityTree, ItemShape,
    KeySpec, PropertyDef, RelKind, Relationship, SqlTemplates, TableNode, TreeNode,
    KEY_COLUMN_BASE, VALUE_COLUMN,
};
use super::type_resolver::{self, ResolvedType};

/// Compile a schema document into the relational table model.
///
/// All compiler state is private to this call; compiling the same document
/// twice yields identical names, column orders and SQL templates.
pub fn compile(doc: &SchemaDocument) -> Result<CompiledModel, ModelError> {
    SchemaCompiler::new(doc).run()
}

/// A virtual association recorded during descent, validated once every
/// entity has a table.
struct PendingVirtual {
    path: String,
    source_table: String,
    target_entity: String,
    target_table: String,
}

struct SchemaCompiler<'a> {
    doc: &'a SchemaDocument,
    /// Entity name to its declared key element.
    entity_keys: IndexMap<String, String>,
    /// Table namespace of this compilation.
    table_names: IdentifierAllocator,
    /// One column namespace per table.
    column_names: HashMap<String, IdentifierAllocator>,
    tables: IndexMap<String, TableNode>,
    pending_virtual: Vec<PendingVirtual>,
}

impl<'a> SchemaCompiler<'a> {
    fn new(doc: &'a SchemaDocument) -> Self {
        SchemaCompiler {
            doc,
            entity_keys: IndexMap::new(),
            table_names: IdentifierAllocator::new(),
            column_names: HashMap::new(),
            tables: IndexMap::new(),
            pending_virtual: Vec::new(),
        }
    }

    fn run(mut self) -> Result<CompiledModel, ModelError> {
        let doc = self.doc;
        self.validate_entity_keys()?;
        let mut entities = IndexMap::new();
        for (name, def) in &doc.definitions {
            if def.is_entity() {
                let tree = self.compile_entity(name, def)?;
                entities.insert(name.clone(), tree);
            }
        }
        self.validate_virtual_associations()?;
        self.render_sql_templates();
        debug!(
            "compiled {} tables for {} entities",
            self.tables.len(),
            entities.len()
        );
        Ok(CompiledModel {
            tables: self.tables,
            entities,
        })
    }

    fn validate_entity_keys(&mut self) -> Result<(), ModelError> {
        let doc = self.doc;
        for (name, def) in &doc.definitions {
            if !def.is_entity() {
                continue;
            }
            let mut keys = def
                .elements
                .iter()
                .flat_map(|els| els.iter())
                .filter(|(_, e)| e.key)
                .map(|(n, _)| n.clone());
            match (keys.next(), keys.next()) {
                (Some(key), None) => {
                    self.entity_keys.insert(name.clone(), key);
                }
                _ => return Err(ModelError::EntityKey {
                    entity: name.clone(),
                }),
            }
        }
        Ok(())
    }

    fn compile_entity(&mut self, entity_name: &str, def: &TypeDef) -> Result<EntityTree, ModelError> {
        let key_element = self
            .entity_keys
            .get(entity_name)
            .cloned()
            .expect("entity keys validated before descent");
        let external_path = vec![entity_name.to_string()];
        let table_name = self.table_names.register(&external_path, ENTITY_PREFIX);
        debug!("compiling entity `{entity_name}` into table `{table_name}`");

        // The key column claims the first slot of the table's column
        // namespace; walking the key element re-registers the same path and
        // gets the same name back.
        let mut columns = IdentifierAllocator::new();
        let pk_column = columns.register(&[key_element.clone()], "");
        self.column_names.insert(table_name.clone(), columns);

        let annotations = def.annotations();
        self.tables.insert(
            table_name.clone(),
            TableNode {
                table_name: table_name.clone(),
                external_path: external_path.clone(),
                level: 0,
                pk: pk_column.clone(),
                pk_parent: None,
                parent: None,
                properties: IndexMap::new(),
                contains: Vec::new(),
                annotations: annotations.clone(),
                sql: SqlTemplates::default(),
            },
        );

        let mut tree_elements = IndexMap::new();
        if let Some(elements) = &def.elements {
            self.walk_elements(&table_name, 0, &external_path, &[], elements, &mut tree_elements)?;
        }
        Ok(EntityTree {
            table_name,
            key: KeySpec {
                element: key_element,
                column: pk_column,
            },
            elements: tree_elements,
            annotations,
        })
    }

    /// Descend one `elements` block against the table named by `table`.
    /// `table_path` is the external path of that table, `col_prefix` the
    /// element path accumulated by structural folding within it.
    fn walk_elements(
        &mut self,
        table: &str,
        level: usize,
        table_path: &[String],
        col_prefix: &[String],
        elements: &IndexMap<String, TypeDef>,
        tree: &mut IndexMap<String, TreeNode>,
    ) -> Result<(), ModelError> {
        let doc = self.doc;
        for (name, element) in elements {
            let mut full_path = table_path.to_vec();
            full_path.extend(col_prefix.iter().cloned());
            full_path.push(name.clone());
            let is_virtual = element.annotation_is_true(VIRTUAL_ANNOTATION);

            match element.shape() {
                Some(ElementShape::Collection(items)) => {
                    if is_virtual {
                        return Err(ModelError::VirtualNotAssociation {
                            path: full_path.join("."),
                        });
                    }
                    self.compile_collection(
                        table, level, &full_path, col_prefix, name, element, items, tree,
                    )?;
                }
                Some(ElementShape::Typed(type_name)) => {
                    match type_resolver::structural_elements(doc, type_name) {
                        Some(inner) => {
                            if is_virtual {
                                return Err(ModelError::VirtualNotAssociation {
                                    path: full_path.join("."),
                                });
                            }
                            self.fold_structure(
                                table, level, table_path, col_prefix, name, inner, tree,
                            )?;
                        }
                        None => {
                            self.compile_typed(
                                table, level, &full_path, col_prefix, name, element, is_virtual,
                                tree,
                            )?;
                        }
                    }
                }
                Some(ElementShape::Inline(inner)) => {
                    if is_virtual {
                        return Err(ModelError::VirtualNotAssociation {
                            path: full_path.join("."),
                        });
                    }
                    self.fold_structure(table, level, table_path, col_prefix, name, inner, tree)?;
                }
                None => {
                    return Err(ModelError::MalformedElement {
                        path: full_path.join("."),
                    })
                }
            }
        }
        Ok(())
    }

    /// Nested structure that is not repeated: flatten into the same table,
    /// prefixing the element name onto every descendant's column path. The
    /// tree keeps the hierarchy so external callers still see it.
    fn fold_structure(
        &mut self,
        table: &str,
        level: usize,
        table_path: &[String],
        col_prefix: &[String],
        name: &str,
        inner: &IndexMap<String, TypeDef>,
        tree: &mut IndexMap<String, TreeNode>,
    ) -> Result<(), ModelError> {
        let mut prefix = col_prefix.to_vec();
        prefix.push(name.to_string());
        let mut nested = IndexMap::new();
        self.walk_elements(table, level, table_path, &prefix, inner, &mut nested)?;
        tree.insert(name.to_string(), TreeNode::Object { elements: nested });
        Ok(())
    }

    /// Repeated collection: a new table one level down, owned by the
    /// current table through the surrogate key chain.
    #[allow(clippy::too_many_arguments)]
    fn compile_collection(
        &mut self,
        parent_table: &str,
        level: usize,
        full_path: &[String],
        col_prefix: &[String],
        name: &str,
        element: &TypeDef,
        items: &TypeDef,
        tree: &mut IndexMap<String, TreeNode>,
    ) -> Result<(), ModelError> {
        let doc = self.doc;
        let child_level = level + 1;
        let child_table = self.table_names.register(full_path, "");
        let (pk, pk_parent) = level_key_columns(child_level);

        let mut columns = IdentifierAllocator::new();
        columns.register(&[pk_parent.clone()], "");
        columns.register(&[pk.clone()], "");
        self.column_names.insert(child_table.clone(), columns);

        let mut properties = IndexMap::new();
        properties.insert(
            pk_parent.clone(),
            PropertyDef::column(key_column_type(), Vec::new()),
        );
        properties.insert(pk.clone(), PropertyDef::column(key_column_type(), Vec::new()));

        self.tables.insert(
            child_table.clone(),
            TableNode {
                table_name: child_table.clone(),
                external_path: full_path.to_vec(),
                level: child_level,
                pk,
                pk_parent: Some(pk_parent),
                parent: Some(parent_table.to_string()),
                properties,
                contains: Vec::new(),
                annotations: IndexMap::new(),
                sql: SqlTemplates::default(),
            },
        );

        let parent_column = self.register_column(parent_table, col_prefix, name);
        let mut external_path = col_prefix.to_vec();
        external_path.push(name.to_string());
        let containment = PropertyDef {
            column_type: None,
            rel: Some(Relationship {
                table_name: child_table.clone(),
                kind: RelKind::Containment,
                cardinality: None,
            }),
            annotations: element.annotations(),
            external_path,
            is_virtual: true,
        };
        let parent_node = self.table_mut(parent_table);
        parent_node.properties.insert(parent_column, containment);
        parent_node.contains.push(child_table.clone());

        // Structured items become one child row each; scalar items store
        // into the fixed value column.
        let item_elements = if let Some(inline) = &items.elements {
            Some(inline)
        } else if let Some(type_name) = items.type_name.as_deref() {
            type_resolver::structural_elements(doc, type_name)
        } else {
            None
        };

        match item_elements {
            Some(item_elements) => {
                let mut nested = IndexMap::new();
                self.walk_elements(
                    &child_table,
                    child_level,
                    full_path,
                    &[],
                    item_elements,
                    &mut nested,
                )?;
                tree.insert(
                    name.to_string(),
                    TreeNode::Collection {
                        table_name: child_table,
                        items: ItemShape::Objects { elements: nested },
                    },
                );
            }
            None => {
                let column_type = match type_resolver::resolve(doc, items, full_path)? {
                    ResolvedType::Column(ct) => ct,
                    ResolvedType::Association { .. } => {
                        return Err(ModelError::MalformedElement {
                            path: full_path.join("."),
                        })
                    }
                };
                self.column_names
                    .get_mut(&child_table)
                    .expect("child column namespace created with table")
                    .register(&[VALUE_COLUMN.to_string()], "");
                self.table_mut(&child_table).properties.insert(
                    VALUE_COLUMN.to_string(),
                    PropertyDef::column(column_type, Vec::new()),
                );
                tree.insert(
                    name.to_string(),
                    TreeNode::Collection {
                        table_name: child_table,
                        items: ItemShape::Values {
                            column_name: VALUE_COLUMN.to_string(),
                        },
                    },
                );
            }
        }
        Ok(())
    }

    /// Scalar, alias chain, or association.
    #[allow(clippy::too_many_arguments)]
    fn compile_typed(
        &mut self,
        table: &str,
        level: usize,
        full_path: &[String],
        col_prefix: &[String],
        name: &str,
        element: &TypeDef,
        is_virtual: bool,
        tree: &mut IndexMap<String, TreeNode>,
    ) -> Result<(), ModelError> {
        let doc = self.doc;
        let mut external_path = col_prefix.to_vec();
        external_path.push(name.to_string());

        match type_resolver::resolve(doc, element, full_path)? {
            ResolvedType::Column(column_type) => {
                if is_virtual {
                    return Err(ModelError::VirtualNotAssociation {
                        path: full_path.join("."),
                    });
                }
                let column = self.register_column(table, col_prefix, name);
                let prop = PropertyDef {
                    column_type: Some(column_type),
                    rel: None,
                    annotations: element.annotations(),
                    external_path,
                    is_virtual: false,
                };
                self.table_mut(table).properties.insert(column.clone(), prop);
                tree.insert(
                    name.to_string(),
                    TreeNode::Column {
                        column_name: column,
                    },
                );
            }
            ResolvedType::Association { target } => {
                if is_virtual && level != 0 {
                    return Err(ModelError::VirtualNotRoot {
                        path: full_path.join("."),
                    });
                }
                let target_key_element = self
                    .entity_keys
                    .get(&target)
                    .cloned()
                    .ok_or_else(|| ModelError::UnknownTarget {
                        path: full_path.join("."),
                        target: target.clone(),
                    })?;
                let target_def = doc
                    .definitions
                    .get(&target)
                    .expect("entity key implies a definition");
                let target_key_def = target_def
                    .elements
                    .as_ref()
                    .and_then(|els| els.get(&target_key_element))
                    .expect("validated entity carries its key element");
                // Associations store the target's key, so the column takes
                // the target key's storage type.
                let column_type = match type_resolver::resolve(doc, target_key_def, full_path)? {
                    ResolvedType::Column(ct) => ct,
                    ResolvedType::Association { .. } => {
                        return Err(ModelError::MalformedElement {
                            path: full_path.join("."),
                        })
                    }
                };
                // Idempotent registration keeps forward references stable:
                // the target entity gets the same table name when it
                // compiles later.
                let target_table = self.table_names.register(&[target.clone()], ENTITY_PREFIX);
                let column = self.register_column(table, col_prefix, name);
                let cardinality = element.cardinality.clone();
                let prop = PropertyDef {
                    column_type: Some(column_type),
                    rel: Some(Relationship {
                        table_name: target_table.clone(),
                        kind: RelKind::Association,
                        cardinality: cardinality.clone(),
                    }),
                    annotations: element.annotations(),
                    external_path,
                    is_virtual,
                };
                self.table_mut(table).properties.insert(column.clone(), prop);
                tree.insert(
                    name.to_string(),
                    TreeNode::Association(AssociationDef {
                        column_name: column,
                        target_table: target_table.clone(),
                        target_key_field: target_key_element,
                        cardinality,
                        is_virtual,
                    }),
                );
                if is_virtual {
                    self.pending_virtual.push(PendingVirtual {
                        path: full_path.join("."),
                        source_table: table.to_string(),
                        target_entity: target,
                        target_table,
                    });
                }
            }
        }
        Ok(())
    }

    fn register_column(&mut self, table: &str, col_prefix: &[String], name: &str) -> String {
        let mut path = col_prefix.to_vec();
        path.push(name.to_string());
        self.column_names
            .get_mut(table)
            .expect("column namespace created with table")
            .register(&path, "")
    }

    fn table_mut(&mut self, name: &str) -> &mut TableNode {
        self.tables
            .get_mut(name)
            .expect("table registered before use")
    }

    /// A virtual association is only valid when the referred entity points
    /// back with exactly one association.
    fn validate_virtual_associations(&self) -> Result<(), ModelError> {
        for pending in &self.pending_virtual {
            let target = self
                .tables
                .get(&pending.target_table)
                .expect("target entity compiled before validation");
            let found = target
                .properties
                .values()
                .filter(|p| {
                    matches!(&p.rel, Some(rel)
                        if rel.kind == RelKind::Association
                            && rel.table_name == pending.source_table)
                })
                .count();
            if found != 1 {
                return Err(ModelError::VirtualBackwardAssociation {
                    path: pending.path.clone(),
                    target: pending.target_entity.clone(),
                    found,
                });
            }
        }
        Ok(())
    }

    fn render_sql_templates(&mut self) {
        let rendered: Vec<(String, SqlTemplates)> = self
            .tables
            .values()
            .map(|node| (node.table_name.clone(), self.render_table_sql(node)))
            .collect();
        for (name, sql) in rendered {
            self.table_mut(&name).sql = sql;
        }
    }

    /// Ancestor tables from level 1 up to `node.level - 1`, root side first.
    fn ancestor_chain(&self, node: &TableNode) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = node;
        while let Some(parent_name) = &current.parent {
            let parent = self
                .tables
                .get(parent_name)
                .expect("parent table registered");
            if parent.level == 0 {
                break;
            }
            chain.push(parent.table_name.clone());
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Select and delete templates per table. Levels 0 and 1 filter a single
    /// table directly; deeper levels join the ancestor chain down to level 1
    /// so the id list always holds root entity keys. The delete form goes
    /// through a membership sub-select instead of a join so it stays valid
    /// as a standalone delete target.
    fn render_table_sql(&self, node: &TableNode) -> SqlTemplates {
        if node.level <= 1 {
            let key_column = if node.level == 0 {
                node.pk.clone()
            } else {
                node.pk_parent.clone().expect("nested table has a parent key")
            };
            let columns: Vec<String> = node
                .projected_columns()
                .map(|c| format!("\"{c}\""))
                .collect();
            let select = format!(
                "SELECT {} from \"{}\" where \"{}\" in ({{id_list}})",
                columns.join(", "),
                node.table_name,
                key_column
            );
            let delete = format!(
                "DELETE from \"{}\" where \"{}\" in ({{id_list}})",
                node.table_name, key_column
            );
            return SqlTemplates { select, delete };
        }

        let n = node.level;
        let chain = self.ancestor_chain(node);
        let columns: Vec<String> = node
            .projected_columns()
            .map(|c| format!("L{n}.\"{c}\""))
            .collect();
        let mut joins = Vec::with_capacity(chain.len());
        let mut delete_chain = Vec::with_capacity(chain.len() + 1);
        for (i, parent) in chain.iter().enumerate() {
            let l = i + 1;
            let join = format!(
                "inner join \"{parent}\" L{l} on L{}.{KEY_COLUMN_BASE}{l} = L{l}.{KEY_COLUMN_BASE}{l}",
                l + 1
            );
            if i == chain.len() - 1 {
                delete_chain.push(format!(
                    "select {KEY_COLUMN_BASE}{l} from \"{parent}\" L{l}"
                ));
            } else {
                delete_chain.push(join.clone());
            }
            joins.push(join);
        }
        joins.reverse();
        delete_chain.reverse();
        delete_chain.push(format!("where L1.\"{KEY_COLUMN_BASE}\" in ({{id_list}})"));

        let select = format!(
            "SELECT {} from \"{}\" L{n} {} where L1.\"{KEY_COLUMN_BASE}\" in ({{id_list}})",
            columns.join(", "),
            node.table_name,
            joins.join(" ")
        );
        let pk_parent = node
            .pk_parent
            .as_deref()
            .expect("nested table has a parent key");
        let delete = format!(
            "DELETE from \"{}\" where {pk_parent} in ({})",
            node.table_name,
            delete_chain.join(" ")
        );
        SqlTemplates { select, delete }
    }
}
