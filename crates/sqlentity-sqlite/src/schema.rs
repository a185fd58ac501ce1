//! CREATE TABLE statements for a catalog.
//!
//! One table per class that owns columns, plus one per implicit
//! many-to-many join table. Subclass tables share the base table's `ID`.

use sqlentity_core::{FieldType, Result, SchemaCatalog};
use sqlentity_query::quote_identifier;

/// Builder for the statements creating every table of a catalog.
#[derive(Debug)]
pub struct SchemaBuilder<'a> {
    catalog: &'a SchemaCatalog,
    if_not_exists: bool,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(catalog: &'a SchemaCatalog) -> Self {
        Self {
            catalog,
            if_not_exists: false,
        }
    }

    /// Add IF NOT EXISTS clause.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    fn create(&self, table: &str, columns: Vec<String>) -> String {
        format!(
            "CREATE TABLE {}{} (\n  {}\n)",
            if self.if_not_exists { "IF NOT EXISTS " } else { "" },
            quote_identifier(table),
            columns.join(",\n  ")
        )
    }

    /// Build all statements, class tables first.
    pub fn build(&self) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        for class in self.catalog.classes() {
            let Some(table) = self.catalog.table_for(class)? else {
                continue;
            };
            let is_base = self.catalog.base_class(class)? == class;
            let columns = self
                .catalog
                .database_fields(class)?
                .iter()
                .map(|(name, field_type)| column_definition(name, field_type, is_base))
                .collect();
            statements.push(self.create(table, columns));
        }
        for component in self.catalog.many_many_join_tables()? {
            let mut columns = vec![
                "\"ID\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
                format!("{} INTEGER NOT NULL DEFAULT 0", quote_identifier(&component.parent_field)),
                format!("{} INTEGER NOT NULL DEFAULT 0", quote_identifier(&component.child_field)),
            ];
            for (name, field_type) in component.extra_fields.iter() {
                columns.push(column_definition(name, field_type, false));
            }
            statements.push(self.create(&component.join_table, columns));
        }
        Ok(statements)
    }
}

fn column_definition(name: &str, field_type: &FieldType, is_base: bool) -> String {
    let column = quote_identifier(name);
    match field_type {
        FieldType::PrimaryKey if is_base => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column),
        FieldType::PrimaryKey => format!("{} INTEGER PRIMARY KEY", column),
        FieldType::ForeignKey => format!("{} INTEGER NOT NULL DEFAULT 0", column),
        other => format!("{} {}", column, other.sql_type()),
    }
}
