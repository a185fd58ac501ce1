//! Fixtures shared by the unit tests of this crate.

use sqlentity_core::{
    ClassDeclaration, Database, Dialect, Result, Row, SchemaCatalog, SchemaDeclaration, Value,
};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Teams, players and what hangs off them.
pub(crate) fn catalog() -> SchemaCatalog {
    SchemaCatalog::new(
        SchemaDeclaration::new()
            .class(
                ClassDeclaration::new("Team")
                    .field("Title", "Varchar")
                    .has_many("Players", "Player")
                    .many_many("Sponsors", "Sponsor")
                    .many_many_extra_field("Sponsors", "Amount", "Int")
                    .belongs_to("Ground", "Ground"),
            )
            .class(
                ClassDeclaration::new("Player")
                    .field("Name", "Varchar")
                    .field("Number", "Int")
                    .has_one("Team", "Team")
                    .has_many("Comments", "Comment"),
            )
            .class(ClassDeclaration::new("Captain").parent("Player").field("Armband", "Boolean"))
            .class(ClassDeclaration::new("Sponsor").field("Title", "Varchar"))
            .class(ClassDeclaration::new("Ground").field("Name", "Varchar").has_one("Team", "Team"))
            .class(
                ClassDeclaration::new("Comment")
                    .field("Body", "Text")
                    .has_one("Player", "Player"),
            ),
    )
    .expect("fixture catalog")
}

/// Records every statement and answers queries from a queue of canned
/// results; an empty queue answers with no rows.
#[derive(Debug, Default)]
pub(crate) struct RecordingDb {
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    results: Mutex<VecDeque<Vec<Row>>>,
}

impl RecordingDb {
    pub(crate) fn push_rows(&self, rows: Vec<Row>) {
        self.results.lock().unwrap().push_back(rows);
    }

    pub(crate) fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.lock().unwrap().clone()
    }

    pub(crate) fn last_sql(&self) -> String {
        self.statements
            .lock()
            .unwrap()
            .last()
            .map(|(sql, _)| sql.clone())
            .unwrap_or_default()
    }
}

impl Database for RecordingDb {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    fn last_insert_id(&self, _table: &str) -> Result<i64> {
        Ok(0)
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}
