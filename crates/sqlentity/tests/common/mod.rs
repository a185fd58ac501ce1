//! Shared fixtures for the SQLite integration tests.

#![allow(dead_code)]

use sqlentity::{
    ClassDeclaration, Database, Orm, QueryTracker, SchemaCatalog, SchemaDeclaration,
    SqliteDatabase, Value,
};
use std::sync::Arc;

/// Teams with players and sponsors, comments on players, and a staff
/// hierarchy whose two branches both declare `Rating`. Grounds point back
/// at teams, notes hang off teams or clubs, and deals link players to
/// sponsors through an entity of their own.
pub fn catalog() -> SchemaCatalog {
    SchemaCatalog::new(
        SchemaDeclaration::new()
            .class(
                ClassDeclaration::new("Team")
                    .field("Title", "Varchar(50)")
                    .has_many("Players", "Player")
                    .many_many("Sponsors", "Sponsor")
                    .many_many_extra_field("Sponsors", "Amount", "Int")
                    .belongs_to("Ground", "Ground")
                    .has_many("Notes", "Note"),
            )
            .class(
                ClassDeclaration::new("Player")
                    .field("Name", "Varchar")
                    .field("Number", "Int")
                    .has_one("Team", "Team")
                    .has_many("Comments", "Comment")
                    .many_many_through("Sponsors", "Deal", "Player", "Sponsor"),
            )
            .class(ClassDeclaration::new("Captain").parent("Player").field("Armband", "Boolean"))
            .class(
                ClassDeclaration::new("Sponsor")
                    .field("Title", "Varchar")
                    .belongs_many_many("Teams", "Team")
                    .belongs_many_many("Players", "Player"),
            )
            .class(
                ClassDeclaration::new("Comment")
                    .field("Body", "Text")
                    .has_one("Player", "Player"),
            )
            .class(ClassDeclaration::new("Staff").field("Name", "Varchar"))
            .class(ClassDeclaration::new("Coach").parent("Staff").field("Rating", "Int"))
            .class(ClassDeclaration::new("Physio").parent("Staff").field("Rating", "Int"))
            .class(ClassDeclaration::new("Ground").field("Name", "Varchar").has_one("Team", "Team"))
            .class(
                ClassDeclaration::new("Club")
                    .field("Title", "Varchar")
                    .has_many("Notes", "Note"),
            )
            .class(
                ClassDeclaration::new("Note")
                    .field("Body", "Text")
                    .has_one_polymorphic("Parent", false),
            )
            .class(
                ClassDeclaration::new("Deal")
                    .field("Amount", "Int")
                    .has_one("Player", "Player")
                    .has_one("Sponsor", "Sponsor"),
            ),
    )
    .expect("fixture catalog")
}

pub struct Fixture {
    pub orm: Orm,
    pub db: Arc<SqliteDatabase>,
    pub tracker: Arc<QueryTracker>,
}

impl Fixture {
    /// Empty in-memory database with every table created. Statements go
    /// through a tracker so tests can count them.
    pub fn new() -> Self {
        let catalog = catalog();
        let db = Arc::new(SqliteDatabase::open_memory().expect("open sqlite memory db"));
        db.create_schema(&catalog).expect("create schema");
        let tracker = Arc::new(QueryTracker::new(db.clone()));
        let orm = Orm::new(Arc::new(catalog), tracker.clone());
        Self { orm, db, tracker }
    }

    /// Write a record of `class` across its ancestry tables; returns its id.
    pub fn insert(&self, class: &str, fields: &[(&str, Value)]) -> i64 {
        let catalog = self.orm.catalog();
        let mut id = 0;
        for table_class in catalog.ancestry(class).expect("ancestry") {
            let Some(table) = catalog.table_for(&table_class).expect("table") else {
                continue;
            };
            let mut columns = Vec::new();
            let mut values = Vec::new();
            if id == 0 {
                columns.push("\"ClassName\"".to_string());
                values.push(Value::from(class));
            } else {
                columns.push("\"ID\"".to_string());
                values.push(Value::BigInt(id));
            }
            for (field, value) in fields {
                let owner = catalog.table_for_field(&table_class, field).expect("field");
                if owner.as_deref() == Some(table) {
                    columns.push(format!("\"{}\"", field));
                    values.push(value.clone());
                }
            }
            let markers = vec!["?"; values.len()].join(", ");
            self.db
                .execute(
                    &format!("INSERT INTO \"{}\" ({}) VALUES ({})", table, columns.join(", "), markers),
                    &values,
                )
                .expect("insert");
            if id == 0 {
                id = self.db.last_insert_id(table).expect("last insert id");
            }
        }
        id
    }

    pub fn team(&self, title: &str) -> i64 {
        self.insert("Team", &[("Title", Value::from(title))])
    }

    pub fn player(&self, name: &str, number: i32, team: i64) -> i64 {
        self.insert(
            "Player",
            &[
                ("Name", Value::from(name)),
                ("Number", Value::from(number)),
                ("TeamID", Value::BigInt(team)),
            ],
        )
    }

    pub fn comment(&self, body: &str, player: i64) -> i64 {
        self.insert(
            "Comment",
            &[("Body", Value::from(body)), ("PlayerID", Value::BigInt(player))],
        )
    }

    pub fn sponsor(&self, title: &str) -> i64 {
        self.insert("Sponsor", &[("Title", Value::from(title))])
    }

    pub fn ground(&self, name: &str, team: i64) -> i64 {
        self.insert(
            "Ground",
            &[("Name", Value::from(name)), ("TeamID", Value::BigInt(team))],
        )
    }

    pub fn club(&self, title: &str) -> i64 {
        self.insert("Club", &[("Title", Value::from(title))])
    }

    /// A note on any record; `class` fills the discriminator of its parent.
    pub fn note(&self, body: &str, class: &str, parent: i64) -> i64 {
        self.insert(
            "Note",
            &[
                ("Body", Value::from(body)),
                ("ParentID", Value::BigInt(parent)),
                ("ParentClass", Value::from(class)),
            ],
        )
    }

    /// Statements run since the last reset.
    pub fn queries(&self) -> usize {
        self.tracker.query_count()
    }

    pub fn reset_queries(&self) {
        self.tracker.reset();
    }
}

/// String values of one field, in list order.
pub fn strings(records: &[sqlentity::Record], field: &str) -> Vec<String> {
    records
        .iter()
        .map(|r| r.get_as::<String>(field).expect("string field"))
        .collect()
}
