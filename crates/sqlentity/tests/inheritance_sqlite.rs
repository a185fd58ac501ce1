mod common;

use common::Fixture;
use sqlentity::{Dialect, QueryDescriptor, Value};

fn staff(fx: &Fixture) -> (i64, i64, i64) {
    let coach = fx.insert("Coach", &[("Name", Value::from("Ann")), ("Rating", Value::from(7))]);
    let physio = fx.insert("Physio", &[("Name", Value::from("Ben")), ("Rating", Value::from(3))]);
    let plain = fx.insert("Staff", &[("Name", Value::from("Cid"))]);
    (coach, physio, plain)
}

#[test]
fn sibling_columns_keep_their_own_values() {
    let fx = Fixture::new();
    let (coach, physio, plain) = staff(&fx);

    let list = fx
        .orm
        .list("Staff")
        .unwrap()
        .queried_columns(&["Rating"])
        .unwrap()
        .sort("Name")
        .unwrap();
    let (sql, _) = list.sql().unwrap();
    assert!(sql.contains("CASE WHEN \"Staff\".\"ClassName\" IN ('Coach')"), "{sql}");

    let records = list.to_vec().unwrap();
    let seen: Vec<(Option<i64>, String, Option<i64>)> = records
        .iter()
        .map(|r| (r.id(), r.class().to_string(), r.get("Rating").and_then(Value::as_i64)))
        .collect();
    assert_eq!(
        seen,
        vec![
            (Some(coach), "Coach".to_string(), Some(7)),
            (Some(physio), "Physio".to_string(), Some(3)),
            (Some(plain), "Staff".to_string(), None),
        ]
    );
}

#[test]
fn subclass_queries_join_only_their_ancestry() {
    let fx = Fixture::new();
    staff(&fx);

    let coaches = fx.orm.list("Coach").unwrap();
    let (sql, _) = coaches.sql().unwrap();
    assert!(sql.contains("\"Coach\""), "{sql}");
    assert!(!sql.contains("\"Physio\""), "{sql}");

    let records = coaches.to_vec().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get_as::<String>("Name").unwrap(), "Ann");
    assert_eq!(records[0].get_as::<i32>("Rating").unwrap(), 7);

    assert_eq!(fx.orm.list("Staff").unwrap().count().unwrap(), 3);
    assert_eq!(fx.orm.list("Physio").unwrap().count().unwrap(), 1);
}

#[test]
fn base_class_lookups_report_the_stored_class() {
    let fx = Fixture::new();
    let (coach, _, _) = staff(&fx);

    let record = fx.orm.get_by_id("Staff", coach).unwrap().unwrap();
    assert_eq!(record.class(), "Coach");
    assert!(fx.orm.get_by_id("Physio", coach).unwrap().is_none());
}

#[test]
fn relation_chains_join_once() {
    let fx = Fixture::new();

    let players = fx
        .orm
        .list("Player")
        .unwrap()
        .filter("Team.Title", "Reds")
        .unwrap()
        .filter("Team.Title:StartsWith", "R")
        .unwrap()
        .sort("Team.Title")
        .unwrap();
    let (sql, params) = players.sql().unwrap();
    assert_eq!(sql.matches("AS \"team_Team\"").count(), 1, "{sql}");
    assert_eq!(params.len(), 2);

    let mut once = QueryDescriptor::new(fx.orm.catalog().clone(), "Team").unwrap();
    once.apply_relation("Players.Comments", false).unwrap();
    let mut twice = once.clone();
    assert_eq!(twice.apply_relation("Players.Comments", false).unwrap(), "Comment");
    twice.apply_relation("Players", false).unwrap();
    assert_eq!(
        once.sql(Dialect::Sqlite).unwrap(),
        twice.sql(Dialect::Sqlite).unwrap()
    );
}
