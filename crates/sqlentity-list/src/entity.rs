//! Typed access to records.

use crate::record::Record;
use sqlentity_core::Result;

/// A Rust type that can be built from records of one entity class.
///
/// ```ignore
/// struct Player {
///     id: i64,
///     name: String,
/// }
///
/// impl Entity for Player {
///     const CLASS: &'static str = "Player";
///
///     fn from_record(record: &Record) -> Result<Self> {
///         Ok(Self {
///             id: record.get_as("ID")?,
///             name: record.get_as("Name")?,
///         })
///     }
/// }
///
/// let players: Vec<Player> = orm.entities::<Player>()?.to_entities()?;
/// ```
pub trait Entity: Sized {
    /// Entity class the type maps to.
    const CLASS: &'static str;

    fn from_record(record: &Record) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlentity_core::Error;

    #[derive(Debug, PartialEq)]
    struct Player {
        id: i64,
        name: String,
        number: Option<i64>,
    }

    impl Entity for Player {
        const CLASS: &'static str = "Player";

        fn from_record(record: &Record) -> Result<Self> {
            Ok(Self {
                id: record.get_as("ID")?,
                name: record.get_as("Name")?,
                number: record.get_as("Number")?,
            })
        }
    }

    #[test]
    fn builds_from_a_record() {
        let mut record = Record::new(Player::CLASS);
        record.set("ID", 3).set("Name", "Ann");
        assert_eq!(
            Player::from_record(&record).unwrap(),
            Player {
                id: 3,
                name: "Ann".into(),
                number: None
            }
        );
    }

    #[test]
    fn conversion_errors_propagate() {
        let mut record = Record::new(Player::CLASS);
        record.set("ID", "three").set("Name", "Ann");
        assert!(matches!(Player::from_record(&record), Err(Error::Type(_))));
    }
}
