//! Query filter predicates.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A filter evaluated by the store against each record.
///
/// Field names address payload fields; the name `id` addresses the record
/// identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches every record.
    All,
    /// Field equals the given value.
    Eq {
        /// Field name.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// String field starts with the given prefix.
    StartsWith {
        /// Field name.
        field: String,
        /// Required prefix.
        prefix: String,
    },
    /// All inner predicates match.
    And(Vec<Predicate>),
    /// At least one inner predicate matches.
    Or(Vec<Predicate>),
    /// The inner predicate does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Creates an equality predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a prefix predicate.
    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Predicate::StartsWith {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    /// Combines two predicates with a logical and.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut inner) => {
                inner.push(other);
                Predicate::And(inner)
            }
            Predicate::All => other,
            this => Predicate::And(vec![this, other]),
        }
    }

    /// Negates this predicate.
    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluates the predicate against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq { field, value } => record.field(field).as_ref() == Some(value),
            Predicate::StartsWith { field, prefix } => record
                .text(field)
                .is_some_and(|text| text.starts_with(prefix.as_str())),
            Predicate::And(inner) => inner.iter().all(|p| p.matches(record)),
            Predicate::Or(inner) => inner.iter().any(|p| p.matches(record)),
            Predicate::Not(inner) => !inner.matches(record),
        }
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::All
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: u32, prefix: &str) -> Record {
        Record::new(id.to_string(), format!("a_{id}"))
            .with_field("fileName", format!("{prefix}{id}.png"))
            .with_field("size", id)
    }

    #[test]
    fn prefix_match() {
        let predicate = Predicate::starts_with("fileName", "a_");
        assert!(predicate.matches(&asset(2, "a_")));
        assert!(!predicate.matches(&asset(3, "b_")));
    }

    #[test]
    fn prefix_on_non_string_field_never_matches() {
        let predicate = Predicate::starts_with("size", "1");
        assert!(!predicate.matches(&asset(1, "a_")));
    }

    #[test]
    fn equality_on_identifier() {
        let predicate = Predicate::eq("id", "7");
        assert!(predicate.matches(&asset(7, "a_")));
        assert!(!predicate.matches(&asset(8, "a_")));
    }

    #[test]
    fn combinators() {
        let predicate = Predicate::starts_with("fileName", "a_").and(Predicate::eq("size", 4));
        assert!(predicate.matches(&asset(4, "a_")));
        assert!(!predicate.matches(&asset(6, "a_")));

        let either = Predicate::Or(vec![Predicate::eq("size", 1), Predicate::eq("size", 2)]);
        assert!(either.matches(&asset(2, "b_")));
        assert!(!either.clone().negate().matches(&asset(2, "b_")));
    }

    #[test]
    fn all_is_identity_for_and() {
        let predicate = Predicate::All.and(Predicate::eq("size", 3));
        assert_eq!(predicate, Predicate::eq("size", 3));
    }

    proptest::proptest! {
        #[test]
        fn prefix_agrees_with_str_starts_with(name in "[a-c_]{0,8}", prefix in "[a-c_]{0,3}") {
            let record = Record::new("1", "p").with_field("fileName", name.clone());
            let predicate = Predicate::starts_with("fileName", prefix.clone());
            proptest::prop_assert_eq!(predicate.matches(&record), name.starts_with(&prefix));
            proptest::prop_assert_eq!(
                predicate.clone().negate().matches(&record),
                !name.starts_with(&prefix)
            );
        }
    }
}
