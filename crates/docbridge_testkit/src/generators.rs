//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records and predicates that respect
//! the store's identifier rules.

use docbridge_protocol::{Predicate, Record};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for generating valid record identifiers.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,32}").expect("Invalid regex")
}

/// Strategy for generating identifiers the store must reject.
pub fn invalid_id_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        prop::string::string_regex("[a-z]{0,8}[/\\\\?#][a-z]{0,8}").expect("Invalid regex"),
        Just("x".repeat(256)),
    ]
}

/// Strategy for generating file names with an `a_` or `b_` prefix.
pub fn file_name_strategy() -> impl Strategy<Value = String> {
    (prop_oneof![Just("a_"), Just("b_")], 0u32..10_000)
        .prop_map(|(prefix, n)| format!("{prefix}{n}.png"))
}

/// Strategy for generating scalar JSON values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[ -~]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::from),
    ]
}

/// Strategy for generating valid records with a file name and extra fields.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        record_id_strategy(),
        prop::string::string_regex("[a-z]_[0-9]{1,4}").expect("Invalid regex"),
        file_name_strategy(),
        prop::collection::btree_map("[a-z]{1,8}", scalar_strategy(), 0..4),
    )
        .prop_map(|(id, partition_key, file_name, extra)| {
            let mut record = Record::new(id, partition_key);
            for (name, value) in extra {
                record.payload.insert(name, value);
            }
            record.with_field("fileName", file_name)
        })
}

/// Strategy for generating batches of records with distinct identities.
pub fn record_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(record_strategy(), 0..max_len).prop_map(|records| {
        let mut seen = std::collections::HashSet::new();
        records
            .into_iter()
            .filter(|r| seen.insert((r.partition_key.clone(), r.id.clone())))
            .collect()
    })
}

/// Strategy for generating file name prefix predicates.
pub fn prefix_predicate_strategy() -> impl Strategy<Value = Predicate> {
    prop_oneof![Just("a"), Just("a_"), Just("b_"), Just("a_1"), Just("")]
        .prop_map(|prefix| Predicate::starts_with("fileName", prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_records_are_valid(record in record_strategy()) {
            prop_assert!(record.validate().is_ok());
            prop_assert!(record.text("fileName").is_some());
        }

        #[test]
        fn invalid_ids_are_rejected(id in invalid_id_strategy()) {
            prop_assert!(Record::new(id, "p").validate().is_err());
        }

        #[test]
        fn batches_have_distinct_identities(batch in record_batch_strategy(20)) {
            let identities: std::collections::HashSet<_> = batch
                .iter()
                .map(|r| (r.partition_key.clone(), r.id.clone()))
                .collect();
            prop_assert_eq!(identities.len(), batch.len());
        }
    }
}
