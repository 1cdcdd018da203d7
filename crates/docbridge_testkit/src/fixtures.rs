//! Asset fixtures.
//!
//! Assets are numbered from 1. Asset `i` has identifier `i`, partition key
//! and asset id `a_i`, and a file name starting with `a_` when `i` is even
//! and `b_` when it is odd, so any `n` assets split evenly by prefix.

use docbridge_protocol::{Predicate, Record};
use serde::{Deserialize, Serialize};

/// Database used by the asset scenario.
pub const ASSETS_DATABASE: &str = "Assets";

/// Container used by the asset scenario.
pub const ASSETS_CONTAINER: &str = "assets";

/// Typed view of an asset record's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Asset identifier, also the partition key.
    pub asset_id: String,
    /// File name of the asset.
    pub file_name: String,
}

impl Asset {
    /// Asset number `i`.
    pub fn numbered(i: u32) -> Self {
        let prefix = if i % 2 == 0 { "a_" } else { "b_" };
        Self {
            asset_id: format!("a_{i}"),
            file_name: format!("{prefix}{i}.png"),
        }
    }
}

/// Record for asset number `i`.
pub fn asset_record(i: u32) -> Record {
    let asset = Asset::numbered(i);
    Record::new(i.to_string(), asset.asset_id.clone())
        .with_field("assetId", asset.asset_id)
        .with_field("fileName", asset.file_name)
}

/// Records for assets `1..=n`.
pub fn asset_records(n: u32) -> Vec<Record> {
    (1..=n).map(asset_record).collect()
}

/// Predicate selecting assets whose file name starts with `prefix`.
pub fn file_name_prefix(prefix: &str) -> Predicate {
    Predicate::starts_with("fileName", prefix)
}

/// Number of assets among `1..=n` whose file name starts with `prefix`.
pub fn expected_matches(n: u32, prefix: &str) -> usize {
    (1..=n)
        .filter(|i| Asset::numbered(*i).file_name.starts_with(prefix))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_assets_split_evenly() {
        let records = asset_records(10);
        assert_eq!(records.len(), 10);
        let predicate = file_name_prefix("a");
        assert_eq!(records.iter().filter(|r| predicate.matches(r)).count(), 5);
        assert_eq!(expected_matches(10, "a"), 5);
        assert_eq!(expected_matches(10, "b_"), 5);
    }

    #[test]
    fn asset_record_shape() {
        let record = asset_record(3);
        assert_eq!(record.id, "3");
        assert_eq!(record.partition_key, "a_3");
        assert_eq!(record.text("fileName"), Some("b_3.png"));
        assert_eq!(record.to_document::<Asset>().unwrap(), Asset::numbered(3));
        assert!(record.validate().is_ok());
    }
}
