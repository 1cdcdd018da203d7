//! Partitioned document storage.
//!
//! The store keeps:
//! - Databases, each holding named containers
//! - Per container, records ordered by `(partition, sequence)`
//! - An identity index from `(partition_key, id)` to that position
//!
//! Query pages walk the ordered map, so a continuation is just the
//! position of the last record returned.

use crate::error::{EmulatorError, EmulatorResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use docbridge_protocol::{ContinuationToken, ItemResult, ItemStatus, Predicate, Record};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::ops::Bound;
use std::path::Path;
use tracing::debug;

/// Position of a record inside a container.
type Position = (u32, u64);

#[derive(Default)]
struct Container {
    next_sequence: u64,
    records: BTreeMap<Position, Record>,
    index: HashMap<(String, String), Position>,
}

impl Container {
    fn put(&mut self, partition: u32, record: Record) {
        let identity = (record.partition_key.clone(), record.id.clone());
        if let Some(position) = self.index.get(&identity) {
            self.records.insert(*position, record);
            return;
        }
        let position = (partition, self.next_sequence);
        self.next_sequence += 1;
        self.index.insert(identity, position);
        self.records.insert(position, record);
    }
}

#[derive(Default)]
struct Database {
    containers: BTreeMap<String, Container>,
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    /// Matching records in store order.
    pub records: Vec<Record>,
    /// Position after the last record, `None` when no match remains.
    pub continuation: Option<ContinuationToken>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    partition_count: u32,
    databases: BTreeMap<String, BTreeMap<String, Vec<Record>>>,
}

/// In-memory document store.
pub struct DocumentStore {
    partition_count: u32,
    databases: RwLock<BTreeMap<String, Database>>,
}

impl DocumentStore {
    /// Creates an empty store. A partition count of zero is treated as one.
    pub fn new(partition_count: u32) -> Self {
        Self {
            partition_count: partition_count.max(1),
            databases: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the partition count.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Partition a key hashes to.
    pub fn partition_of(&self, partition_key: &str) -> u32 {
        let digest = Sha256::digest(partition_key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % u64::from(self.partition_count)) as u32
    }

    /// Names of existing databases.
    pub fn databases(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    /// Creates the database and container if needed.
    ///
    /// Returns true if the container was created by this call.
    pub fn ensure_container(&self, database: &str, container: &str) -> bool {
        let mut databases = self.databases.write();
        let db = databases.entry(database.to_string()).or_default();
        if db.containers.contains_key(container) {
            return false;
        }
        db.containers
            .insert(container.to_string(), Container::default());
        debug!(database, container, "container created");
        true
    }

    /// Deletes a database. Returns true if it existed.
    pub fn delete_database(&self, database: &str) -> bool {
        self.databases.write().remove(database).is_some()
    }

    /// Number of records in a container.
    pub fn len(&self, database: &str, container: &str) -> EmulatorResult<usize> {
        let databases = self.databases.read();
        Ok(lookup(&databases, database, container)?.records.len())
    }

    /// Inserts or replaces records, reporting a status per record in order.
    ///
    /// A record whose identity already appeared earlier in the same batch
    /// is reported as a conflict and not written.
    pub fn upsert(
        &self,
        database: &str,
        container: &str,
        records: Vec<Record>,
    ) -> EmulatorResult<Vec<ItemResult>> {
        let mut databases = self.databases.write();
        let target = lookup_mut(&mut databases, database, container)?;

        let mut seen = HashSet::with_capacity(records.len());
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let status = match record.validate() {
                Err(reason) => ItemStatus::Invalid(reason),
                Ok(()) if !seen.insert((record.partition_key.clone(), record.id.clone())) => {
                    ItemStatus::Conflict(format!(
                        "record {} appears more than once in the batch",
                        record.id
                    ))
                }
                Ok(()) => ItemStatus::Committed,
            };
            items.push(ItemResult {
                id: record.id.clone(),
                partition_key: record.partition_key.clone(),
                status: status.clone(),
            });
            if status.is_committed() {
                let partition = self.partition_of(&record.partition_key);
                target.put(partition, record);
            }
        }
        Ok(items)
    }

    /// Point read by identity.
    pub fn read(
        &self,
        database: &str,
        container: &str,
        id: &str,
        partition_key: &str,
    ) -> EmulatorResult<Option<Record>> {
        let databases = self.databases.read();
        let target = lookup(&databases, database, container)?;
        Ok(target
            .index
            .get(&(partition_key.to_string(), id.to_string()))
            .and_then(|position| target.records.get(position))
            .cloned())
    }

    /// Returns up to `max_items` matches after the continuation position.
    pub fn query(
        &self,
        database: &str,
        container: &str,
        predicate: &Predicate,
        continuation: Option<&ContinuationToken>,
        max_items: usize,
    ) -> EmulatorResult<QueryPage> {
        let start = match continuation {
            Some(token) => Bound::Excluded(decode_position(token)?),
            None => Bound::Unbounded,
        };
        let databases = self.databases.read();
        let target = lookup(&databases, database, container)?;

        let mut matches = target
            .records
            .range((start, Bound::Unbounded))
            .filter(|(_, record)| predicate.matches(record));
        let mut records = Vec::new();
        let mut last = None;
        for (position, record) in matches.by_ref().take(max_items) {
            records.push(record.clone());
            last = Some(*position);
        }
        let continuation = match (last, matches.next()) {
            (Some(position), Some(_)) => Some(encode_position(position)),
            _ => None,
        };
        Ok(QueryPage {
            records,
            continuation,
        })
    }

    /// Serializes the whole store as JSON.
    pub fn snapshot(&self) -> EmulatorResult<Vec<u8>> {
        let databases = self.databases.read();
        let snapshot = Snapshot {
            partition_count: self.partition_count,
            databases: databases
                .iter()
                .map(|(name, db)| {
                    let containers = db
                        .containers
                        .iter()
                        .map(|(name, c)| (name.clone(), c.records.values().cloned().collect()))
                        .collect();
                    (name.clone(), containers)
                })
                .collect(),
        };
        serde_json::to_vec_pretty(&snapshot).map_err(|e| EmulatorError::Persistence(e.to_string()))
    }

    /// Replaces the store contents with a snapshot.
    ///
    /// Records are re-partitioned with this store's partition count and keep
    /// their relative order.
    pub fn restore(&self, bytes: &[u8]) -> EmulatorResult<()> {
        let snapshot: Snapshot =
            serde_json::from_slice(bytes).map_err(|e| EmulatorError::Persistence(e.to_string()))?;
        if snapshot.partition_count != self.partition_count {
            debug!(
                from = snapshot.partition_count,
                to = self.partition_count,
                "re-partitioning snapshot"
            );
        }

        let mut restored = BTreeMap::new();
        for (db_name, containers) in snapshot.databases {
            let mut db = Database::default();
            for (container_name, records) in containers {
                let mut container = Container::default();
                for record in records {
                    let partition = self.partition_of(&record.partition_key);
                    container.put(partition, record);
                }
                db.containers.insert(container_name, container);
            }
            restored.insert(db_name, db);
        }
        *self.databases.write() = restored;
        Ok(())
    }

    /// Writes a snapshot to `path`, replacing it atomically.
    pub fn save_to(&self, path: &Path) -> EmulatorResult<()> {
        let bytes = self.snapshot()?;
        let staging = path.with_extension("tmp");
        fs::write(&staging, bytes)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    /// Loads a snapshot from `path`. Returns false if there is none.
    pub fn load_from(&self, path: &Path) -> EmulatorResult<bool> {
        match fs::read(path) {
            Ok(bytes) => {
                self.restore(&bytes)?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn lookup<'a>(
    databases: &'a BTreeMap<String, Database>,
    database: &str,
    container: &str,
) -> EmulatorResult<&'a Container> {
    databases
        .get(database)
        .ok_or_else(|| EmulatorError::NotFound(format!("database {database}")))?
        .containers
        .get(container)
        .ok_or_else(|| EmulatorError::NotFound(format!("container {database}/{container}")))
}

fn lookup_mut<'a>(
    databases: &'a mut BTreeMap<String, Database>,
    database: &str,
    container: &str,
) -> EmulatorResult<&'a mut Container> {
    databases
        .get_mut(database)
        .ok_or_else(|| EmulatorError::NotFound(format!("database {database}")))?
        .containers
        .get_mut(container)
        .ok_or_else(|| EmulatorError::NotFound(format!("container {database}/{container}")))
}

fn encode_position((partition, sequence): Position) -> ContinuationToken {
    ContinuationToken::new(URL_SAFE_NO_PAD.encode(format!("{partition}:{sequence}")))
}

fn decode_position(token: &ContinuationToken) -> EmulatorResult<Position> {
    let invalid = || EmulatorError::InvalidRequest(format!("invalid continuation {}", token.as_str()));
    let raw = URL_SAFE_NO_PAD.decode(token.as_str()).map_err(|_| invalid())?;
    let text = String::from_utf8(raw).map_err(|_| invalid())?;
    let (partition, sequence) = text.split_once(':').ok_or_else(invalid)?;
    Ok((
        partition.parse().map_err(|_| invalid())?,
        sequence.parse().map_err(|_| invalid())?,
    ))
}
