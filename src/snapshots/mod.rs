//! Versioned whole-value snapshots (library index, play queue).
//!
//! Snapshots are read and written only through [`SnapshotCache`], which
//! re-sanitizes every value crossing the store boundary. Whatever shape is
//! found on disk, callers always see a well-formed value of the current
//! schema version.

mod library;
mod queue;

pub use library::{LibrarySnapshot, LibraryTrack, LIBRARY_SNAPSHOT_VERSION};
pub use queue::{QueueSnapshot, QueuedTrack, QUEUE_SNAPSHOT_VERSION};

use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use log::error;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::table_store::TableStore;

/// A versioned record persisted as one table.
pub trait Snapshot: Sized + Clone + Serialize {
    /// Table the snapshot is stored under.
    const TABLE: &'static str;
    const VERSION: u32;

    /// Normalizes arbitrary input into a well-formed snapshot of
    /// [`Self::VERSION`]. Idempotent.
    fn sanitize(raw: &Value) -> Self;

    fn default_snapshot(updated_at: i64) -> Self;

    /// Number of domain items (tracks, queue entries).
    fn item_count(&self) -> usize;
}

/// Typed entry points for one snapshot table.
pub struct SnapshotCache<S> {
    store: TableStore,
    _snapshot: PhantomData<fn() -> S>,
}

impl<S: Snapshot> SnapshotCache<S> {
    pub fn new(store: TableStore) -> Self {
        Self {
            store,
            _snapshot: PhantomData,
        }
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    /// Loads the persisted snapshot and sanitizes it. Missing tables yield
    /// the default snapshot.
    pub async fn get_snapshot(&self) -> S {
        let raw = self.store.get_table(S::TABLE, Value::Null).await;
        if raw.is_null() {
            return S::default_snapshot(0);
        }
        S::sanitize(&raw)
    }

    /// Merges `partial` over the default snapshot, stamps `updatedAt` with
    /// the current time, sanitizes and persists the result.
    pub async fn persist_snapshot(&self, partial: Value) -> S {
        let now = now_millis();
        let mut merged = match serde_json::to_value(S::default_snapshot(now)) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        };
        if let Value::Object(fields) = partial {
            merged.extend(fields);
        }
        merged.insert("updatedAt".to_string(), Value::from(now));

        let snapshot = S::sanitize(&Value::Object(merged));
        self.persist(&snapshot).await;
        snapshot
    }

    /// Persists an already-typed snapshot, replacing the whole table.
    pub async fn persist(&self, snapshot: &S) {
        match serde_json::to_value(snapshot) {
            Ok(value) => self.store.set_value(S::TABLE, value).await,
            Err(err) => error!(
                "Failed to serialize snapshot. table={} error={}",
                S::TABLE,
                err
            ),
        }
    }

    /// Resets the table to the versioned defaults with a fresh timestamp.
    pub async fn clear_cache(&self) -> S {
        let snapshot = S::default_snapshot(now_millis());
        self.persist(&snapshot).await;
        snapshot
    }

    pub async fn has_cached_data(&self) -> bool {
        self.get_snapshot().await.item_count() > 0
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Loose boolean coercion matching how legacy files encoded flags
/// (`0`, `""` and `null` are false; any object or array is true).
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub(crate) fn non_empty_string(record: &Value, key: &str) -> Option<String> {
    match record.get(key) {
        Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

pub(crate) fn number_as_i64(value: Option<&Value>) -> Option<i64> {
    let number = value?.as_number()?;
    number
        .as_i64()
        .or_else(|| number.as_f64().filter(|n| n.is_finite()).map(|n| n as i64))
}

/// Final path segment after the last `/`.
pub(crate) fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
