//! File-backed table store.
//!
//! Each table is one file `<table>.<ext>` under the store directory, plus an
//! optional metadata companion `<table>__m.<ext>`. In-memory values are the
//! source of truth; files are rewritten through the debounced
//! [`WriteScheduler`] and always replaced atomically.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::codec::{encode_or_empty, PersistFormat};
use crate::error::{Result, StoreError};
use crate::write_scheduler::WriteScheduler;

/// Suffix distinguishing a table's metadata companion from its data.
pub const METADATA_SUFFIX: &str = "__m";
/// Default quiet period before a table write is flushed.
pub const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_millis(100);

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Largest array index a `Change::Set` may grow an array to.
const MAX_ARRAY_INDEX: usize = 1 << 20;

/// Tables loaded eagerly by [`TableStore::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Preload {
    #[default]
    None,
    /// Every table file found in the store directory.
    All,
    Tables(Vec<String>),
}

/// Construction options for one store instance.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub directory: PathBuf,
    pub format: PersistFormat,
    pub preload: Preload,
    pub save_timeout: Duration,
}

impl StoreOptions {
    pub fn new(directory: impl Into<PathBuf>, format: PersistFormat) -> Self {
        Self {
            directory: directory.into(),
            format,
            preload: Preload::None,
            save_timeout: DEFAULT_SAVE_TIMEOUT,
        }
    }

    pub fn with_preload(mut self, preload: Preload) -> Self {
        self.preload = preload;
        self
    }

    pub fn with_save_timeout(mut self, save_timeout: Duration) -> Self {
        self.save_timeout = save_timeout;
        self
    }
}

/// One step in a path into a structured value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathKey {
    Field(String),
    Index(usize),
}

impl From<&str> for PathKey {
    fn from(value: &str) -> Self {
        PathKey::Field(value.to_string())
    }
}

impl From<String> for PathKey {
    fn from(value: String) -> Self {
        PathKey::Field(value)
    }
}

impl From<usize> for PathKey {
    fn from(value: usize) -> Self {
        PathKey::Index(value)
    }
}

/// A fine-grained mutation applied by [`TableStore::set`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Set { path: Vec<PathKey>, value: Value },
    Delete { path: Vec<PathKey> },
}

impl Change {
    pub fn set<I, K>(path: I, value: Value) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<PathKey>,
    {
        Change::Set {
            path: path.into_iter().map(Into::into).collect(),
            value,
        }
    }

    pub fn delete<I, K>(path: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<PathKey>,
    {
        Change::Delete {
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Replaces the whole table value.
    pub fn replace(value: Value) -> Self {
        Change::Set {
            path: Vec::new(),
            value,
        }
    }
}

/// Sync bookkeeping persisted next to a table.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<Value>,
}

/// Store notifications. `Changed` fires after the in-memory mutation,
/// independently of when the file is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEvent {
    Changed(String),
    Saved(String),
    Deleted(String),
    WriteFailed(String),
}

/// Returns the metadata companion table name for `table`.
pub fn metadata_table_name(table: &str) -> String {
    format!("{}{}", table, METADATA_SUFFIX)
}

#[derive(Debug, Default)]
struct TableSlot {
    value: Option<Value>,
    revision: u64,
    saved_revision: u64,
    release_requested: bool,
}

impl TableSlot {
    fn loaded(value: Option<Value>) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    fn is_clean(&self) -> bool {
        self.revision == self.saved_revision
    }
}

struct StoreInner {
    options: StoreOptions,
    /// A slot exists once a table has been loaded or created in memory.
    tables: Mutex<HashMap<String, TableSlot>>,
    load_lock: tokio::sync::Mutex<()>,
    scheduler: WriteScheduler,
    events: broadcast::Sender<TableEvent>,
}

/// Handle to a directory of persisted tables. Clones share state.
#[derive(Clone)]
pub struct TableStore {
    inner: Arc<StoreInner>,
}

impl TableStore {
    pub fn new(options: StoreOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                options,
                tables: Mutex::new(HashMap::new()),
                load_lock: tokio::sync::Mutex::new(()),
                scheduler: WriteScheduler::new(),
                events,
            }),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.inner.options.directory
    }

    pub fn format(&self) -> PersistFormat {
        self.inner.options.format
    }

    pub fn save_timeout(&self) -> Duration {
        self.inner.options.save_timeout
    }

    /// Path of the file backing `table`.
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.inner.table_path(table)
    }

    /// Creates the store directory and eagerly loads the preload tables along
    /// with their metadata companions.
    pub async fn initialize(&self) {
        let directory = self.directory().to_path_buf();
        if let Err(err) = ensure_directory_exists(&directory).await {
            error!(
                "Failed to create store directory. path={} error={}",
                directory.display(),
                err
            );
            return;
        }

        let tables = match &self.inner.options.preload {
            Preload::None => Vec::new(),
            Preload::Tables(tables) => tables.clone(),
            Preload::All => self.scan_table_names().await,
        };
        for table in &tables {
            self.load_table(table).await;
        }
        info!(
            "TableStore initialized. path={} format={:?} preloaded={}",
            directory.display(),
            self.format(),
            tables.len()
        );
    }

    async fn scan_table_names(&self) -> Vec<String> {
        let extension_suffix = format!(".{}", self.format().extension());
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.directory()).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "Failed to scan store directory. path={} error={}",
                    self.directory().display(),
                    err
                );
                return names;
            }
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let file_name = entry.file_name();
                    let Some(file_name) = file_name.to_str() else {
                        continue;
                    };
                    let Some(table) = file_name.strip_suffix(&extension_suffix) else {
                        continue;
                    };
                    if !table.is_empty() && !table.ends_with(METADATA_SUFFIX) {
                        names.push(table.to_string());
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("Failed to read store directory entry. error={}", err);
                    break;
                }
            }
        }
        names.sort();
        names
    }

    /// Loads `table` and its metadata companion from disk if not yet in
    /// memory. Corrupt or unreadable files are logged and treated as absent.
    pub async fn load_table(&self, table: &str) {
        self.ensure_loaded(table).await;
        if !table.ends_with(METADATA_SUFFIX) {
            self.ensure_loaded(&metadata_table_name(table)).await;
        }
    }

    async fn ensure_loaded(&self, table: &str) {
        if self.inner.is_loaded(table) {
            return;
        }
        let _load_guard = self.inner.load_lock.lock().await;
        if self.inner.is_loaded(table) {
            return;
        }

        let value = self.inner.read_table_file(table).await;
        let mut tables = self.inner.lock_tables();
        tables
            .entry(table.to_string())
            .or_insert_with(|| TableSlot::loaded(value));
    }

    /// Returns the in-memory value of `table`, loading it on first access,
    /// or `default` when the table has no value.
    pub async fn get_table(&self, table: &str, default: Value) -> Value {
        self.ensure_loaded(table).await;
        let mut tables = self.inner.lock_tables();
        match tables.get_mut(table) {
            Some(slot) => {
                slot.release_requested = false;
                slot.value.clone().unwrap_or(default)
            }
            None => default,
        }
    }

    /// Returns `true` if `table` currently holds a value.
    pub async fn contains_table(&self, table: &str) -> bool {
        self.ensure_loaded(table).await;
        self.inner
            .lock_tables()
            .get(table)
            .is_some_and(|slot| slot.value.is_some())
    }

    pub async fn get_metadata(&self, table: &str) -> TableMetadata {
        let metadata_table = metadata_table_name(table);
        let value = self.get_table(&metadata_table, Value::Null).await;
        if value.is_null() {
            return TableMetadata::default();
        }
        match serde_json::from_value(value) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(
                    "Ignoring malformed table metadata. table={} error={}",
                    table, err
                );
                TableMetadata::default()
            }
        }
    }

    pub async fn set_metadata(&self, table: &str, metadata: &TableMetadata) -> Result<()> {
        let value = serde_json::to_value(metadata)?;
        self.set_value(&metadata_table_name(table), value).await;
        Ok(())
    }

    /// Applies `changes` in order to the in-memory value, then schedules a
    /// debounced write. The mutation is visible to readers on return.
    pub async fn set(&self, table: &str, changes: &[Change]) {
        self.ensure_loaded(table).await;
        {
            let mut tables = self.inner.lock_tables();
            let slot = tables.entry(table.to_string()).or_default();
            for change in changes {
                apply_change(&mut slot.value, change);
            }
            slot.revision += 1;
            slot.release_requested = false;
        }
        let _ = self.inner.events.send(TableEvent::Changed(table.to_string()));
        self.schedule_write(table);
    }

    /// Replaces the whole value of `table`.
    pub async fn set_value(&self, table: &str, value: Value) {
        self.set(table, &[Change::replace(value)]).await;
    }

    fn schedule_write(&self, table: &str) {
        let inner = Arc::clone(&self.inner);
        let name = table.to_string();
        let delay = self.inner.options.save_timeout;
        debug!(
            "TableStore: scheduling write. table={} delay_ms={}",
            table,
            delay.as_millis()
        );
        self.inner
            .scheduler
            .schedule(table, delay, move || async move {
                inner.write_table(&name).await;
            });
    }

    /// Removes `table` from memory and deletes its file immediately. Any
    /// pending write for it is cancelled.
    pub async fn delete_table(&self, table: &str) {
        // Held until the file is gone so a running write cannot recreate it.
        let _guard = self.inner.scheduler.cancel_and_wait(table).await;
        {
            let mut tables = self.inner.lock_tables();
            let slot = tables.entry(table.to_string()).or_default();
            slot.value = None;
            slot.revision += 1;
            slot.saved_revision = slot.revision;
            slot.release_requested = false;
        }
        self.inner.remove_table_file(table).await;
        let _ = self.inner.events.send(TableEvent::Deleted(table.to_string()));
    }

    pub async fn delete_metadata(&self, table: &str) {
        self.delete_table(&metadata_table_name(table)).await;
    }

    /// Renames `from` (and its metadata companion) to `to`, rewriting the
    /// files immediately.
    pub async fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        self.load_table(from).await;
        self.load_table(to).await;
        let from_metadata = metadata_table_name(from);
        let to_metadata = metadata_table_name(to);
        {
            let tables = self.inner.lock_tables();
            let from_exists = tables.get(from).is_some_and(|slot| slot.value.is_some());
            if !from_exists {
                return Err(StoreError::TableNotFound(from.to_string()));
            }
            if tables.get(to).is_some_and(|slot| slot.value.is_some()) {
                return Err(StoreError::TableExists(to.to_string()));
            }
        }

        let _from_guard = self.inner.scheduler.cancel_and_wait(from).await;
        let _from_metadata_guard = self.inner.scheduler.cancel_and_wait(&from_metadata).await;
        let (value, metadata) = {
            let mut tables = self.inner.lock_tables();
            let value = tables.remove(from).and_then(|slot| slot.value);
            let metadata = tables.remove(&from_metadata).and_then(|slot| slot.value);
            (value, metadata)
        };

        self.set_value(to, value.unwrap_or(Value::Null)).await;
        if let Some(metadata) = metadata {
            self.set_value(&to_metadata, metadata).await;
        }
        self.flush(to).await;
        self.flush(&to_metadata).await;

        self.inner.remove_table_file(from).await;
        self.inner.remove_table_file(&from_metadata).await;
        let _ = self.inner.events.send(TableEvent::Deleted(from.to_string()));
        info!("TableStore: renamed table. from={} to={}", from, to);
        Ok(())
    }

    /// Drops the in-memory value of `table` and its metadata so the next
    /// access reloads from disk. Tables with unsaved changes are released
    /// after their pending write lands.
    pub fn release_table(&self, table: &str) {
        let metadata_table = metadata_table_name(table);
        let mut tables = self.inner.lock_tables();
        for name in [table, metadata_table.as_str()] {
            let clean = match tables.get_mut(name) {
                Some(slot) if slot.is_clean() => true,
                Some(slot) => {
                    slot.release_requested = true;
                    false
                }
                None => false,
            };
            if clean {
                tables.remove(name);
            }
        }
    }

    /// Writes `table` now if a write is pending, and waits for any write
    /// already in progress.
    pub async fn flush(&self, table: &str) {
        let inner = Arc::clone(&self.inner);
        let name = table.to_string();
        self.inner
            .scheduler
            .flush(table, || async move { inner.write_table(&name).await })
            .await;
    }

    pub async fn flush_all(&self) {
        for table in self.inner.scheduler.tracked_keys() {
            self.flush(&table).await;
        }
    }

    pub fn has_pending_write(&self, table: &str) -> bool {
        self.inner.scheduler.has_pending(table)
    }

    /// Names of tables currently holding a value in memory.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock_tables()
            .iter()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableEvent> {
        self.inner.events.subscribe()
    }
}

impl StoreInner {
    fn lock_tables(&self) -> std::sync::MutexGuard<'_, HashMap<String, TableSlot>> {
        self.tables.lock().expect("table store lock poisoned")
    }

    fn is_loaded(&self, table: &str) -> bool {
        self.lock_tables().contains_key(table)
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.options
            .directory
            .join(format!("{}.{}", table, self.options.format.extension()))
    }

    async fn read_table_file(&self, table: &str) -> Option<Value> {
        let path = self.table_path(table);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(
                    "Failed to read table. table={} path={} error={}",
                    table,
                    path.display(),
                    err
                );
                return None;
            }
        };
        match self.options.format.codec().decode(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    "Failed to load table; treating as absent. table={} path={} error={}",
                    table,
                    path.display(),
                    err
                );
                None
            }
        }
    }

    async fn write_table(&self, table: &str) {
        let (value, revision) = {
            let tables = self.lock_tables();
            let Some(slot) = tables.get(table) else {
                return;
            };
            (slot.value.clone(), slot.revision)
        };

        let path = self.table_path(table);
        let outcome = match &value {
            Some(value) => {
                let bytes = encode_or_empty(self.options.format, table, value);
                write_file_atomically(&path, &bytes).await
            }
            None => remove_file_if_exists(&path).await,
        };

        match outcome {
            Ok(()) => {
                debug!("TableStore: wrote table. table={} path={}", table, path.display());
                let mut tables = self.lock_tables();
                let release = match tables.get_mut(table) {
                    Some(slot) => {
                        slot.saved_revision = slot.saved_revision.max(revision);
                        slot.release_requested && slot.is_clean()
                    }
                    None => false,
                };
                if release {
                    tables.remove(table);
                }
                drop(tables);
                let _ = self.events.send(TableEvent::Saved(table.to_string()));
            }
            Err(err) => {
                error!("Failed to persist table. table={} error={}", table, err);
                let _ = self.events.send(TableEvent::WriteFailed(table.to_string()));
            }
        }
    }

    async fn remove_table_file(&self, table: &str) {
        let path = self.table_path(table);
        if let Err(err) = remove_file_if_exists(&path).await {
            error!("Failed to delete table file. table={} error={}", table, err);
        }
    }
}

/// Creates `directory` and any missing ancestors, walking up to the first
/// existing ancestor and then creating each level from the root down.
pub async fn ensure_directory_exists(directory: &Path) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(directory);
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() {
            break;
        }
        let exists = tokio::fs::try_exists(dir)
            .await
            .map_err(|err| StoreError::io(dir, err))?;
        if exists {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }

    for dir in missing.iter().rev() {
        match tokio::fs::create_dir(dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(StoreError::io(dir, err)),
        }
    }
    Ok(())
}

async fn write_file_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent).await?;
    }
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    if let Err(err) = tokio::fs::write(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StoreError::io(&temp_path, err));
    }
    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StoreError::io(path, err));
    }
    Ok(())
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

fn container_for(key: &PathKey) -> Value {
    match key {
        PathKey::Field(_) => Value::Object(Map::new()),
        PathKey::Index(_) => Value::Array(Vec::new()),
    }
}

/// Returns the child slot for `key`, converting `node` into the matching
/// container kind and growing arrays as needed.
fn child_mut<'a>(node: &'a mut Value, key: &PathKey) -> &'a mut Value {
    let matches_kind = matches!(
        (&*node, key),
        (Value::Object(_), PathKey::Field(_)) | (Value::Array(_), PathKey::Index(_))
    );
    if !matches_kind {
        *node = container_for(key);
    }
    match (node, key) {
        (Value::Object(map), PathKey::Field(field)) => {
            map.entry(field.clone()).or_insert(Value::Null)
        }
        (Value::Array(items), PathKey::Index(index)) => {
            if items.len() <= *index {
                items.resize(index.saturating_add(1), Value::Null);
            }
            &mut items[*index]
        }
        _ => unreachable!("container kind matched above"),
    }
}

fn existing_child_mut<'a>(node: &'a mut Value, key: &PathKey) -> Option<&'a mut Value> {
    match (node, key) {
        (Value::Object(map), PathKey::Field(field)) => map.get_mut(field),
        (Value::Array(items), PathKey::Index(index)) => items.get_mut(*index),
        _ => None,
    }
}

/// Applies one change to a table value. Setting below a missing or scalar
/// node replaces it with a container; deleting a missing path is a no-op.
pub(crate) fn apply_change(root: &mut Option<Value>, change: &Change) {
    match change {
        Change::Set { path, value } => {
            if let Some(index) = path.iter().find_map(|key| match key {
                PathKey::Index(index) if *index > MAX_ARRAY_INDEX => Some(*index),
                _ => None,
            }) {
                warn!("Ignoring change with out-of-range array index. index={}", index);
                return;
            }
            let Some((last, parents)) = path.split_last() else {
                *root = Some(value.clone());
                return;
            };
            let mut node = root.get_or_insert_with(|| container_for(&path[0]));
            for key in parents {
                node = child_mut(node, key);
            }
            *child_mut(node, last) = value.clone();
        }
        Change::Delete { path } => {
            let Some((last, parents)) = path.split_last() else {
                *root = None;
                return;
            };
            let Some(mut node) = root.as_mut() else {
                return;
            };
            for key in parents {
                match existing_child_mut(node, key) {
                    Some(child) => node = child,
                    None => return,
                }
            }
            match (node, last) {
                (Value::Object(map), PathKey::Field(field)) => {
                    map.remove(field);
                }
                (Value::Array(items), PathKey::Index(index)) if *index < items.len() => {
                    items.remove(*index);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        apply_change, ensure_directory_exists, metadata_table_name, Change, PathKey, Preload,
        StoreOptions, TableEvent, TableMetadata, TableStore,
    };
    use crate::codec::PersistFormat;
    use crate::error::StoreError;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn json_store(dir: &std::path::Path, save_timeout_ms: u64) -> TableStore {
        TableStore::new(
            StoreOptions::new(dir.join("roqtune"), PersistFormat::Json)
                .with_save_timeout(Duration::from_millis(save_timeout_ms)),
        )
    }

    fn drain_saved(receiver: &mut tokio::sync::broadcast::Receiver<TableEvent>, table: &str) -> usize {
        let mut saved = 0;
        while let Ok(event) = receiver.try_recv() {
            if event == TableEvent::Saved(table.to_string()) {
                saved += 1;
            }
        }
        saved
    }

    #[test]
    fn test_apply_change_builds_nested_paths() {
        let mut root = None;
        apply_change(&mut root, &Change::set(["state", "sidebarWidth"], json!(200)));
        apply_change(
            &mut root,
            &Change::set(
                [PathKey::from("panels"), PathKey::Index(2)],
                json!("library"),
            ),
        );
        assert_eq!(
            root,
            Some(json!({
                "state": {"sidebarWidth": 200},
                "panels": [null, null, "library"],
            }))
        );

        apply_change(&mut root, &Change::delete(["state", "sidebarWidth"]));
        apply_change(&mut root, &Change::delete([PathKey::from("panels"), PathKey::Index(0)]));
        apply_change(&mut root, &Change::delete(["missing", "deeper"]));
        assert_eq!(
            root,
            Some(json!({"state": {}, "panels": [null, "library"]}))
        );

        apply_change(&mut root, &Change::delete(Vec::<PathKey>::new()));
        assert_eq!(root, None);
    }

    #[test]
    fn test_apply_change_replaces_scalar_parent() {
        let mut root = Some(json!({"general": 5}));
        apply_change(&mut root, &Change::set(["general", "playlistStyle"], json!("compact")));
        assert_eq!(root, Some(json!({"general": {"playlistStyle": "compact"}})));
    }

    #[test]
    fn test_apply_change_ignores_out_of_range_index() {
        let mut root = Some(json!({"panels": ["library"]}));
        apply_change(
            &mut root,
            &Change::set([PathKey::Index(usize::MAX)], json!("x")),
        );
        apply_change(
            &mut root,
            &Change::set(
                [PathKey::from("panels"), PathKey::Index(usize::MAX), PathKey::from("a")],
                json!(1),
            ),
        );
        assert_eq!(root, Some(json!({"panels": ["library"]})));

        let mut empty = None;
        apply_change(&mut empty, &Change::set([PathKey::Index(1 << 40)], json!(true)));
        assert_eq!(empty, None);
    }

    #[tokio::test]
    async fn test_ensure_directory_exists_creates_missing_chain() {
        let temp = tempfile::tempdir().expect("tempdir");
        let nested = temp.path().join("a").join("b").join("c");
        ensure_directory_exists(&nested).await.expect("create chain");
        assert!(nested.is_dir());
        ensure_directory_exists(&nested).await.expect("idempotent");
    }

    #[tokio::test]
    async fn test_missing_table_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = json_store(temp.path(), 10);
        store.initialize().await;
        let value = store.get_table("settings", json!({"isAuthed": false})).await;
        assert_eq!(value, json!({"isAuthed": false}));
        assert!(!store.contains_table("settings").await);
    }

    #[tokio::test]
    async fn test_set_is_visible_before_flush() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = json_store(temp.path(), 10_000);
        store.initialize().await;

        store
            .set("settings", &[Change::set(["general", "playlistStyle"], json!("compact"))])
            .await;
        assert_eq!(
            store.get_table("settings", Value::Null).await,
            json!({"general": {"playlistStyle": "compact"}})
        );
        assert!(store.has_pending_write("settings"));
        assert!(!store.table_path("settings").exists());

        store.flush("settings").await;
        assert!(!store.has_pending_write("settings"));
        let written = std::fs::read_to_string(store.table_path("settings")).expect("file");
        assert_eq!(
            serde_json::from_str::<Value>(&written).expect("json"),
            json!({"general": {"playlistStyle": "compact"}})
        );
    }

    #[tokio::test]
    async fn test_burst_of_sets_produces_single_write_with_latest_value() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = json_store(temp.path(), 150);
        store.initialize().await;
        let mut events = store.subscribe();

        store.set_value("stateSaved", json!({"playbackIndex": 1})).await;
        store.set_value("stateSaved", json!({"playbackIndex": 2})).await;
        store.set_value("stateSaved", json!({"playbackIndex": 3})).await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(drain_saved(&mut events, "stateSaved"), 1);
        let written = std::fs::read_to_string(store.table_path("stateSaved")).expect("file");
        assert_eq!(
            serde_json::from_str::<Value>(&written).expect("json"),
            json!({"playbackIndex": 3})
        );
    }

    #[tokio::test]
    async fn test_corrupt_table_does_not_block_other_preloads() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("roqtune");
        std::fs::create_dir_all(&dir).expect("dir");
        std::fs::write(dir.join("broken.json"), "{not json").expect("write");
        std::fs::write(dir.join("settings.json"), r#"{"isAuthed":true}"#).expect("write");

        let store = TableStore::new(
            StoreOptions::new(&dir, PersistFormat::Json).with_preload(Preload::Tables(vec![
                "broken".to_string(),
                "settings".to_string(),
            ])),
        );
        store.initialize().await;

        assert_eq!(store.table_names(), vec!["settings".to_string()]);
        assert_eq!(
            store.get_table("broken", json!("fallback")).await,
            json!("fallback")
        );
        assert_eq!(
            store.get_table("settings", Value::Null).await,
            json!({"isAuthed": true})
        );
    }

    #[tokio::test]
    async fn test_preload_all_scans_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("roqtune");
        std::fs::create_dir_all(&dir).expect("dir");
        std::fs::write(dir.join("hotkeys.json"), r#"{"Search":"J"}"#).expect("write");
        std::fs::write(dir.join("hotkeys__m.json"), r#"{"lastSync":5}"#).expect("write");
        std::fs::write(dir.join("notes.txt"), "ignored").expect("write");

        let store =
            TableStore::new(StoreOptions::new(&dir, PersistFormat::Json).with_preload(Preload::All));
        store.initialize().await;
        assert_eq!(
            store.table_names(),
            vec!["hotkeys".to_string(), "hotkeys__m".to_string()]
        );
        assert_eq!(store.get_metadata("hotkeys").await.last_sync, Some(5));
    }

    #[tokio::test]
    async fn test_metadata_is_persisted_in_companion_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = json_store(temp.path(), 10);
        store.initialize().await;

        let metadata = TableMetadata {
            last_sync: Some(1_700_000_000_000),
            pending: None,
        };
        store
            .set_metadata("playlists", &metadata)
            .await
            .expect("metadata");
        store.flush(&metadata_table_name("playlists")).await;

        assert!(store.table_path("playlists__m").exists());
        assert!(!store.table_path("playlists").exists());

        let reopened = json_store(temp.path(), 10);
        assert_eq!(reopened.get_metadata("playlists").await, metadata);
    }

    #[tokio::test]
    async fn test_delete_table_removes_file_and_memory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = json_store(temp.path(), 10);
        store.initialize().await;
        store.set_value("theme", json!({"mode": "dark"})).await;
        store.flush("theme").await;
        assert!(store.table_path("theme").exists());

        store.set_value("theme", json!({"mode": "light"})).await;
        store.delete_table("theme").await;
        assert!(!store.table_path("theme").exists());
        assert!(!store.has_pending_write("theme"));
        assert_eq!(store.get_table("theme", json!({})).await, json!({}));
    }

    #[tokio::test]
    async fn test_delete_during_running_write_leaves_no_file() {
        let large = "x".repeat(500 * 1024);
        for yields in 0..40 {
            let temp = tempfile::tempdir().expect("tempdir");
            let store = json_store(temp.path(), 0);
            store.initialize().await;

            store.set_value("t", json!({ "blob": large })).await;
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            store.delete_table("t").await;
            tokio::time::sleep(Duration::from_millis(50)).await;

            assert!(!store.table_path("t").exists(), "file came back after {yields} yields");
            assert_eq!(store.get_table("t", json!({})).await, json!({}));
        }
    }

    #[tokio::test]
    async fn test_rename_during_running_write_leaves_no_source_file() {
        let large = "x".repeat(500 * 1024);
        for yields in 0..40 {
            let temp = tempfile::tempdir().expect("tempdir");
            let store = json_store(temp.path(), 0);
            store.initialize().await;

            store.set_value("old", json!({ "blob": large })).await;
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            store.rename_table("old", "new").await.expect("rename");
            tokio::time::sleep(Duration::from_millis(50)).await;

            assert!(!store.table_path("old").exists(), "source came back after {yields} yields");
            assert!(store.table_path("new").exists());
            assert!(!store.contains_table("old").await);
        }
    }

    #[tokio::test]
    async fn test_rename_table_moves_data_and_rejects_bad_targets() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = json_store(temp.path(), 10);
        store.initialize().await;

        let missing = store.rename_table("nope", "other").await;
        assert!(matches!(missing, Err(StoreError::TableNotFound(name)) if name == "nope"));

        store.set_value("old", json!([1, 2])).await;
        store.set_value("taken", json!(true)).await;
        let taken = store.rename_table("old", "taken").await;
        assert!(matches!(taken, Err(StoreError::TableExists(name)) if name == "taken"));

        store.flush("old").await;
        store.rename_table("old", "new").await.expect("rename");
        assert!(!store.table_path("old").exists());
        assert!(store.table_path("new").exists());
        assert_eq!(store.get_table("new", Value::Null).await, json!([1, 2]));
        assert!(!store.contains_table("old").await);
    }

    #[tokio::test]
    async fn test_release_waits_for_pending_write() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = json_store(temp.path(), 10_000);
        store.initialize().await;

        store.set_value("playlist_a", json!("pending")).await;
        store.release_table("playlist_a");
        assert_eq!(store.table_names(), vec!["playlist_a".to_string()]);

        store.flush("playlist_a").await;
        assert!(store.table_names().is_empty());
        assert_eq!(
            store.get_table("playlist_a", Value::Null).await,
            json!("pending")
        );
    }

    #[tokio::test]
    async fn test_msgpack_store_round_trips_through_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let options = StoreOptions::new(temp.path().join("roqtune"), PersistFormat::MsgPack)
            .with_save_timeout(Duration::ZERO);
        let store = TableStore::new(options.clone());
        store.initialize().await;
        store
            .set_value("playlistCache", json!({"queue": [], "currentIndex": -1}))
            .await;
        store.flush_all().await;
        assert!(store.table_path("playlistCache").ends_with("playlistCache.msgpack"));

        let reopened = TableStore::new(options);
        assert_eq!(
            reopened.get_table("playlistCache", Value::Null).await,
            json!({"queue": [], "currentIndex": -1})
        );
    }
}
