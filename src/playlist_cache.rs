//! Bounded cache of live playlist documents.
//!
//! Each playlist path maps to one [`PlaylistDocument`] persisted as M3U text
//! in its own table. Repeated lookups return the same document until it is
//! evicted; evicted documents release their table so memory stays bounded,
//! while any debounced write already scheduled for them still lands.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde_json::Value;

use crate::m3u::{is_valid_m3u, parse_m3u, write_m3u, M3uPlaylist};
use crate::synced::{PersistTransform, SyncedValue};
use crate::table_store::TableStore;

pub const DEFAULT_PLAYLIST_CACHE_CAPACITY: usize = 8;

pub type PlaylistDocument = SyncedValue<M3uPlaylist>;

/// Persists playlists as M3U text. Blank or unrecognisable text loads as an
/// empty playlist.
#[derive(Debug, Default, Clone, Copy)]
pub struct M3uTransform;

impl PersistTransform for M3uTransform {
    type Value = M3uPlaylist;

    fn load(&self, raw: Value) -> M3uPlaylist {
        let Value::String(text) = raw else {
            return M3uPlaylist::default();
        };
        if text.trim().is_empty() {
            return M3uPlaylist::default();
        }
        if !is_valid_m3u(&text) {
            warn!("Ignoring unparsable playlist content. bytes={}", text.len());
            return M3uPlaylist::default();
        }
        parse_m3u(&text)
    }

    fn save(&self, value: &M3uPlaylist) -> Value {
        Value::String(write_m3u(value))
    }
}

/// Derives the table key for a playlist path: non-alphanumeric characters
/// become `_`, surrounding underscores are trimmed and the result lowercased.
pub fn playlist_cache_key(playlist_path: &str) -> String {
    let replaced: String = playlist_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    replaced.trim_matches('_').to_ascii_lowercase()
}

pub fn playlist_table_name(playlist_path: &str) -> String {
    format!("playlist_{}", playlist_cache_key(playlist_path))
}

#[derive(Default)]
struct CacheEntries {
    /// Least recently used first.
    order: VecDeque<String>,
    documents: HashMap<String, Arc<PlaylistDocument>>,
}

impl CacheEntries {
    fn touch(&mut self, playlist_path: &str) {
        if let Some(position) = self.order.iter().position(|path| path == playlist_path) {
            if let Some(path) = self.order.remove(position) {
                self.order.push_back(path);
            }
        }
    }

    fn remove(&mut self, playlist_path: &str) -> Option<Arc<PlaylistDocument>> {
        self.order.retain(|path| path != playlist_path);
        self.documents.remove(playlist_path)
    }
}

pub struct PlaylistDocumentCache {
    store: TableStore,
    capacity: usize,
    entries: Mutex<CacheEntries>,
    open_lock: tokio::sync::Mutex<()>,
}

impl PlaylistDocumentCache {
    pub fn new(store: TableStore, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            entries: Mutex::new(CacheEntries::default()),
            open_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock_entries().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, CacheEntries> {
        self.entries.lock().expect("playlist cache lock poisoned")
    }

    fn cached(&self, playlist_path: &str) -> Option<Arc<PlaylistDocument>> {
        let mut entries = self.lock_entries();
        let document = entries.documents.get(playlist_path).cloned()?;
        entries.touch(playlist_path);
        Some(document)
    }

    /// Returns the live document for `playlist_path`, loading it from its
    /// table on a miss and evicting the least recently used document when
    /// the cache is full.
    pub async fn get(&self, playlist_path: &str) -> Arc<PlaylistDocument> {
        if let Some(document) = self.cached(playlist_path) {
            return document;
        }
        let _open_guard = self.open_lock.lock().await;
        if let Some(document) = self.cached(playlist_path) {
            return document;
        }

        let table = playlist_table_name(playlist_path);
        let document = Arc::new(
            SyncedValue::open(self.store.clone(), table.as_str(), M3uTransform).await,
        );

        let evicted = {
            let mut entries = self.lock_entries();
            entries
                .documents
                .insert(playlist_path.to_string(), Arc::clone(&document));
            entries.order.push_back(playlist_path.to_string());
            let mut evicted = Vec::new();
            while entries.order.len() > self.capacity {
                let Some(oldest) = entries.order.pop_front() else {
                    break;
                };
                if let Some(document) = entries.documents.remove(&oldest) {
                    evicted.push((oldest, document));
                }
            }
            evicted
        };
        for (path, evicted_document) in evicted {
            debug!(
                "PlaylistDocumentCache: evicting document. path={} table={}",
                path,
                evicted_document.table()
            );
            self.store.release_table(evicted_document.table());
        }
        debug!(
            "PlaylistDocumentCache: opened document. path={} table={}",
            playlist_path, table
        );
        document
    }

    /// Drops the cached document for `playlist_path`. Returns `true` if one
    /// was cached.
    pub fn clear(&self, playlist_path: &str) -> bool {
        let removed = self.lock_entries().remove(playlist_path);
        match removed {
            Some(document) => {
                self.store.release_table(document.table());
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&self) {
        let documents: Vec<Arc<PlaylistDocument>> = {
            let mut entries = self.lock_entries();
            entries.order.clear();
            entries.documents.drain().map(|(_, document)| document).collect()
        };
        for document in documents {
            self.store.release_table(document.table());
        }
    }

    /// Cached paths, least recently used first.
    pub fn list_cached_paths(&self) -> Vec<String> {
        self.lock_entries().order.iter().cloned().collect()
    }
}
