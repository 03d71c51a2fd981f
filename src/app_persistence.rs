//! Application-wide persistence wiring.
//!
//! Owns one store per format family and the typed values built on them:
//! - JSON: settings, saved session state, playlist registry, visualizer
//!   preferences and hotkeys.
//! - MessagePack: the library and queue snapshots, which are large and
//!   rewritten often.
//! - M3U: one table per playlist document, behind the LRU cache.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::codec::PersistFormat;
use crate::config::PersistenceConfig;
use crate::hotkeys::{HotkeyMap, HotkeyTransform};
use crate::playlist_cache::PlaylistDocumentCache;
use crate::records::{AppSettings, PlaylistsData, SavedState, VisualizerPreferences};
use crate::snapshots::{LibrarySnapshot, QueueSnapshot, Snapshot, SnapshotCache};
use crate::synced::SyncedValue;
use crate::table_store::{Preload, StoreOptions, TableStore};

pub const SETTINGS_TABLE: &str = "settings";
pub const SAVED_STATE_TABLE: &str = "stateSaved";
pub const PLAYLISTS_TABLE: &str = "playlists";
pub const VISUALIZER_TABLE: &str = "visualizerSettings";
pub const HOTKEYS_TABLE: &str = "hotkeys";

/// Counts reported after startup preload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadSummary {
    pub library_tracks: usize,
    pub queued_tracks: usize,
    pub local_playlists: usize,
}

pub struct AppPersistence {
    config: PersistenceConfig,
    directory: PathBuf,
    json_store: TableStore,
    snapshot_store: TableStore,
    settings: SyncedValue<AppSettings>,
    saved_state: SyncedValue<SavedState>,
    playlists: SyncedValue<PlaylistsData>,
    visualizer: SyncedValue<VisualizerPreferences>,
    hotkeys: SyncedValue<HotkeyMap>,
    library: SnapshotCache<LibrarySnapshot>,
    queue: SnapshotCache<QueueSnapshot>,
    playlist_documents: PlaylistDocumentCache,
}

impl AppPersistence {
    /// Creates the stores under the configured directory, preloads the
    /// startup tables and opens every synced value.
    pub async fn open(config: &PersistenceConfig) -> Self {
        let directory = config.store_directory().unwrap_or_else(|| {
            let fallback = std::env::temp_dir().join(&config.app_dir_name);
            warn!(
                "No platform cache directory. Falling back to {}",
                fallback.display()
            );
            fallback
        });

        let json_store = TableStore::new(
            StoreOptions::new(&directory, PersistFormat::Json)
                .with_preload(Preload::Tables(config.preload_tables.clone()))
                .with_save_timeout(config.save_timeout()),
        );
        let snapshot_store = TableStore::new(
            StoreOptions::new(&directory, PersistFormat::MsgPack)
                .with_save_timeout(config.snapshot_save_timeout()),
        );
        let playlist_store = TableStore::new(
            StoreOptions::new(&directory, PersistFormat::M3u)
                .with_save_timeout(config.playlist_save_timeout()),
        );
        json_store.initialize().await;
        snapshot_store.initialize().await;
        playlist_store.initialize().await;

        let settings = SyncedValue::open_serde(json_store.clone(), SETTINGS_TABLE).await;
        let saved_state = SyncedValue::open_serde(json_store.clone(), SAVED_STATE_TABLE).await;
        let playlists = SyncedValue::open_serde(json_store.clone(), PLAYLISTS_TABLE).await;
        let visualizer = SyncedValue::open_serde(json_store.clone(), VISUALIZER_TABLE).await;
        let hotkeys = SyncedValue::open(json_store.clone(), HOTKEYS_TABLE, HotkeyTransform).await;

        let persistence = Self {
            config: config.clone(),
            directory,
            library: SnapshotCache::new(snapshot_store.clone()),
            queue: SnapshotCache::new(snapshot_store.clone()),
            playlist_documents: PlaylistDocumentCache::new(
                playlist_store,
                config.playlist_cache_capacity,
            ),
            json_store,
            snapshot_store,
            settings,
            saved_state,
            playlists,
            visualizer,
            hotkeys,
        };
        persistence.write_missing_defaults().await;
        info!(
            "AppPersistence opened. path={} playlist_cache_capacity={}",
            persistence.directory.display(),
            persistence.playlist_documents.capacity()
        );
        persistence
    }

    /// Visualizer preferences and hotkeys are written out on first run so
    /// users can find and edit the files.
    async fn write_missing_defaults(&self) {
        if !self.json_store.contains_table(VISUALIZER_TABLE).await {
            let defaults = self.visualizer.get();
            if let Err(err) = self.visualizer.set(defaults).await {
                warn!("Failed to write default visualizer preferences. error={}", err);
            }
        }
        if !self.json_store.contains_table(HOTKEYS_TABLE).await {
            let defaults = self.hotkeys.get();
            if let Err(err) = self.hotkeys.set(defaults).await {
                warn!("Failed to write default hotkeys. error={}", err);
            }
        }
    }

    /// Loads the snapshot tables so the first reads after startup do not
    /// touch the disk.
    pub async fn preload(&self) -> PreloadSummary {
        for table in &self.config.preload_tables {
            self.json_store.load_table(table).await;
        }
        self.snapshot_store.load_table(LibrarySnapshot::TABLE).await;
        self.snapshot_store.load_table(QueueSnapshot::TABLE).await;

        let summary = PreloadSummary {
            library_tracks: self.library.get_snapshot().await.item_count(),
            queued_tracks: self.queue.get_snapshot().await.item_count(),
            local_playlists: self.playlists.with(|data| data.playlists_local.len()),
        };
        info!(
            "Preload finished. library_tracks={} queued_tracks={} local_playlists={}",
            summary.library_tracks, summary.queued_tracks, summary.local_playlists
        );
        summary
    }

    /// Writes every pending change. Call before shutdown.
    pub async fn flush_all(&self) {
        self.json_store.flush_all().await;
        self.snapshot_store.flush_all().await;
        self.playlist_documents.store().flush_all().await;
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn json_store(&self) -> &TableStore {
        &self.json_store
    }

    pub fn snapshot_store(&self) -> &TableStore {
        &self.snapshot_store
    }

    pub fn settings(&self) -> &SyncedValue<AppSettings> {
        &self.settings
    }

    pub fn saved_state(&self) -> &SyncedValue<SavedState> {
        &self.saved_state
    }

    pub fn playlists(&self) -> &SyncedValue<PlaylistsData> {
        &self.playlists
    }

    pub fn visualizer(&self) -> &SyncedValue<VisualizerPreferences> {
        &self.visualizer
    }

    pub fn hotkeys(&self) -> &SyncedValue<HotkeyMap> {
        &self.hotkeys
    }

    pub fn library(&self) -> &SnapshotCache<LibrarySnapshot> {
        &self.library
    }

    pub fn queue(&self) -> &SnapshotCache<QueueSnapshot> {
        &self.queue
    }

    pub fn playlist_documents(&self) -> &PlaylistDocumentCache {
        &self.playlist_documents
    }
}
