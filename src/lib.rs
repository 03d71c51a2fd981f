//! On-device persistence for the roqtune music player.
//!
//! Application state lives in small tables, each persisted to its own file
//! through a pluggable codec. Writes are debounced per table and land
//! atomically; snapshots are re-sanitized on every read and write; playlist
//! documents are kept as M3U text behind a bounded LRU cache.

pub mod app_persistence;
pub mod codec;
pub mod config;
pub mod error;
pub mod hotkeys;
pub mod m3u;
pub mod playlist_cache;
pub mod records;
pub mod snapshots;
pub mod synced;
pub mod table_store;
pub mod write_scheduler;

pub use app_persistence::AppPersistence;
pub use codec::{PersistFormat, TableCodec};
pub use config::PersistenceConfig;
pub use error::{Result, StoreError};
pub use m3u::{M3uPlaylist, M3uTrack};
pub use playlist_cache::{PlaylistDocument, PlaylistDocumentCache};
pub use snapshots::{LibrarySnapshot, QueueSnapshot, Snapshot, SnapshotCache};
pub use synced::{PersistTransform, SerdeTransform, SyncedValue};
pub use table_store::{Change, PathKey, Preload, StoreOptions, TableEvent, TableStore};
