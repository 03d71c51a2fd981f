//! Library index snapshot.
//!
//! Tracks are stored relative to one of the snapshot's scan roots so the
//! index survives a root being moved. A track without a relative path has
//! no location and is discarded during sanitization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{file_name_of, non_empty_string, now_millis, number_as_i64, truthy, Snapshot};

pub const LIBRARY_SNAPSHOT_VERSION: u32 = 3;

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const ZERO_DURATION: &str = "0:00";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryTrack {
    pub root_index: usize,
    pub relative_path: String,
    pub file_name: String,
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
}

impl LibraryTrack {
    /// Resolves the track against `roots`. Relative paths starting with `/`
    /// are already absolute. Returns `None` if the root index is dangling.
    pub fn absolute_path(&self, roots: &[String]) -> Option<String> {
        if self.relative_path.starts_with('/') {
            return Some(self.relative_path.clone());
        }
        let root = roots.get(self.root_index)?;
        Some(format!(
            "{}/{}",
            root.trim_end_matches('/'),
            self.relative_path
        ))
    }

    fn sanitize(raw: &Value, root_count: usize) -> Option<Self> {
        let relative_path = non_empty_string(raw, "relativePath")?;
        let root_index = number_as_i64(raw.get("rootIndex"))
            .and_then(|index| usize::try_from(index).ok())
            .filter(|index| *index < root_count)
            .unwrap_or(0);
        let file_name = non_empty_string(raw, "fileName")
            .unwrap_or_else(|| file_name_of(&relative_path).to_string());
        let title = non_empty_string(raw, "title").unwrap_or_else(|| file_name.clone());
        let thumbnail = non_empty_string(raw, "thumbnail");
        let thumbnail_key = non_empty_string(raw, "thumbnailKey")
            .or_else(|| thumbnail.as_deref().and_then(thumbnail_key_from_uri));

        Some(Self {
            root_index,
            relative_path,
            file_name,
            title,
            artist: non_empty_string(raw, "artist").unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            album: non_empty_string(raw, "album"),
            duration: non_empty_string(raw, "duration")
                .unwrap_or_else(|| ZERO_DURATION.to_string()),
            thumbnail,
            thumbnail_key,
        })
    }
}

/// Best-effort cache key for a thumbnail: its file name with the last
/// extension removed. Names with several dots keep all but the final one.
fn thumbnail_key_from_uri(uri: &str) -> Option<String> {
    let file_name = file_name_of(uri.split(['?', '#']).next().unwrap_or(uri));
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    (!stem.is_empty()).then(|| stem.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySnapshot {
    pub version: u32,
    pub updated_at: i64,
    pub roots: Vec<String>,
    pub tracks: Vec<LibraryTrack>,
    pub is_scanning: bool,
    pub last_scan_time: Option<i64>,
}

impl LibrarySnapshot {
    pub fn absolute_paths(&self) -> Vec<String> {
        self.tracks
            .iter()
            .filter_map(|track| track.absolute_path(&self.roots))
            .collect()
    }
}

impl Snapshot for LibrarySnapshot {
    const TABLE: &'static str = "libraryCache";
    const VERSION: u32 = LIBRARY_SNAPSHOT_VERSION;

    fn sanitize(raw: &Value) -> Self {
        let roots: Vec<String> = match raw.get("roots") {
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        let tracks = match raw.get("tracks") {
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(|entry| LibraryTrack::sanitize(entry, roots.len()))
                .collect(),
            _ => Vec::new(),
        };

        Self {
            version: LIBRARY_SNAPSHOT_VERSION,
            updated_at: number_as_i64(raw.get("updatedAt")).unwrap_or_else(now_millis),
            roots,
            tracks,
            is_scanning: raw.get("isScanning").is_some_and(truthy),
            last_scan_time: number_as_i64(raw.get("lastScanTime")),
        }
    }

    fn default_snapshot(updated_at: i64) -> Self {
        Self {
            version: LIBRARY_SNAPSHOT_VERSION,
            updated_at,
            roots: Vec::new(),
            tracks: Vec::new(),
            is_scanning: false,
            last_scan_time: None,
        }
    }

    fn item_count(&self) -> usize {
        self.tracks.len()
    }
}
