use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{file_name_of, non_empty_string, now_millis, number_as_i64, truthy, Snapshot};

pub const QUEUE_SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTrack {
    pub file_path: String,
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl QueuedTrack {
    fn sanitize(raw: &Value) -> Option<Self> {
        // Entries written before filePath existed used the path as their id.
        let file_path = non_empty_string(raw, "filePath").or_else(|| non_empty_string(raw, "id"))?;
        Some(Self {
            title: non_empty_string(raw, "title")
                .unwrap_or_else(|| file_name_of(&file_path).to_string()),
            artist: non_empty_string(raw, "artist").unwrap_or_else(|| "Unknown Artist".to_string()),
            album: non_empty_string(raw, "album"),
            duration: non_empty_string(raw, "duration").unwrap_or_else(|| "0:00".to_string()),
            thumbnail: non_empty_string(raw, "thumbnail"),
            file_path,
        })
    }
}

/// Persisted play queue. `is_playing` implies a non-empty queue, and
/// `current_index` is in range or `-1` for an empty queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub version: u32,
    pub updated_at: i64,
    pub queue: Vec<QueuedTrack>,
    pub current_index: i64,
    pub is_playing: bool,
}

impl QueueSnapshot {
    pub fn current_track(&self) -> Option<&QueuedTrack> {
        usize::try_from(self.current_index)
            .ok()
            .and_then(|index| self.queue.get(index))
    }
}

impl Snapshot for QueueSnapshot {
    const TABLE: &'static str = "playlistCache";
    const VERSION: u32 = QUEUE_SNAPSHOT_VERSION;

    fn sanitize(raw: &Value) -> Self {
        let queue: Vec<QueuedTrack> = match raw.get("queue") {
            Some(Value::Array(entries)) => entries.iter().filter_map(QueuedTrack::sanitize).collect(),
            _ => Vec::new(),
        };
        let has_queue = !queue.is_empty();
        let last_index = queue.len() as i64 - 1;
        let current_index = match number_as_i64(raw.get("currentIndex")) {
            _ if !has_queue => -1,
            Some(index) => index.clamp(0, last_index),
            None => 0,
        };

        Self {
            version: QUEUE_SNAPSHOT_VERSION,
            updated_at: number_as_i64(raw.get("updatedAt")).unwrap_or_else(now_millis),
            is_playing: has_queue && raw.get("isPlaying").is_some_and(truthy),
            queue,
            current_index,
        }
    }

    fn default_snapshot(updated_at: i64) -> Self {
        Self {
            version: QUEUE_SNAPSHOT_VERSION,
            updated_at,
            queue: Vec::new(),
            current_index: -1,
            is_playing: false,
        }
    }

    fn item_count(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{QueueSnapshot, QUEUE_SNAPSHOT_VERSION};
    use crate::snapshots::Snapshot;
    use serde_json::json;

    #[test]
    fn test_empty_queue_cannot_be_playing() {
        let snapshot = QueueSnapshot::sanitize(&json!({
            "queue": [],
            "currentIndex": 3,
            "isPlaying": true,
        }));
        assert_eq!(snapshot.current_index, -1);
        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.current_track(), None);
    }

    #[test]
    fn test_current_index_is_clamped_into_queue() {
        let raw = json!({
            "queue": [{"filePath": "/a.mp3"}, {"filePath": "/b.mp3"}],
            "currentIndex": 7,
            "isPlaying": true,
        });
        let snapshot = QueueSnapshot::sanitize(&raw);
        assert_eq!(snapshot.current_index, 1);
        assert!(snapshot.is_playing);
        assert_eq!(snapshot.current_track().map(|t| t.file_path.as_str()), Some("/b.mp3"));

        let negative = QueueSnapshot::sanitize(&json!({
            "queue": [{"filePath": "/a.mp3"}],
            "currentIndex": -4,
        }));
        assert_eq!(negative.current_index, 0);
        assert!(!negative.is_playing);

        let missing = QueueSnapshot::sanitize(&json!({"queue": [{"filePath": "/a.mp3"}]}));
        assert_eq!(missing.current_index, 0);
    }

    #[test]
    fn test_legacy_entries_fall_back_to_id_and_file_name() {
        let snapshot = QueueSnapshot::sanitize(&json!({
            "version": 1,
            "queue": [
                {"id": "/music/Artist/track one.mp3", "queueEntryId": "q1", "fileName": "x"},
                {"title": "no path"},
                {"filePath": "", "id": 12},
                {"filePath": "/b.flac", "title": "B", "artist": "Band", "duration": "3:45"},
            ],
        }));

        assert_eq!(snapshot.version, QUEUE_SNAPSHOT_VERSION);
        assert_eq!(snapshot.queue.len(), 2);
        assert_eq!(snapshot.queue[0].file_path, "/music/Artist/track one.mp3");
        assert_eq!(snapshot.queue[0].title, "track one.mp3");
        assert_eq!(snapshot.queue[0].artist, "Unknown Artist");
        assert_eq!(snapshot.queue[1].duration, "3:45");

        let serialized = serde_json::to_value(&snapshot.queue[0]).expect("serialize");
        assert!(serialized.get("queueEntryId").is_none());
        assert!(serialized.get("album").is_none());
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let once = QueueSnapshot::sanitize(&json!({
            "updatedAt": 42,
            "queue": [{"filePath": "/a.mp3", "album": "A"}, null, {"id": "/c.mp3"}],
            "currentIndex": "2",
            "isPlaying": "true",
        }));
        let twice = QueueSnapshot::sanitize(&serde_json::to_value(&once).expect("serialize"));
        assert_eq!(once, twice);
        assert_eq!(once.current_index, 0);
        assert!(once.is_playing);
    }
}
