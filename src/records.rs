//! Typed records stored in the JSON tables.
//!
//! Every record deserializes leniently: fields missing from an older file
//! take their defaults, so adding a field never invalidates saved state.

use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub state: SidebarState,
    pub general: GeneralSettings,
    pub youtube_music: YoutubeMusicSettings,
    pub unique_id: String,
    pub is_authed: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            state: SidebarState::default(),
            general: GeneralSettings::default(),
            youtube_music: YoutubeMusicSettings { enabled: true },
            unique_id: String::new(),
            is_authed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SidebarState {
    pub sidebar_width: u32,
    pub is_sidebar_open: bool,
    /// Resizable panel sizes keyed by panel id.
    pub panels: BTreeMap<String, f64>,
}

impl Default for SidebarState {
    fn default() -> Self {
        Self {
            sidebar_width: 140,
            is_sidebar_open: true,
            panels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSettings {
    pub playlist_style: PlaylistStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistStyle {
    Compact,
    #[default]
    Comfortable,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct YoutubeMusicSettings {
    pub enabled: bool,
}

impl Default for YoutubeMusicSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Session state restored on the next launch.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SavedState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist: Option<String>,
    pub playlist_type: PlaylistSource,
    pub library_is_open: bool,
    pub library_window_size: WindowSize,
    /// `-1` when nothing was playing.
    pub playback_index: i64,
    pub playback_time: f64,
}

impl Default for SavedState {
    fn default() -> Self {
        Self {
            playlist: None,
            playlist_type: PlaylistSource::File,
            library_is_open: false,
            library_window_size: WindowSize::default(),
            playback_index: -1,
            playback_time: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistSource {
    #[default]
    File,
    Url,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

/// Registry of known playlists.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaylistsData {
    pub playlists_local: BTreeMap<String, PlaylistEntry>,
    /// Remote playlists are owned by their service; kept verbatim.
    pub playlists_ytm: BTreeMap<String, Value>,
}

impl PlaylistsData {
    /// Local playlists sorted by their sidebar order.
    pub fn ordered_local(&self) -> Vec<&PlaylistEntry> {
        let mut entries: Vec<&PlaylistEntry> = self.playlists_local.values().collect();
        entries.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        entries
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct PlaylistEntry {
    pub id: String,
    pub name: String,
    /// Location of the playlist document.
    pub path: String,
    pub count: u32,
    #[serde(rename = "type")]
    pub kind: PlaylistKind,
    pub order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistKind {
    #[default]
    File,
    Ytm,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct VisualizerPreferences {
    pub window: VisualizerWindow,
    pub visualizer: VisualizerSettings,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualizerWindow {
    pub width: u32,
    pub height: u32,
    pub auto_close: bool,
}

impl Default for VisualizerWindow {
    fn default() -> Self {
        Self {
            width: 780,
            height: 420,
            auto_close: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualizerSettings {
    pub mode: VisualizerMode,
    pub bin_count: u32,
    pub smoothing: f64,
    pub fft_size: u32,
    pub throttle_ms: u32,
}

impl Default for VisualizerSettings {
    fn default() -> Self {
        Self {
            mode: VisualizerMode::Spectrum,
            bin_count: 64,
            smoothing: 0.6,
            fft_size: 1024,
            throttle_ms: 33,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizerMode {
    #[default]
    Spectrum,
    Waveform,
}

#[cfg(test)]
mod tests {
    use super::{
        AppSettings, PlaylistKind, PlaylistStyle, PlaylistsData, SavedState, VisualizerMode,
        VisualizerPreferences,
    };
    use serde_json::json;

    #[test]
    fn test_default_records_have_expected_values() {
        let settings = AppSettings::default();
        assert_eq!(settings.state.sidebar_width, 140);
        assert!(settings.state.is_sidebar_open);
        assert_eq!(settings.general.playlist_style, PlaylistStyle::Comfortable);
        assert!(settings.youtube_music.enabled);
        assert!(!settings.is_authed);

        let saved = SavedState::default();
        assert_eq!(saved.playback_index, -1);
        assert_eq!(saved.playlist, None);

        let visualizer = VisualizerPreferences::default();
        assert_eq!(visualizer.window.width, 780);
        assert_eq!(visualizer.window.height, 420);
        assert!(visualizer.window.auto_close);
        assert_eq!(visualizer.visualizer.mode, VisualizerMode::Spectrum);
        assert_eq!(visualizer.visualizer.bin_count, 64);
        assert!((visualizer.visualizer.smoothing - 0.6).abs() < f64::EPSILON);
        assert_eq!(visualizer.visualizer.fft_size, 1024);
        assert_eq!(visualizer.visualizer.throttle_ms, 33);
    }

    #[test]
    fn test_legacy_settings_deserialization_fills_new_fields() {
        let parsed: AppSettings = serde_json::from_value(json!({
            "state": {"sidebarWidth": 260},
            "general": {"playlistStyle": "compact"},
            "uniqueId": "abc",
        }))
        .expect("settings should parse");
        assert_eq!(parsed.state.sidebar_width, 260);
        assert!(parsed.state.is_sidebar_open);
        assert_eq!(parsed.general.playlist_style, PlaylistStyle::Compact);
        assert!(parsed.youtube_music.enabled);
        assert_eq!(parsed.unique_id, "abc");
    }

    #[test]
    fn test_playlists_registry_keeps_wire_names() {
        let parsed: PlaylistsData = serde_json::from_value(json!({
            "playlistsLocal": {
                "b": {"id": "b", "name": "Beta", "path": "/p/b.m3u", "count": 2, "type": "file", "order": 1},
                "a": {"id": "a", "name": "Alpha", "path": "/p/a.m3u", "count": 5, "type": "file", "order": 0},
            },
            "playlistsYtm": {"y": {"id": "y", "title": "Remote"}},
        }))
        .expect("playlists should parse");

        let names: Vec<&str> = parsed.ordered_local().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
        assert_eq!(parsed.playlists_local["a"].kind, PlaylistKind::File);

        let serialized = serde_json::to_value(&parsed).expect("serialize");
        assert_eq!(serialized["playlistsLocal"]["a"]["type"], json!("file"));
        assert!(serialized["playlistsLocal"]["a"].get("index").is_none());
        assert_eq!(serialized["playlistsYtm"]["y"]["title"], json!("Remote"));
    }
}
