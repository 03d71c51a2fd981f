//! Persisted hotkey bindings.
//!
//! Bindings are held in memory as `+`-joined virtual key codes (for example
//! `"1048576+38"` for command-J) and written to disk using readable key
//! names (`"⌘+J"`), so the file can be edited by hand.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::synced::PersistTransform;

pub const MODIFIER_COMMAND: u32 = 1 << 20;
pub const MODIFIER_SHIFT: u32 = 1 << 17;
pub const MODIFIER_OPTION: u32 = 1 << 19;
pub const MODIFIER_CONTROL: u32 = 1 << 18;
pub const MODIFIER_CAPS_LOCK: u32 = 1 << 16;
pub const MODIFIER_FUNCTION: u32 = 1 << 23;

/// macOS virtual key codes by name.
pub const KEY_CODES: &[(&str, u32)] = &[
    ("F1", 122),
    ("F2", 120),
    ("F3", 99),
    ("F4", 118),
    ("F5", 96),
    ("F6", 97),
    ("F7", 98),
    ("F8", 100),
    ("F9", 101),
    ("F10", 109),
    ("F11", 103),
    ("F12", 111),
    ("F13", 105),
    ("F14", 107),
    ("F15", 113),
    ("F16", 106),
    ("F17", 64),
    ("F18", 79),
    ("F19", 80),
    ("F20", 90),
    ("A", 0),
    ("B", 11),
    ("C", 8),
    ("D", 2),
    ("E", 14),
    ("F", 3),
    ("G", 5),
    ("H", 4),
    ("I", 34),
    ("J", 38),
    ("K", 40),
    ("L", 37),
    ("M", 46),
    ("N", 45),
    ("O", 31),
    ("P", 35),
    ("Q", 12),
    ("R", 15),
    ("S", 1),
    ("T", 17),
    ("U", 32),
    ("V", 9),
    ("W", 13),
    ("X", 7),
    ("Y", 16),
    ("Z", 6),
    ("0", 29),
    ("1", 18),
    ("2", 19),
    ("3", 20),
    ("4", 21),
    ("5", 23),
    ("6", 22),
    ("7", 26),
    ("8", 28),
    ("9", 25),
    ("MINUS", 27),
    ("EQUALS", 24),
    ("RETURN", 36),
    ("TAB", 48),
    ("SPACE", 49),
    ("DELETE", 51),
    ("ESCAPE", 53),
    ("HELP", 114),
    ("HOME", 115),
    ("PAGE_UP", 116),
    ("PAGE_DOWN", 121),
    ("END", 119),
    ("LEFT", 123),
    ("RIGHT", 124),
    ("DOWN", 125),
    ("UP", 126),
    ("COMMA", 43),
    ("PERIOD", 47),
    ("SLASH", 44),
];

const KEY_TEXT_OVERRIDES: &[(u32, &str)] = &[
    (36, "↩"),
    (48, "⇥"),
    (49, "Space"),
    (51, "⌫"),
    (53, "Esc"),
    (123, "←"),
    (124, "→"),
    (125, "↓"),
    (126, "↑"),
    (27, "-"),
    (24, "="),
    (43, ","),
    (47, "."),
    (44, "/"),
    (MODIFIER_COMMAND, "⌘"),
    (MODIFIER_SHIFT, "⇧"),
    (MODIFIER_OPTION, "⌥"),
    (MODIFIER_CONTROL, "⌃"),
    (MODIFIER_CAPS_LOCK, "⇪"),
];

pub fn key_code(name: &str) -> Option<u32> {
    KEY_CODES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, code)| *code)
}

/// Display text for a key or modifier code.
pub fn key_text(code: u32) -> Option<String> {
    if let Some((_, text)) = KEY_TEXT_OVERRIDES.iter().find(|(key, _)| *key == code) {
        return Some((*text).to_string());
    }
    let (name, _) = KEY_CODES.iter().find(|(_, key)| *key == code)?;
    let mut chars = name.chars();
    let first = chars.next()?;
    Some(format!("{}{}", first, chars.as_str().to_lowercase()))
}

/// Reverse of [`key_text`]. When several codes share a text the lowest code
/// wins.
pub fn key_code_for_text(text: &str) -> Option<u32> {
    KEY_CODES
        .iter()
        .map(|(_, code)| *code)
        .chain(KEY_TEXT_OVERRIDES.iter().map(|(code, _)| *code))
        .filter(|code| key_text(*code).as_deref() == Some(text))
        .min()
}

/// Bindable application actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HotkeyName {
    Search,
    ToggleLibrary,
    ToggleVisualizer,
    ToggleVisualizerZ,
    ToggleVisualizerI,
    PlayPause,
    PlayPauseSpace,
    NextTrack,
    PreviousTrack,
    Up,
    Down,
    Enter,
    Space,
    Delete,
}

impl HotkeyName {
    pub const ALL: [HotkeyName; 14] = [
        HotkeyName::Search,
        HotkeyName::ToggleLibrary,
        HotkeyName::ToggleVisualizer,
        HotkeyName::ToggleVisualizerZ,
        HotkeyName::ToggleVisualizerI,
        HotkeyName::PlayPause,
        HotkeyName::PlayPauseSpace,
        HotkeyName::NextTrack,
        HotkeyName::PreviousTrack,
        HotkeyName::Up,
        HotkeyName::Down,
        HotkeyName::Enter,
        HotkeyName::Space,
        HotkeyName::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HotkeyName::Search => "Search",
            HotkeyName::ToggleLibrary => "ToggleLibrary",
            HotkeyName::ToggleVisualizer => "ToggleVisualizer",
            HotkeyName::ToggleVisualizerZ => "ToggleVisualizerZ",
            HotkeyName::ToggleVisualizerI => "ToggleVisualizerI",
            HotkeyName::PlayPause => "PlayPause",
            HotkeyName::PlayPauseSpace => "PlayPauseSpace",
            HotkeyName::NextTrack => "NextTrack",
            HotkeyName::PreviousTrack => "PreviousTrack",
            HotkeyName::Up => "Up",
            HotkeyName::Down => "Down",
            HotkeyName::Enter => "Enter",
            HotkeyName::Space => "Space",
            HotkeyName::Delete => "Delete",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            HotkeyName::Search => "Search files",
            HotkeyName::ToggleLibrary => "Toggle media library",
            HotkeyName::ToggleVisualizer => "Toggle visualizer window",
            HotkeyName::ToggleVisualizerZ => "Toggle visualizer window (debug: Z key)",
            HotkeyName::ToggleVisualizerI => "Toggle visualizer window (debug: I key)",
            HotkeyName::PlayPause => "Toggle playback",
            HotkeyName::PlayPauseSpace => "Toggle playback (space bar)",
            HotkeyName::NextTrack => "Play next track",
            HotkeyName::PreviousTrack => "Play previous track",
            HotkeyName::Up => "Move selection up",
            HotkeyName::Down => "Move selection down",
            HotkeyName::Enter | HotkeyName::Space => "Activate selection",
            HotkeyName::Delete => "Delete selected items",
        }
    }

    /// Media-key actions have no keyboard default; they are driven by the
    /// system media controls unless the user binds them.
    pub fn default_binding(self) -> Option<u32> {
        match self {
            HotkeyName::Search => Some(38),
            HotkeyName::ToggleLibrary => Some(37),
            HotkeyName::ToggleVisualizer => Some(9),
            HotkeyName::ToggleVisualizerZ => Some(6),
            HotkeyName::ToggleVisualizerI => Some(34),
            HotkeyName::PlayPauseSpace | HotkeyName::Space => Some(49),
            HotkeyName::Up => Some(126),
            HotkeyName::Down => Some(125),
            HotkeyName::Enter => Some(36),
            HotkeyName::Delete => Some(51),
            HotkeyName::PlayPause | HotkeyName::NextTrack | HotkeyName::PreviousTrack => None,
        }
    }
}

/// Action name to `+`-joined key codes.
pub type HotkeyMap = BTreeMap<String, String>;

pub fn default_hotkeys() -> HotkeyMap {
    HotkeyName::ALL
        .iter()
        .filter_map(|name| {
            name.default_binding()
                .map(|code| (name.as_str().to_string(), code.to_string()))
        })
        .collect()
}

/// `"1048576+38"` to `"⌘+J"`. Parts that are not known codes are kept.
pub fn binding_to_text(binding: &str) -> String {
    binding
        .split('+')
        .map(|part| {
            part.parse::<u32>()
                .ok()
                .and_then(key_text)
                .unwrap_or_else(|| part.to_string())
        })
        .collect::<Vec<_>>()
        .join("+")
}

/// `"⌘+J"` to `"1048576+38"`. Parts that are not known key names are kept.
pub fn binding_from_text(text: &str) -> String {
    text.split('+')
        .map(|part| {
            key_code_for_text(part)
                .map(|code| code.to_string())
                .unwrap_or_else(|| part.to_string())
        })
        .collect::<Vec<_>>()
        .join("+")
}

fn binding_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Stores bindings as key names. Actions missing from the file keep their
/// default binding.
#[derive(Debug, Default, Clone, Copy)]
pub struct HotkeyTransform;

impl PersistTransform for HotkeyTransform {
    type Value = HotkeyMap;

    fn load(&self, raw: Value) -> HotkeyMap {
        let mut hotkeys = default_hotkeys();
        if let Value::Object(entries) = raw {
            for (name, value) in entries {
                if let Some(text) = binding_string(&value) {
                    hotkeys.insert(name, binding_from_text(&text));
                }
            }
        }
        hotkeys
    }

    fn save(&self, value: &HotkeyMap) -> Value {
        let entries: Map<String, Value> = value
            .iter()
            .map(|(name, binding)| (name.clone(), Value::String(binding_to_text(binding))))
            .collect();
        Value::Object(entries)
    }
}
