//! Extended M3U playlist parsing and serialization.
//!
//! Playlists carry two sections: the primary song list and a suggestions list
//! introduced by a one-time `#EXTGRP:suggestions` marker.

/// Header line emitted at the top of every serialized playlist.
pub const M3U_HEADER: &str = "#EXTM3U";
/// Duration value used for entries whose length is unknown.
pub const UNKNOWN_DURATION: i64 = -1;

const EXTINF_PREFIX: &str = "#EXTINF:";
const EXTGRP_PREFIX: &str = "#EXTGRP:";
const SUGGESTIONS_GROUP_LINE: &str = "#EXTGRP:suggestions";
const ARTIST_TITLE_SEPARATOR: &str = " - ";

/// One playlist entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct M3uTrack {
    /// Length in whole seconds, or [`UNKNOWN_DURATION`].
    pub duration: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub file_path: String,
}

/// Parsed playlist document.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct M3uPlaylist {
    #[serde(default)]
    pub songs: Vec<M3uTrack>,
    #[serde(default)]
    pub suggestions: Vec<M3uTrack>,
}

impl M3uPlaylist {
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty() && self.suggestions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Songs,
    Suggestions,
}

fn push_to_section(playlist: &mut M3uPlaylist, section: Section, track: M3uTrack) {
    match section {
        Section::Songs => playlist.songs.push(track),
        Section::Suggestions => playlist.suggestions.push(track),
    }
}

/// Parses the `<duration>,<info>` tail of an `#EXTINF:` line.
fn parse_extinf(rest: &str) -> Option<(i64, &str)> {
    let (duration_text, info) = rest.split_once(',')?;
    let digits = duration_text.strip_prefix('-').unwrap_or(duration_text);
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let duration = duration_text.parse::<i64>().ok()?;
    Some((duration, info.trim()))
}

fn split_artist_title(info: &str) -> (Option<String>, String) {
    match info.split_once(ARTIST_TITLE_SEPARATOR) {
        Some((artist, title)) => (Some(artist.trim().to_string()), title.trim().to_string()),
        None => (None, info.to_string()),
    }
}

/// Derives a display title from a playlist path: last segment, extension
/// stripped, percent-decoded when possible.
pub fn title_from_path(file_path: &str) -> String {
    let file_name = match file_path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => file_path,
    };
    let stem = match file_name.rfind('.') {
        Some(dot_index) => &file_name[..dot_index],
        None => file_name,
    };
    match urlencoding::decode(stem) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => stem.to_string(),
    }
}

/// Parses playlist text. Never fails; malformed entries are skipped.
pub fn parse_m3u(content: &str) -> M3uPlaylist {
    let lines: Vec<&str> = content
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let mut playlist = M3uPlaylist::default();
    let mut section = Section::Songs;
    let mut index = 0;
    while index < lines.len() {
        let line = lines[index];

        if line.starts_with(EXTGRP_PREFIX) {
            section = Section::Suggestions;
            index += 1;
            continue;
        }

        if let Some(rest) = line.strip_prefix(EXTINF_PREFIX) {
            let parsed = parse_extinf(rest);
            match (parsed, lines.get(index + 1)) {
                (Some((duration, info)), Some(file_path)) => {
                    let (artist, title) = split_artist_title(info);
                    push_to_section(
                        &mut playlist,
                        section,
                        M3uTrack {
                            duration,
                            title,
                            artist,
                            file_path: (*file_path).to_string(),
                        },
                    );
                    index += 2;
                }
                _ => index += 1,
            }
            continue;
        }

        if line.starts_with('#') {
            index += 1;
            continue;
        }

        push_to_section(
            &mut playlist,
            section,
            M3uTrack {
                duration: UNKNOWN_DURATION,
                title: title_from_path(line),
                artist: None,
                file_path: line.to_string(),
            },
        );
        index += 1;
    }

    playlist
}

fn push_track_lines(lines: &mut Vec<String>, track: &M3uTrack) {
    let info = match track.artist.as_deref() {
        Some(artist) if !artist.is_empty() => {
            format!("{}{}{}", artist, ARTIST_TITLE_SEPARATOR, track.title)
        }
        _ => track.title.clone(),
    };
    lines.push(format!("{}{},{}", EXTINF_PREFIX, track.duration, info));
    lines.push(track.file_path.clone());
    lines.push(String::new());
}

/// Serializes a playlist. Output always ends with a newline.
pub fn write_m3u(playlist: &M3uPlaylist) -> String {
    let mut lines = vec![M3U_HEADER.to_string()];
    for track in &playlist.songs {
        push_track_lines(&mut lines, track);
    }

    if !playlist.suggestions.is_empty() {
        lines.push(SUGGESTIONS_GROUP_LINE.to_string());
        lines.push(String::new());
        for track in &playlist.suggestions {
            push_track_lines(&mut lines, track);
        }
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Returns `true` when the text has at least one non-comment entry line.
pub fn is_valid_m3u(content: &str) -> bool {
    content
        .trim()
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Converts an `M:SS` duration string to seconds.
///
/// Only `<digits>:<two digits>` with seconds below 60 is accepted. Anything
/// else is unknown and yields `None`, never zero.
pub fn parse_duration_to_seconds(duration: &str) -> Option<u32> {
    let (minutes_text, seconds_text) = duration.split_once(':')?;
    if minutes_text.is_empty()
        || !minutes_text.bytes().all(|byte| byte.is_ascii_digit())
        || seconds_text.len() != 2
        || !seconds_text.bytes().all(|byte| byte.is_ascii_digit())
    {
        return None;
    }
    let minutes = minutes_text.parse::<u32>().ok()?;
    let seconds = seconds_text.parse::<u32>().ok()?;
    if seconds >= 60 {
        return None;
    }
    minutes.checked_mul(60)?.checked_add(seconds)
}

/// Formats seconds as `M:SS`.
pub fn format_duration_seconds(total_seconds: u32) -> String {
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}
