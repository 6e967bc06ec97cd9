//! Editor configuration, stored as JSON in the per-user config directory.
//!
//! Every field has a default, so an older or hand-edited file that misses
//! keys still loads. A missing or unreadable file means "all defaults".

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::canvas::{Color, DEFAULT_FPS, DEFAULT_FRAME_DELAY_MS};
use crate::components::history::DEFAULT_HISTORY_LIMIT;

const SETTINGS_FILE: &str = "pixelforge_settings.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    pub default_width: u32,
    pub default_height: u32,
    pub default_fps: u32,
    pub default_frame_delay_ms: u32,
    pub history_limit: usize,
    /// Cell size in screen pixels for new sessions.
    pub default_zoom: f32,
    pub primary_color: Color,
    pub secondary_color: Color,
    /// Raw RGB distance, 0 = exact colour match only.
    pub magic_wand_tolerance: f64,
    pub brush_select_radius: u32,
    /// Source alpha must exceed this for a cell to be kept on AI-image import.
    pub ai_alpha_threshold: u8,
    /// Same cutoff for spritesheet slicing.
    pub sheet_alpha_threshold: u8,
    /// Transform handle grab radius, screen pixels.
    pub handle_hit_radius: f32,
    /// Distance of the rotate handle above the box, in cells.
    pub rotate_handle_offset: f32,
    pub clear_selection_on_wand_exit: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            default_width: 32,
            default_height: 32,
            default_fps: DEFAULT_FPS,
            default_frame_delay_ms: DEFAULT_FRAME_DELAY_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            default_zoom: 15.0,
            primary_color: Color::WHITE,
            secondary_color: Color::BLACK,
            magic_wand_tolerance: 0.0,
            brush_select_radius: 1,
            ai_alpha_threshold: 50,
            sheet_alpha_threshold: 0,
            handle_hit_radius: 10.0,
            rotate_handle_offset: 2.0,
            clear_selection_on_wand_exit: true,
        }
    }
}

impl EditorSettings {
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("pixelforge");
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("PixelForge").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("PixelForge")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    /// Settings from the default location, or defaults.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("settings file {} is malformed ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = EditorSettings::default();
        assert_eq!((s.default_width, s.default_height), (32, 32));
        assert_eq!(s.default_fps, 12);
        assert_eq!(s.history_limit, 50);
        assert_eq!(s.primary_color, Color::WHITE);
        assert_eq!(s.secondary_color, Color::BLACK);
        assert_eq!(s.ai_alpha_threshold, 50);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r##"{"default_width": 64, "primary_color": "#ff004d", "unknown": 1}"##).unwrap();
        let s = EditorSettings::load_from(&path);
        assert_eq!(s.default_width, 64);
        assert_eq!(s.default_height, 32);
        assert_eq!(s.primary_color, Color::rgb(0xff, 0x00, 0x4d));
    }

    #[test]
    fn test_malformed_or_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        assert_eq!(EditorSettings::load_from(&path), EditorSettings::default());
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(EditorSettings::load_from(&path), EditorSettings::default());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let s = EditorSettings { default_fps: 24, magic_wand_tolerance: 12.5, ..Default::default() };
        s.save_to(&path).unwrap();
        assert_eq!(EditorSettings::load_from(&path), s);
    }
}
