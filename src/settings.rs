//! Persistent projection settings, stored as a plain `key=value` file.

use std::path::{Path, PathBuf};

use crate::error::{CompositeError, Result};

/// Which projection engine a [`crate::projection::Projection`] is built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Engine {
    /// Explicit back-to-front layer loop.
    #[default]
    Legacy,
    /// Pull-based node graph evaluated tile by tile.
    Graph,
}

impl Engine {
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Legacy => "legacy",
            Engine::Graph => "graph",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Some(Engine::Legacy),
            "graph" | "gegl" => Some(Engine::Graph),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionSettings {
    pub engine: Engine,
    /// Rows per band handed to the worker pool by the region combiner.
    pub band_rows: u32,
    /// Regions smaller than this many pixels are combined on the calling thread.
    pub parallel_min_pixels: u64,
    pub max_undo_steps: usize,
    /// Tile edge of the projection buffer.
    pub tile_size: u32,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            engine: Engine::Legacy,
            band_rows: 64,
            parallel_min_pixels: 16_384,
            max_undo_steps: 100,
            tile_size: crate::buffer::CHUNK_SIZE,
        }
    }
}

impl ProjectionSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/paintfe/projection.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\PaintFE\projection.cfg
    /// On macOS:   ~/Library/Application Support/PaintFE/projection.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("PaintFE").join("projection.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("PaintFE")
                    .join("projection.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("paintfe").join("projection.cfg"))
        }
    }

    /// Render as `key=value` lines.
    pub fn to_config_string(&self) -> String {
        format!(
            "engine={}\n\
             band_rows={}\n\
             parallel_min_pixels={}\n\
             max_undo_steps={}\n\
             tile_size={}\n",
            self.engine.as_str(),
            self.band_rows,
            self.parallel_min_pixels,
            self.max_undo_steps,
            self.tile_size,
        )
    }

    /// Parse `key=value` lines. Unknown keys are skipped; malformed or
    /// out-of-range values keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "engine" => {
                    if let Some(e) = Engine::parse(val) {
                        s.engine = e;
                    }
                }
                "band_rows" => {
                    if let Ok(v) = val.parse::<u32>() && v > 0 {
                        s.band_rows = v;
                    }
                }
                "parallel_min_pixels" => {
                    if let Ok(v) = val.parse::<u64>() {
                        s.parallel_min_pixels = v;
                    }
                }
                "max_undo_steps" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_undo_steps = v;
                    }
                }
                "tile_size" => {
                    if let Ok(v) = val.parse::<u32>() && (8..=1024).contains(&v) {
                        s.tile_size = v;
                    }
                }
                _ => {}
            }
        }
        s
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    /// Load from the default location (returns default if file missing or corrupt).
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        Self::load_from(&path).unwrap_or_default()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::settings_path()
            .ok_or_else(|| CompositeError::Settings("no config directory available".into()))?;
        self.save_to(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_defaults_for_bad_values() {
        let s = ProjectionSettings::parse("engine=graph\nband_rows=zero\ntile_size=4\nbogus=1\n");
        assert_eq!(s.engine, Engine::Graph);
        assert_eq!(s.band_rows, 64, "non-numeric band_rows falls back");
        assert_eq!(s.tile_size, 64, "tile sizes below 8 are rejected");
    }

    #[test]
    fn config_string_parses_back() {
        let s = ProjectionSettings {
            engine: Engine::Graph,
            band_rows: 16,
            parallel_min_pixels: 0,
            max_undo_steps: 7,
            tile_size: 128,
        };
        assert_eq!(ProjectionSettings::parse(&s.to_config_string()), s);
    }

    #[test]
    fn engine_names() {
        assert_eq!(Engine::parse(" Legacy "), Some(Engine::Legacy));
        assert_eq!(Engine::parse("gegl"), Some(Engine::Graph));
        assert_eq!(Engine::parse("fast"), None);
    }
}
