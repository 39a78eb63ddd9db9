//! Application Configuration
//!
//! Grading settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::grid::SamplerConfig;
use crate::vision::locate::LocatorConfig;
use crate::vision::SheetLayout;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Sheet localization settings
    pub locator: LocatorConfig,
    /// Canonical sheet geometry
    pub sheet: SheetLayout,
    /// Bubble sampling settings
    pub sampler: SamplerConfig,
    /// Overlay rendering settings
    pub overlay: OverlaySettings,
    /// Results log settings
    pub results: ResultsSettings,
}

/// Overlay-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// TrueType/OpenType font for score and banner text.
    /// Well-known system locations are tried when unset.
    pub font_path: Option<PathBuf>,
    /// Marker for a detected answer that matches the key
    pub correct_color: [u8; 3],
    /// Marker for a detected answer that does not match the key
    pub incorrect_color: [u8; 3],
    /// Small marker on the key's answer when the row was missed
    pub expected_color: [u8; 3],
    /// Grid line color
    pub grid_color: [u8; 3],
    /// Score text color
    pub score_color: [u8; 3],
    /// Banner color when no sheet is found
    pub banner_color: [u8; 3],
    /// Banner text when no sheet is found
    pub banner_text: String,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            font_path: None,
            correct_color: [0, 255, 0],
            incorrect_color: [255, 0, 0],
            expected_color: [0, 255, 0],
            grid_color: [255, 255, 0],
            score_color: [255, 255, 0],
            banner_color: [255, 0, 0],
            banner_text: "! No OMR Sheet detected!".to_string(),
        }
    }
}

/// Results log settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsSettings {
    /// CSV file graded sheets are appended to.
    /// Defaults to `results.csv` in the application data directory.
    pub log_path: Option<PathBuf>,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}
