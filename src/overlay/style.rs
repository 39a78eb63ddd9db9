//! Colors and fonts for graded overlays

use ab_glyph::FontArc;
use image::Rgb;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::config::OverlaySettings;

/// DejaVu Sans, used whenever no font is configured
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Drawing style for answer markers, score text and banners
#[derive(Clone)]
pub struct OverlayStyle {
    pub correct: Rgb<u8>,
    pub incorrect: Rgb<u8>,
    pub expected: Rgb<u8>,
    pub grid: Rgb<u8>,
    pub score: Rgb<u8>,
    pub banner: Rgb<u8>,
    pub banner_text: String,
    /// Without a font the score is drawn as a bar and the banner is left blank
    pub font: Option<FontArc>,
}

impl fmt::Debug for OverlayStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayStyle")
            .field("correct", &self.correct)
            .field("incorrect", &self.incorrect)
            .field("expected", &self.expected)
            .field("grid", &self.grid)
            .field("score", &self.score)
            .field("banner", &self.banner)
            .field("banner_text", &self.banner_text)
            .field("font", &self.font.is_some())
            .finish()
    }
}

impl Default for OverlayStyle {
    /// Default colors with the bundled font
    fn default() -> Self {
        let mut style = Self::without_font(&OverlaySettings::default());
        style.font = bundled_font();
        style
    }
}

impl OverlayStyle {
    /// Build a style from settings, loading the configured font or the bundled one
    pub fn from_settings(settings: &OverlaySettings) -> Self {
        let mut style = Self::without_font(settings);
        style.font = settings
            .font_path
            .as_deref()
            .and_then(|path| {
                let font = load_font(path);
                if font.is_none() {
                    warn!("Could not load overlay font {:?}; using the bundled font", path);
                }
                font
            })
            .or_else(bundled_font);
        style
    }

    /// Build a style from settings without any font
    pub fn without_font(settings: &OverlaySettings) -> Self {
        Self {
            correct: Rgb(settings.correct_color),
            incorrect: Rgb(settings.incorrect_color),
            expected: Rgb(settings.expected_color),
            grid: Rgb(settings.grid_color),
            score: Rgb(settings.score_color),
            banner: Rgb(settings.banner_color),
            banner_text: settings.banner_text.clone(),
            font: None,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }
}

/// The font compiled into the binary
pub fn bundled_font() -> Option<FontArc> {
    match FontArc::try_from_slice(BUNDLED_FONT) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("Bundled font is unreadable: {}", e);
            None
        }
    }
}

fn load_font(path: &Path) -> Option<FontArc> {
    let data = std::fs::read(path).ok()?;
    let font = FontArc::try_from_vec(data).ok()?;
    info!("Loaded overlay font from {}", path.display());
    Some(font)
}
