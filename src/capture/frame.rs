//! Frame data structures for captured sheet images

use image::{DynamicImage, RgbImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::CaptureError;

/// A single frame handed to the grading pipeline
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RGB pixel data
    pub image: RgbImage,
    /// Where the frame came from, when it was read from disk
    pub source: Option<PathBuf>,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            source: None,
            timestamp: Instant::now(),
        }
    }

    /// Build from raw RGBA bytes, as produced by camera and screen APIs
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Result<Self, CaptureError> {
        let rgba = RgbaImage::from_raw(width, height, data).ok_or(CaptureError::InvalidFrame { width, height })?;
        Ok(Self::new(DynamicImage::ImageRgba8(rgba).to_rgb8()))
    }

    /// Decode an image file
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let image = image::open(path)
            .map_err(|source| CaptureError::Decode {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        Ok(Self {
            image,
            source: Some(path.to_path_buf()),
            timestamp: Instant::now(),
        })
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
