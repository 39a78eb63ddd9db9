//! Frame Capture Layer
//!
//! Supplies sheet images to the grading loop. Live cameras and image
//! sequences on disk both sit behind [`FrameSource`].

pub mod frame;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub use frame::CapturedFrame;

/// Image extensions picked up when replaying a directory
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// Failure to obtain a frame
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device or path cannot be opened at all
    #[error("capture source unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("pixel buffer does not match {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Anything that can produce frames one at a time.
///
/// `Ok(None)` means the source is exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        (**self).next_frame()
    }
}

/// Replays a single image file or every image in a directory, sorted by name
#[derive(Debug, Clone)]
pub struct ImageSequence {
    pending: VecDeque<PathBuf>,
}

impl ImageSequence {
    /// Open a file or directory
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        if path.is_file() {
            return Ok(Self::from_paths(vec![path.to_path_buf()]));
        }
        if !path.is_dir() {
            return Err(CaptureError::Unavailable(format!("{} does not exist", path.display())));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_path(p))
            .collect();
        paths.sort();

        info!("Replaying {} images from {}", paths.len(), path.display());
        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            pending: paths.into(),
        }
    }

    /// Frames not yet read
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        debug!("Reading frame {}", path.display());
        CapturedFrame::open(&path).map(Some)
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_missing_path_is_unavailable() {
        let err = ImageSequence::open(Path::new("/nonexistent/omr/frames")).unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable(_)));
    }

    #[test]
    fn test_directory_replays_images_in_name_order() {
        let dir = TempDir::new().unwrap();
        for (name, shade) in [("b.png", 20u8), ("a.png", 10), ("c.png", 30)] {
            RgbImage::from_pixel(4, 3, Rgb([shade; 3]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.remaining(), 3);

        let mut shades = vec![];
        while let Some(frame) = seq.next_frame().unwrap() {
            assert_eq!(frame.dimensions(), (4, 3));
            shades.push(frame.image.get_pixel(0, 0).0[0]);
        }
        assert_eq!(shades, vec![10, 20, 30]);
        assert!(seq.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_single_file_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sheet.png");
        RgbImage::new(2, 2).save(&path).unwrap();

        let mut seq = ImageSequence::open(&path).unwrap();
        let frame = seq.next_frame().unwrap().unwrap();
        assert_eq!(frame.source.as_deref(), Some(path.as_path()));
        assert!(seq.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let mut seq = ImageSequence::open(&path).unwrap();
        assert!(matches!(seq.next_frame(), Err(CaptureError::Decode { .. })));
    }
}
