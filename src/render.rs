//! Rendering collaborator.
//!
//! The renderer is purely observational: it gets the processed frame and
//! the overlay text and never feeds anything back into the controller.

use crate::capture::Frame;
use crate::effects::EffectKind;
use crate::error::SnapshotError;
use crate::resolution::Resolution;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Display text drawn over each frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// Last published rate, `None` until the first window closes.
    pub rate: Option<f64>,
    pub target_fps: u16,
    pub resolution: Resolution,
    pub resolution_index: usize,
    pub granted_level: u8,
    pub max_level: u8,
    pub effect: EffectKind,
    pub controller_state: &'static str,
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rate {
            Some(rate) => write!(f, "FPS {:.1}/{}", rate, self.target_fps)?,
            None => write!(f, "FPS --/{}", self.target_fps)?,
        }
        write!(
            f,
            " | {} [{}] | AWM {}/{} | {} | {}",
            self.resolution,
            self.resolution_index,
            self.granted_level,
            self.max_level,
            self.effect,
            self.controller_state
        )
    }
}

pub trait Renderer {
    /// Show a processed frame with its overlay.
    fn render(&mut self, frame: Frame, overlay: &Overlay);

    /// Save the last shown frame, returning the written path.
    fn snapshot(&mut self) -> Result<PathBuf, SnapshotError>;
}

/// Headless renderer writing the overlay to the log.
pub struct LogRenderer {
    snapshot_dir: Option<PathBuf>,
    last_frame: Option<Frame>,
    last_info: Option<Instant>,
    info_every: Duration,
}

impl LogRenderer {
    pub fn new(snapshot_dir: Option<PathBuf>) -> Self {
        Self {
            snapshot_dir,
            last_frame: None,
            last_info: None,
            info_every: Duration::from_secs(1),
        }
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, frame: Frame, overlay: &Overlay) {
        let now = Instant::now();
        let due = self
            .last_info
            .map_or(true, |last| now.duration_since(last) >= self.info_every);
        if due {
            info!(frame = frame.index, "{}", overlay);
            self.last_info = Some(now);
        } else {
            debug!(frame = frame.index, "{}", overlay);
        }
        self.last_frame = Some(frame);
    }

    fn snapshot(&mut self) -> Result<PathBuf, SnapshotError> {
        let dir = self.snapshot_dir.as_ref().ok_or(SnapshotError::NoDirectory)?;
        let frame = self.last_frame.as_ref().ok_or(SnapshotError::NothingToSave)?;

        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("snapshot_{:06}.png", frame.index));
        frame
            .image
            .save(&path)
            .map_err(|source| SnapshotError::WriteFailed {
                path: path.display().to_string(),
                source,
            })?;
        info!("Snapshot saved to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn overlay(rate: Option<f64>) -> Overlay {
        Overlay {
            rate,
            target_fps: 25,
            resolution: Resolution::new(640, 480),
            resolution_index: 1,
            granted_level: 1,
            max_level: 2,
            effect: EffectKind::Edges,
            controller_state: "STABLE",
        }
    }

    fn frame(index: u64) -> Frame {
        Frame {
            index,
            image: RgbImage::from_pixel(8, 6, Rgb([10, 20, 30])),
        }
    }

    #[test]
    fn test_overlay_text() {
        assert_eq!(
            overlay(Some(24.26)).to_string(),
            "FPS 24.3/25 | 640x480 [1] | AWM 1/2 | edges | STABLE"
        );
        assert!(overlay(None).to_string().starts_with("FPS --/25 |"));
    }

    #[test]
    fn test_snapshot_writes_last_frame() {
        let dir = tempdir().unwrap();
        let mut renderer = LogRenderer::new(Some(dir.path().join("shots")));
        assert!(matches!(renderer.snapshot(), Err(SnapshotError::NothingToSave)));

        renderer.render(frame(3), &overlay(None));
        renderer.render(frame(4), &overlay(Some(25.0)));
        let path = renderer.snapshot().unwrap();

        assert_eq!(path.file_name().unwrap(), "snapshot_000004.png");
        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (8, 6));
        assert_eq!(saved.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_snapshot_without_directory() {
        let mut renderer = LogRenderer::new(None);
        renderer.render(frame(0), &overlay(None));
        assert!(matches!(renderer.snapshot(), Err(SnapshotError::NoDirectory)));
        assert_eq!(renderer.last_frame().map(|f| f.index), Some(0));
    }
}
