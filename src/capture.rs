//! Frame sources.
//!
//! The control loop only talks to the `Capture` trait. Two sources are
//! provided: an animated test pattern standing in for a V4L2 camera, and a
//! finite sequence of still images read from a directory.

use crate::error::CaptureError;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A decoded frame travelling through one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position of the frame in its source.
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Outcome of a grab request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grab {
    /// A frame is ready to be retrieved.
    Ready,
    /// A finite source has no more frames.
    EndOfStream,
}

/// Capture collaborator driven by the control loop.
pub trait Capture {
    /// Open the underlying device or file.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Reconfigure the size of the frames produced from now on.
    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CaptureError>;

    /// Advance to the next frame.
    fn grab(&mut self) -> Result<Grab, CaptureError>;

    /// Decode the frame selected by the last successful `grab`.
    fn retrieve(&mut self) -> Result<Frame, CaptureError>;

    /// Display name of the source, such as `CAM00`.
    fn name(&self) -> &str;
}

impl<C: Capture + ?Sized> Capture for Box<C> {
    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        (**self).set_resolution(width, height)
    }

    fn grab(&mut self) -> Result<Grab, CaptureError> {
        (**self).grab()
    }

    fn retrieve(&mut self) -> Result<Frame, CaptureError> {
        (**self).retrieve()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Camera stand-in, or the image sequence when `input` is set.
pub fn open_source(camera_id: u8, input: Option<&Path>) -> Box<dyn Capture + Send> {
    match input {
        Some(dir) => Box::new(ImageSequence::new(dir)),
        None => Box::new(SyntheticCamera::new(camera_id)),
    }
}

/// Animated test pattern at the requested resolution.
pub struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    opened: bool,
    grabbed: bool,
    next_index: u64,
}

impl SyntheticCamera {
    pub fn new(camera_id: u8) -> Self {
        Self {
            name: format!("CAM{:02}", camera_id),
            width: 640,
            height: 480,
            opened: false,
            grabbed: false,
            next_index: 0,
        }
    }

    fn pattern(&self, index: u64) -> RgbImage {
        let shift = (index % 256) as u32;
        let (width, height) = (self.width, self.height);
        // Moving diagonal gradient with a bright bar sweeping horizontally.
        let bar = (index.wrapping_mul(4) % u64::from(width.max(1))) as u32;
        RgbImage::from_fn(width, height, |x, y| {
            if x >= bar && x < bar + 8 {
                return Rgb([255, 255, 255]);
            }
            let r = ((x * 255 / width.max(1)) + shift) % 256;
            let g = ((y * 255 / height.max(1)) + shift) % 256;
            let b = ((x + y) / 4 + shift) % 256;
            Rgb([r as u8, g as u8, b as u8])
        })
    }
}

impl Capture for SyntheticCamera {
    fn open(&mut self) -> Result<(), CaptureError> {
        info!("Opening synthetic camera [{}]...", self.name);
        self.opened = true;
        Ok(())
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        if width == 0 || height == 0 {
            return Err(CaptureError::ResolutionRejected {
                source_name: self.name.clone(),
                width,
                height,
            });
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn grab(&mut self) -> Result<Grab, CaptureError> {
        if !self.opened {
            return Err(CaptureError::NotOpened(self.name.clone()));
        }
        self.grabbed = true;
        Ok(Grab::Ready)
    }

    fn retrieve(&mut self) -> Result<Frame, CaptureError> {
        if !self.grabbed {
            return Err(CaptureError::RetrieveFailed(self.name.clone()));
        }
        self.grabbed = false;
        let index = self.next_index;
        self.next_index += 1;
        Ok(Frame {
            index,
            image: self.pattern(index),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Extensions accepted by `ImageSequence`.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Finite source made of the still images in a directory, in name order.
pub struct ImageSequence {
    dir: PathBuf,
    name: String,
    files: Vec<PathBuf>,
    position: usize,
    current: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    opened: bool,
}

impl ImageSequence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| dir.display().to_string());
        Self {
            dir,
            name,
            files: Vec::new(),
            position: 0,
            current: None,
            width: None,
            height: None,
            opened: false,
        }
    }

    /// Number of frames found by `open`.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn list_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Capture for ImageSequence {
    fn open(&mut self) -> Result<(), CaptureError> {
        info!("Opening image sequence [{}]...", self.dir.display());
        let files = Self::list_frames(&self.dir).map_err(|e| CaptureError::OpenFailed {
            source_name: self.dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if files.is_empty() {
            return Err(CaptureError::OpenFailed {
                source_name: self.dir.display().to_string(),
                reason: "no png/jpeg frames found".to_string(),
            });
        }
        debug!("Found {} frames in {}", files.len(), self.dir.display());
        self.files = files;
        self.position = 0;
        self.opened = true;
        Ok(())
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        if width == 0 || height == 0 {
            return Err(CaptureError::ResolutionRejected {
                source_name: self.name.clone(),
                width,
                height,
            });
        }
        self.width = Some(width);
        self.height = Some(height);
        Ok(())
    }

    fn grab(&mut self) -> Result<Grab, CaptureError> {
        if !self.opened {
            return Err(CaptureError::NotOpened(self.name.clone()));
        }
        match self.files.get(self.position) {
            Some(path) if !path.is_file() => {
                self.current = None;
                Err(CaptureError::GrabFailed(path.display().to_string()))
            }
            Some(path) => {
                self.current = Some(path.clone());
                self.position += 1;
                Ok(Grab::Ready)
            }
            None => {
                self.current = None;
                Ok(Grab::EndOfStream)
            }
        }
    }

    fn retrieve(&mut self) -> Result<Frame, CaptureError> {
        let path = self
            .current
            .take()
            .ok_or_else(|| CaptureError::RetrieveFailed(self.name.clone()))?;
        let decoded = image::open(&path).map_err(|source| CaptureError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        let mut image = decoded.to_rgb8();
        if let (Some(width), Some(height)) = (self.width, self.height) {
            if image.width() != width || image.height() != height {
                image = image::imageops::resize(&image, width, height, FilterType::Triangle);
            }
        }
        Ok(Frame {
            index: (self.position - 1) as u64,
            image,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
