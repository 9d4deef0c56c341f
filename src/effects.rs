//! Frame effects.
//!
//! Effects are pure frame transforms looked up by `EffectKind`. The
//! controller only cares whether the selected effect is the baseline.

use crate::capture::Frame;
use crate::error::EffectError;
use image::imageops;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Laplacian kernel used by the edges effect.
const EDGE_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];

/// Intensity difference for the corner segment test.
const CORNER_THRESHOLD: i16 = 24;

/// Contiguous circle pixels required to call a corner (FAST-9).
const CORNER_ARC: usize = 9;

/// Gaussian sigma of the blur effect.
const BLUR_SIGMA: f32 = 2.5;

/// Bresenham circle of radius 3 around the candidate pixel.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

type Transform = fn(&RgbImage) -> RgbImage;

/// Effect selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    /// No processing, frames are shown as captured.
    #[default]
    None,
    /// Laplacian edge map.
    Edges,
    /// Corner markers from a segment test.
    Corners,
    /// Gaussian blur.
    Blur,
}

/// Lookup table of transforms, indexed by `EffectKind as usize`.
static EFFECTS: [(EffectKind, &str, Option<Transform>); 4] = [
    (EffectKind::None, "none", None),
    (EffectKind::Edges, "edges", Some(edges)),
    (EffectKind::Corners, "corners", Some(corners)),
    (EffectKind::Blur, "blur", Some(blur)),
];

impl EffectKind {
    /// All effects in selector order.
    pub const ALL: [EffectKind; 4] = [
        EffectKind::None,
        EffectKind::Edges,
        EffectKind::Corners,
        EffectKind::Blur,
    ];

    /// True when no optional processing is enabled.
    pub fn is_baseline(self) -> bool {
        self == EffectKind::None
    }

    pub fn name(self) -> &'static str {
        EFFECTS[self as usize].1
    }

    /// Select an effect by its numeric selector.
    pub fn from_index(index: u8) -> Result<Self, EffectError> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or_else(|| EffectError::Unknown(index.to_string()))
    }

    /// Apply the transform to a frame, passing baseline frames through.
    pub fn apply(self, frame: Frame) -> Frame {
        match EFFECTS[self as usize].2 {
            Some(transform) => Frame {
                index: frame.index,
                image: transform(&frame.image),
            },
            None => frame,
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectKind {
    type Err = EffectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(EffectKind::None),
            "edges" | "canny" => Ok(EffectKind::Edges),
            "corners" | "fast" => Ok(EffectKind::Corners),
            "blur" => Ok(EffectKind::Blur),
            other => match other.parse::<u8>() {
                Ok(index) => Self::from_index(index),
                Err(_) => Err(EffectError::Unknown(s.to_string())),
            },
        }
    }
}

/// Selector as it may appear in a config file.
#[derive(Deserialize)]
#[serde(untagged)]
enum Selector {
    Name(String),
    Index(u64),
}

/// Accepts the same names and indices as `FromStr`. Unknown selectors
/// degrade to `None`.
impl<'de> Deserialize<'de> for EffectKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = match Selector::deserialize(deserializer)? {
            Selector::Name(name) => name.parse(),
            Selector::Index(index) => u8::try_from(index)
                .map_err(|_| EffectError::Unknown(index.to_string()))
                .and_then(Self::from_index),
        };
        Ok(parsed.unwrap_or_else(|e| {
            warn!("{}, falling back to none", e);
            EffectKind::None
        }))
    }
}

fn edges(image: &RgbImage) -> RgbImage {
    let gray = imageops::grayscale(image);
    let edges: GrayImage = imageops::filter3x3(&gray, &EDGE_KERNEL);
    DynamicImage::ImageLuma8(edges).to_rgb8()
}

fn blur(image: &RgbImage) -> RgbImage {
    imageops::blur(image, BLUR_SIGMA)
}

fn corners(image: &RgbImage) -> RgbImage {
    let gray = imageops::grayscale(image);
    let mut out = image.clone();
    for (x, y) in detect_corners(&gray) {
        mark(&mut out, x, y);
    }
    out
}

/// Segment test: a pixel is a corner when `CORNER_ARC` contiguous circle
/// pixels are all brighter or all darker than it by the threshold.
pub fn detect_corners(gray: &GrayImage) -> Vec<(u32, u32)> {
    let (width, height) = gray.dimensions();
    let mut found = Vec::new();
    if width < 7 || height < 7 {
        return found;
    }

    for y in 3..height - 3 {
        for x in 3..width - 3 {
            let center = gray.get_pixel(x, y)[0] as i16;
            let mut ring = [0i8; 16];
            for (slot, (dx, dy)) in ring.iter_mut().zip(CIRCLE.iter()) {
                let px = (x as i32 + dx) as u32;
                let py = (y as i32 + dy) as u32;
                let value = gray.get_pixel(px, py)[0] as i16;
                *slot = if value > center + CORNER_THRESHOLD {
                    1
                } else if value < center - CORNER_THRESHOLD {
                    -1
                } else {
                    0
                };
            }
            if has_arc(&ring, 1) || has_arc(&ring, -1) {
                found.push((x, y));
            }
        }
    }
    found
}

fn has_arc(ring: &[i8; 16], sign: i8) -> bool {
    let mut run = 0;
    // Walk the ring twice so arcs wrapping past index 0 are counted.
    for i in 0..32 {
        if ring[i % 16] == sign {
            run += 1;
            if run >= CORNER_ARC {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn mark(image: &mut RgbImage, x: u32, y: u32) {
    let red = Rgb([255, 0, 0]);
    let (width, height) = image.dimensions();
    for d in 0..=2u32 {
        if x + d < width {
            image.put_pixel(x + d, y, red);
        }
        if x >= d {
            image.put_pixel(x - d, y, red);
        }
        if y + d < height {
            image.put_pixel(x, y + d, red);
        }
        if y >= d {
            image.put_pixel(x, y - d, red);
        }
    }
}
