//! Immutable camera frames.
//!
//! A `Frame` is created by a vehicle session on each poll, read by perception and
//! display, then dropped. Nothing retains frames across loop iterations.
//!
//! - Pixel layout is packed RGB8, row-major, top-left origin.
//! - There is no API that hands out mutable access to the pixel buffer.
//! - Derived frames (annotated, scaled) keep the capture instant of their source.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::time::{Duration, Instant};

/// Channels per pixel for every frame in this crate.
pub const RGB_CHANNELS: usize = 3;

/// Opaque RGB frame. Not `Clone`: derived frames are built explicitly.
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: Instant,
}

impl Frame {
    /// Wrap a packed RGB8 buffer captured now.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::with_capture_instant(data, width, height, Instant::now())
    }

    /// Wrap a packed BGR8 buffer (AirSim scene images), swapping to RGB.
    pub fn from_bgr(mut data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        for px in data.chunks_exact_mut(RGB_CHANNELS) {
            px.swap(0, 2);
        }
        Self::from_rgb(data, width, height)
    }

    /// Solid-colour frame. Used for placeholders and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = expected_len(width, height)?;
        let data = rgb.iter().copied().cycle().take(len).collect();
        Self::from_rgb(data, width, height)
    }

    pub(crate) fn with_capture_instant(
        data: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: Instant,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero ({}x{})", width, height));
        }
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read-only pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// RGB sample at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Copy into an `image` buffer for drawing or resampling.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Dimensions and length were validated at construction.
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
            image::Rgb([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
        })
    }

    /// Build a frame from an `image` buffer, inheriting this frame's capture instant.
    pub fn derive_from_image(&self, img: RgbImage) -> Result<Frame> {
        let (width, height) = img.dimensions();
        Frame::with_capture_instant(img.into_raw(), width, height, self.captured_at)
    }

    /// Bilinear magnification (or reduction) by `factor` on both axes.
    pub fn scaled(&self, factor: f32) -> Result<Frame> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(anyhow!("scale factor must be positive, got {}", factor));
        }
        let width = ((self.width as f32 * factor).round() as u32).max(1);
        let height = ((self.height as f32 * factor).round() as u32).max(1);
        if width == self.width && height == self.height {
            return Frame::with_capture_instant(
                self.data.clone(),
                width,
                height,
                self.captured_at,
            );
        }
        let resized = imageops::resize(&self.to_rgb_image(), width, height, FilterType::Triangle);
        self.derive_from_image(resized)
    }

    /// Packed 0RGB `u32` pixels, the layout desktop framebuffers expect.
    pub fn to_argb(&self) -> Vec<u32> {
        self.data
            .chunks_exact(RGB_CHANNELS)
            .map(|px| ((px[0] as u32) << 16) | ((px[1] as u32) << 8) | px[2] as u32)
            .collect()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is deliberately left out of debug output.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("age", &self.age())
            .finish()
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
