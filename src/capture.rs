// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Frame sources.
//!
//! A [`FrameSource`] is a pull-based, never-ending sequence of RGBA frames. The
//! caller decides when to ask for the next frame, so pacing and cancellation stay
//! in the session loop rather than in a background capture thread.
//!
//! Every session builds its own source through a [`SourceFactory`]; frames are
//! never shared between clients.
//!
//! # Sources
//!
//! - [`ScreenSource`]: captures a monitor (requires the `screen-capture` feature).
//! - [`SyntheticSource`]: generated test pattern, useful headless and in tests.

use std::sync::Arc;
use std::time::Instant;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::config::{DisplaySelection, StreamConfig};
use crate::error::{MjpegError, Result};

/// One captured screen image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA pixel data (4 bytes per pixel, row-major).
    pub data: Vec<u8>,
    /// Position of this frame in its source's sequence, starting at 0.
    pub sequence: u64,
    /// When the frame was captured.
    pub captured_at: Instant,
}

impl Frame {
    /// Wraps an RGBA image as a frame.
    pub fn from_image(image: RgbaImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Number of bytes a well-formed frame of this size holds.
    pub fn expected_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }
}

/// A never-ending, caller-paced sequence of frames.
pub trait FrameSource: Send {
    /// Captures the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`MjpegError::CaptureUnavailable`] when the display cannot be read.
    fn produce(&mut self) -> Result<Frame>;
}

/// Creates a fresh [`FrameSource`] for each new session.
pub type SourceFactory = Arc<dyn Fn(&StreamConfig) -> Result<Box<dyn FrameSource>> + Send + Sync>;

/// Factory producing [`ScreenSource`]s configured from the stream settings.
pub fn screen_source_factory() -> SourceFactory {
    Arc::new(|config: &StreamConfig| {
        let source = ScreenSource::new(config.display, config.target_size(), config.show_pointer);
        Ok(Box::new(source) as Box<dyn FrameSource>)
    })
}

/// Like [`screen_source_factory`], with a pointer locator attached to every source.
pub fn screen_source_factory_with_locator<F, L>(make_locator: F) -> SourceFactory
where
    F: Fn() -> L + Send + Sync + 'static,
    L: PointerLocator + 'static,
{
    Arc::new(move |config: &StreamConfig| {
        let source = ScreenSource::new(config.display, config.target_size(), config.show_pointer)
            .with_pointer_locator(make_locator());
        Ok(Box::new(source) as Box<dyn FrameSource>)
    })
}

/// Factory producing [`SyntheticSource`]s of the given native size.
pub fn synthetic_source_factory(width: u32, height: u32) -> SourceFactory {
    Arc::new(move |config: &StreamConfig| {
        let source = SyntheticSource::new(width, height)
            .with_target_size(config.target_size())
            .with_pointer(config.show_pointer);
        Ok(Box::new(source) as Box<dyn FrameSource>)
    })
}

/// Reports the pointer position in global desktop coordinates.
pub trait PointerLocator: Send {
    /// Current pointer position, or `None` if unknown.
    fn locate(&self) -> Option<(i32, i32)>;
}

impl<F> PointerLocator for F
where
    F: Fn() -> Option<(i32, i32)> + Send,
{
    fn locate(&self) -> Option<(i32, i32)> {
        self()
    }
}

/// Captures a monitor of the local display.
#[cfg_attr(not(feature = "screen-capture"), allow(dead_code))]
pub struct ScreenSource {
    display: DisplaySelection,
    target: Option<(u32, u32)>,
    show_pointer: bool,
    locator: Option<Box<dyn PointerLocator>>,
    sequence: u64,
}

impl ScreenSource {
    /// Creates a screen source.
    ///
    /// # Arguments
    ///
    /// * `display` - Monitor to capture
    /// * `target` - Output size; `None` keeps the native resolution
    /// * `show_pointer` - Draw the pointer when a locator is attached
    pub fn new(display: DisplaySelection, target: Option<(u32, u32)>, show_pointer: bool) -> Self {
        Self {
            display,
            target,
            show_pointer,
            locator: None,
            sequence: 0,
        }
    }

    /// Attaches the pointer position provider used for the overlay.
    pub fn with_pointer_locator(mut self, locator: impl PointerLocator + 'static) -> Self {
        self.locator = Some(Box::new(locator));
        self
    }

    #[cfg(feature = "screen-capture")]
    fn grab(&self) -> Result<RgbaImage> {
        use xcap::Monitor;

        // Enumerate per capture so an unplugged monitor never leaves a stale handle.
        let monitors =
            Monitor::all().map_err(|e| MjpegError::CaptureUnavailable(e.to_string()))?;

        let monitor = match self.display {
            DisplaySelection::Primary => {
                let primary = monitors
                    .iter()
                    .position(|m| m.is_primary().unwrap_or(false))
                    .unwrap_or(0);
                monitors.into_iter().nth(primary)
            }
            DisplaySelection::Index(index) => monitors.into_iter().nth(index),
        }
        .ok_or_else(|| MjpegError::CaptureUnavailable("no matching monitor".to_string()))?;

        let mut image = monitor
            .capture_image()
            .map_err(|e| MjpegError::CaptureUnavailable(e.to_string()))?;

        if self.show_pointer {
            if let Some((px, py)) = self.locator.as_ref().and_then(|l| l.locate()) {
                let origin_x = monitor.x().unwrap_or(0);
                let origin_y = monitor.y().unwrap_or(0);
                draw_pointer(&mut image, px - origin_x, py - origin_y);
            }
        }

        Ok(image)
    }

    #[cfg(not(feature = "screen-capture"))]
    fn grab(&self) -> Result<RgbaImage> {
        Err(MjpegError::CaptureUnavailable(
            "built without the `screen-capture` feature".to_string(),
        ))
    }
}

impl FrameSource for ScreenSource {
    fn produce(&mut self) -> Result<Frame> {
        let image = scale_to(self.grab()?, self.target);
        let frame = Frame::from_image(image, self.sequence);
        self.sequence += 1;
        Ok(frame)
    }
}

/// Generates an animated gradient instead of reading the display.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    target: Option<(u32, u32)>,
    show_pointer: bool,
    sequence: u64,
}

impl SyntheticSource {
    /// Creates a synthetic source with the given native size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            target: None,
            show_pointer: false,
            sequence: 0,
        }
    }

    /// Scales frames to `target` when set.
    pub fn with_target_size(mut self, target: Option<(u32, u32)>) -> Self {
        self.target = target;
        self
    }

    /// Draws a pointer that walks diagonally across the pattern.
    pub fn with_pointer(mut self, show: bool) -> Self {
        self.show_pointer = show;
        self
    }

    fn render(&self) -> Result<RgbaImage> {
        if self.width == 0 || self.height == 0 {
            return Err(MjpegError::CaptureUnavailable(format!(
                "synthetic display has no area ({}x{})",
                self.width, self.height
            )));
        }

        let frame = self.sequence as u32;
        let mut image = RgbaImage::from_fn(self.width, self.height, |x, y| {
            Rgba([
                (x.wrapping_add(frame) % 256) as u8,
                (y.wrapping_add(frame) % 256) as u8,
                ((frame / 2) % 256) as u8,
                255,
            ])
        });

        if self.show_pointer {
            let x = (frame % self.width) as i32;
            let y = (frame % self.height) as i32;
            draw_pointer(&mut image, x, y);
        }

        Ok(image)
    }
}

impl FrameSource for SyntheticSource {
    fn produce(&mut self) -> Result<Frame> {
        let image = scale_to(self.render()?, self.target);
        let frame = Frame::from_image(image, self.sequence);
        self.sequence += 1;
        Ok(frame)
    }
}

/// Resizes `image` to `target` if it differs from the native size.
fn scale_to(image: RgbaImage, target: Option<(u32, u32)>) -> RgbaImage {
    match target {
        Some((width, height)) if (width, height) != image.dimensions() => {
            imageops::resize(&image, width, height, FilterType::Triangle)
        }
        _ => image,
    }
}

// Classic arrow cursor: 'X' outline, 'o' fill.
const POINTER_GLYPH: [&str; 16] = [
    "X          ",
    "XX         ",
    "XoX        ",
    "XooX       ",
    "XoooX      ",
    "XooooX     ",
    "XoooooX    ",
    "XooooooX   ",
    "XoooooooX  ",
    "XooooooooX ",
    "XooooXXXXXX",
    "XooXooX    ",
    "XoX XooX   ",
    "XX  XooX   ",
    "X    XooX  ",
    "     XXX   ",
];

/// Draws the pointer glyph with its hotspot at (`x`, `y`), clipped to the image.
pub fn draw_pointer(image: &mut RgbaImage, x: i32, y: i32) {
    let (width, height) = image.dimensions();
    for (dy, row) in POINTER_GLYPH.iter().enumerate() {
        for (dx, cell) in row.bytes().enumerate() {
            let color = match cell {
                b'X' => Rgba([0, 0, 0, 255]),
                b'o' => Rgba([255, 255, 255, 255]),
                _ => continue,
            };
            let px = x + dx as i32;
            let py = y + dy as i32;
            if px >= 0 && py >= 0 && (px as u32) < width && (py as u32) < height {
                image.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}
