//! Screen capture backends
//!
//! A backend hands out one [`CaptureSession`] per screen region. Sessions are
//! driven from blocking worker threads: `sample()` may block on the
//! compositor and returns a borrowed view of the latest pixels for its region.
//!
//! - [`StaticCapture`]: a solid color, for dry runs and tests
//! - `PipewireCapture` (feature `screen-capture`): XDG ScreenCast portal + PipeWire

#[cfg(feature = "screen-capture")]
pub mod pipewire;

use crate::color::Color;
use crate::config::Segment;
use std::sync::Arc;
use thiserror::Error;

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture setup failed: {0}")]
    Setup(String),

    #[error("Capture failed: {0}")]
    Sample(String),

    #[error("Display {0} not available")]
    UnknownDisplay(u32),

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Capture backend unavailable: {0}")]
    Unavailable(String),
}

/// Byte order of one 4-byte pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// B, G, R, A/x (typical for desktop capture on Linux)
    Bgra,
    /// R, G, B, A/x
    Rgba,
}

impl PixelFormat {
    /// Split one pixel into (r, g, b)
    #[inline]
    pub fn rgb(self, px: &[u8]) -> (u8, u8, u8) {
        match self {
            PixelFormat::Bgra => (px[2], px[1], px[0]),
            PixelFormat::Rgba => (px[0], px[1], px[2]),
        }
    }
}

/// Borrowed pixels of one captured region
#[derive(Debug, Clone, Copy)]
pub struct PixelFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: usize,
    pub format: PixelFormat,
}

impl<'a> PixelFrame<'a> {
    /// Tightly packed frame (stride = width * 4)
    pub fn packed(data: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            stride: width as usize * 4,
            format,
        }
    }

    /// Check that `data` covers every row
    pub fn check(&self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Malformed(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        if self.stride < self.width as usize * 4 {
            return Err(CaptureError::Malformed(format!(
                "stride {} shorter than row of {} pixels",
                self.stride, self.width
            )));
        }
        let needed = self.stride * (self.height as usize - 1) + self.width as usize * 4;
        if self.data.len() < needed {
            return Err(CaptureError::Malformed(format!(
                "{} bytes for {}x{} (need {needed})",
                self.data.len(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let i = y as usize * self.stride + x as usize * 4;
        self.format.rgb(&self.data[i..i + 4])
    }
}

/// Screen rectangle a session captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRegion {
    pub display: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<&Segment> for CaptureRegion {
    fn from(s: &Segment) -> Self {
        Self {
            display: s.display,
            x: s.x,
            y: s.y,
            width: s.width,
            height: s.height,
        }
    }
}

/// Source of screen pixels
pub trait CaptureBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Allocate capture resources for one region
    fn setup(&self, region: &CaptureRegion) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// Capture resources for one region
pub trait CaptureSession: Send {
    /// Grab the current pixels of the region
    fn sample(&mut self) -> Result<PixelFrame<'_>, CaptureError>;

    /// Release the resources; called once after the last `sample()`
    fn free(self: Box<Self>) -> Result<(), CaptureError>;
}

pub type SharedBackend = Arc<dyn CaptureBackend>;

/// Backend that always shows one solid color
pub struct StaticCapture {
    color: Color,
    displays: u32,
}

impl StaticCapture {
    pub fn new(color: Color) -> Self {
        Self { color, displays: 1 }
    }

    /// Number of displays regions may refer to
    pub fn with_displays(mut self, displays: u32) -> Self {
        self.displays = displays;
        self
    }
}

impl CaptureBackend for StaticCapture {
    fn name(&self) -> &str {
        "static"
    }

    fn setup(&self, region: &CaptureRegion) -> Result<Box<dyn CaptureSession>, CaptureError> {
        if region.display >= self.displays {
            return Err(CaptureError::UnknownDisplay(region.display));
        }
        if region.width == 0 || region.height == 0 {
            return Err(CaptureError::Setup(format!(
                "empty region {}x{}",
                region.width, region.height
            )));
        }

        let pixel = [self.color.b(), self.color.g(), self.color.r(), 0xFF];
        let count = region.width as usize * region.height as usize;
        Ok(Box::new(StaticSession {
            data: pixel.repeat(count),
            width: region.width,
            height: region.height,
        }))
    }
}

struct StaticSession {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl CaptureSession for StaticSession {
    fn sample(&mut self) -> Result<PixelFrame<'_>, CaptureError> {
        Ok(PixelFrame::packed(
            &self.data,
            self.width,
            self.height,
            PixelFormat::Bgra,
        ))
    }

    fn free(self: Box<Self>) -> Result<(), CaptureError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(display: u32, width: u32, height: u32) -> CaptureRegion {
        CaptureRegion {
            display,
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    #[test]
    fn test_pixel_format() {
        let px = [1, 2, 3, 4];
        assert_eq!(PixelFormat::Bgra.rgb(&px), (3, 2, 1));
        assert_eq!(PixelFormat::Rgba.rgb(&px), (1, 2, 3));
    }

    #[test]
    fn test_static_capture() {
        let backend = StaticCapture::new(Color::rgb(10, 20, 30));
        let mut session = backend.setup(&region(0, 4, 2)).unwrap();
        let frame = session.sample().unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        frame.check().unwrap();
        assert_eq!(frame.pixel(3, 1), (10, 20, 30));
        session.free().unwrap();
    }

    #[test]
    fn test_static_unknown_display() {
        let backend = StaticCapture::new(Color::BLACK);
        assert!(matches!(
            backend.setup(&region(1, 4, 4)),
            Err(CaptureError::UnknownDisplay(1))
        ));
        assert!(StaticCapture::new(Color::BLACK)
            .with_displays(2)
            .setup(&region(1, 4, 4))
            .is_ok());
    }

    #[test]
    fn test_frame_check() {
        let data = [0u8; 15];
        assert!(PixelFrame::packed(&data, 2, 2, PixelFormat::Rgba).check().is_err());
        let data = [0u8; 16];
        assert!(PixelFrame::packed(&data, 2, 2, PixelFormat::Rgba).check().is_ok());

        // Padded rows: last row only needs width * 4 bytes
        let padded = PixelFrame {
            data: &[0u8; 20],
            width: 2,
            height: 2,
            stride: 12,
            format: PixelFormat::Rgba,
        };
        assert!(padded.check().is_ok());
    }
}
