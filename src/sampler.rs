//! Segment sampling
//!
//! Reduces one captured region to one color per LED. The region is cut into
//! `length` equal slices along the segment's orientation; each slice is
//! averaged on a `steps`-pixel grid.

use crate::capture::{CaptureError, PixelFrame};
use crate::color::{Color, SharedColors};
use crate::config::Segment;

/// Integer-truncated mean of a rectangle, sampling every `step`-th pixel
///
/// The rectangle is clipped to the frame and always yields at least one
/// sample at its (clamped) origin.
pub fn average_region(frame: &PixelFrame<'_>, x: u32, y: u32, w: u32, h: u32, step: u32) -> Color {
    let step = step.max(1) as usize;
    let x0 = x.min(frame.width - 1);
    let y0 = y.min(frame.height - 1);
    let x1 = x.saturating_add(w.max(1)).min(frame.width).max(x0 + 1);
    let y1 = y.saturating_add(h.max(1)).min(frame.height).max(y0 + 1);

    let (mut r_sum, mut g_sum, mut b_sum, mut count) = (0u64, 0u64, 0u64, 0u64);
    for py in (y0..y1).step_by(step) {
        for px in (x0..x1).step_by(step) {
            let (r, g, b) = frame.pixel(px, py);
            r_sum += r as u64;
            g_sum += g as u64;
            b_sum += b as u64;
            count += 1;
        }
    }

    Color::rgb(
        (r_sum / count) as u8,
        (g_sum / count) as u8,
        (b_sum / count) as u8,
    )
}

/// Write one color per LED of `segment` into `out`
///
/// `frame` holds exactly the segment's capture region. With `invert` the
/// first slice lands on the last LED of the segment.
pub fn sample_segment(
    frame: &PixelFrame<'_>,
    segment: &Segment,
    out: &SharedColors,
) -> Result<(), CaptureError> {
    frame.check()?;
    if !segment.fits(out.len()) {
        return Err(CaptureError::Malformed(format!(
            "segment LEDs {:?} exceed buffer of {}",
            segment.range(),
            out.len()
        )));
    }

    let len = segment.length as u32;
    if len == 0 {
        return Ok(());
    }
    let extent = if segment.orientation {
        frame.width
    } else {
        frame.height
    };
    // Thinner than one pixel per LED: one pixel wide slices, clamped to the frame
    let per_led = (extent / len).max(1);

    for i in 0..len {
        let start = i * per_led;
        let color = if segment.orientation {
            average_region(frame, start, 0, per_led, frame.height, segment.steps)
        } else {
            average_region(frame, 0, start, frame.width, per_led, segment.steps)
        };

        let led = if segment.invert { len - 1 - i } else { i };
        out.store(segment.offset + led as usize, color);
    }
    Ok(())
}
