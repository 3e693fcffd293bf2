//! Per-strip color processing: reduction, temporal smoothing and the
//! brightness budget.

use crate::color::{Color, SharedColors};
use crate::config::StripConfig;

/// Highest possible R+G+B of one LED
pub const MAX_CHANNEL_SUM: u32 = 765;

/// Scale LED values so the average R+G+B stays within `max_brightness`.
///
/// `scale = min(1, max_brightness / max(1, average))`; every channel is
/// multiplied by `scale` and truncated, so nothing is ever amplified.
/// Returns `(average_before_scaling, scale)`.
pub fn apply_brightness_budget(leds: &mut [Color], max_brightness: u32) -> (f32, f32) {
    if leds.is_empty() {
        return (0.0, 1.0);
    }
    let total: u64 = leds.iter().map(|c| c.channel_sum() as u64).sum();
    let average = total as f32 / leds.len() as f32;

    let scale = (max_brightness as f32 / average.max(1.0)).min(1.0);
    if scale < 1.0 {
        for led in leds.iter_mut() {
            *led = led.scale(scale);
        }
    }
    (average, scale)
}

/// Smoothing and brightness state of one strip
///
/// `smoothed` is the state carried between ticks and survives pause/resume.
/// The brightness scale only touches the output frame, so dimming never
/// feeds back into the smoothing.
pub struct ColorPipeline {
    reduction: [f32; 3],
    lerp: f32,
    max_brightness: u32,
    raw: Vec<Color>,
    smoothed: Vec<Color>,
    frame: Vec<Color>,
}

impl ColorPipeline {
    pub fn new(leds: usize, reduction: [f32; 3], lerp: f32, max_brightness: u32) -> Self {
        Self {
            reduction,
            lerp: lerp.clamp(0.0, 1.0),
            max_brightness,
            raw: vec![Color::BLACK; leds],
            smoothed: vec![Color::BLACK; leds],
            frame: vec![Color::BLACK; leds],
        }
    }

    pub fn for_strip(strip: &StripConfig) -> Self {
        Self::new(strip.leds, strip.reduction(), strip.lerp, strip.max_brightness)
    }

    pub fn len(&self) -> usize {
        self.smoothed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.smoothed.is_empty()
    }

    /// Smoothed state (before the brightness budget)
    pub fn smoothed(&self) -> &[Color] {
        &self.smoothed
    }

    /// Run one update tick over the shared raw buffer and return the frame
    /// to send
    pub fn process(&mut self, raw: &SharedColors) -> &[Color] {
        raw.snapshot_into(&mut self.raw);

        for ((current, raw), out) in self
            .smoothed
            .iter_mut()
            .zip(&self.raw)
            .zip(self.frame.iter_mut())
        {
            let target = raw.reduce(self.reduction);
            *current = current.smooth_toward(target, self.lerp);
            *out = *current;
        }

        apply_brightness_budget(&mut self.frame, self.max_brightness);
        &self.frame
    }
}
