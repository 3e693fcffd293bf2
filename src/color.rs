// Color value type and shared color buffers

use std::sync::atomic::{AtomicU32, Ordering};

/// Packed 24-bit RGB color (`0x00RRGGBB`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color(u32);

impl Color {
    pub const BLACK: Color = Color(0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    /// Build from a packed value, ignoring anything above bit 23
    pub const fn from_packed(value: u32) -> Self {
        Color(value & 0x00FF_FFFF)
    }

    pub const fn packed(self) -> u32 {
        self.0
    }

    pub const fn r(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn g(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn b(self) -> u8 {
        self.0 as u8
    }

    /// Sum of all three channels (0..=765)
    pub const fn channel_sum(self) -> u32 {
        self.r() as u32 + self.g() as u32 + self.b() as u32
    }

    /// Multiply every channel by `factor`, truncating
    pub fn scale(self, factor: f32) -> Self {
        self.reduce([factor; 3])
    }

    /// Multiply each channel by its own factor, truncating
    pub fn reduce(self, [fr, fg, fb]: [f32; 3]) -> Self {
        Color::rgb(
            (self.r() as f32 * fr) as u8,
            (self.g() as f32 * fg) as u8,
            (self.b() as f32 * fb) as u8,
        )
    }

    /// One smoothing step from `self` toward `target`
    ///
    /// `target + (self - target) * t` per channel, truncated toward the
    /// target. `t = 0` jumps to the target, `t = 1` never moves.
    pub fn smooth_toward(self, target: Color, t: f32) -> Self {
        fn channel(current: u8, target: u8, t: f32) -> u8 {
            let delta = current as i32 - target as i32;
            (target as i32 + (delta as f32 * t) as i32) as u8
        }

        Color::rgb(
            channel(self.r(), target.r(), t),
            channel(self.g(), target.g(), t),
            channel(self.b(), target.b(), t),
        )
    }

    /// Append the wire representation (R, G, B)
    pub fn write_rgb(self, out: &mut [u8]) {
        out[0] = self.r();
        out[1] = self.g();
        out[2] = self.b();
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Color::rgb(r, g, b)
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:06X}", self.0)
    }
}

/// Fixed-size color buffer shared between sampler tasks and the update task
///
/// Each cell holds one packed color, so a reader never sees a half-written
/// LED. Cells are independent: a reader may see some LEDs from a newer
/// sample than others, which is fine for visible output.
pub struct SharedColors {
    cells: Box<[AtomicU32]>,
}

impl SharedColors {
    /// Allocate `len` black cells
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn load(&self, index: usize) -> Color {
        Color::from_packed(self.cells[index].load(Ordering::Relaxed))
    }

    pub fn store(&self, index: usize, color: Color) {
        self.cells[index].store(color.packed(), Ordering::Relaxed);
    }

    /// Copy the whole buffer into `out` (lengths must match)
    pub fn snapshot_into(&self, out: &mut [Color]) {
        for (dst, cell) in out.iter_mut().zip(self.cells.iter()) {
            *dst = Color::from_packed(cell.load(Ordering::Relaxed));
        }
    }
}

impl std::fmt::Debug for SharedColors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedColors")
            .field("len", &self.cells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        let c = Color::rgb(0x12, 0x34, 0x56);
        assert_eq!(c.packed(), 0x123456);
        assert_eq!((c.r(), c.g(), c.b()), (0x12, 0x34, 0x56));
        assert_eq!(c.channel_sum(), 0x12 + 0x34 + 0x56);
        assert_eq!(Color::from_packed(0xFF12_3456), c);
        assert_eq!(c.to_string(), "#123456");
    }

    #[test]
    fn test_reduce_truncates() {
        let c = Color::rgb(255, 101, 10).reduce([1.0, 0.5, 0.25]);
        assert_eq!(c, Color::rgb(255, 50, 2));
    }

    #[test]
    fn test_smooth_endpoints() {
        let from = Color::rgb(200, 100, 0);
        let to = Color::rgb(0, 100, 200);
        assert_eq!(from.smooth_toward(to, 0.0), to);
        assert_eq!(from.smooth_toward(to, 1.0), from);
        assert_eq!(from.smooth_toward(to, 0.5), Color::rgb(100, 100, 100));
    }

    #[test]
    fn test_smooth_converges_without_overshoot() {
        let target = Color::rgb(200, 7, 90);
        let mut current = Color::rgb(0, 255, 90);
        let mut prev_dist = u32::MAX;

        for _ in 0..32 {
            current = current.smooth_toward(target, 0.5);
            assert!(current.r() <= target.r());
            assert!(current.g() >= target.g());
            let dist = (target.r() - current.r()) as u32 + (current.g() - target.g()) as u32;
            assert!(dist <= prev_dist);
            prev_dist = dist;
        }
        assert_eq!(current, target);
    }

    #[test]
    fn test_shared_colors_snapshot() {
        let shared = SharedColors::new(3);
        shared.store(1, Color::rgb(1, 2, 3));

        let mut out = [Color::rgb(9, 9, 9); 3];
        shared.snapshot_into(&mut out);
        assert_eq!(out, [Color::BLACK, Color::rgb(1, 2, 3), Color::BLACK]);
        assert_eq!(shared.load(1), Color::rgb(1, 2, 3));
    }
}
