//! Controller configuration header
//!
//! Newer controller firmware does its own smoothing and brightness limiting
//! and expects the strip parameters once, right after the connection opens.
//! The header is 7 big-endian 32-bit fields. Pi and Arduino firmware read
//! the fields in opposite order.

use crate::types::TransportKind;

/// Size of the encoded header in bytes
pub const HEADER_LEN: usize = 4 * 7;

/// Strip parameters sent once after connect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerHeader {
    pub max_brightness: u32,
    pub led_count: u32,
    pub reduction: [f32; 3],
    pub lerp: f32,
    pub ups: u32,
}

impl ControllerHeader {
    /// Encode for the given controller class
    ///
    /// Pi: `max, count, r, g, b, lerp, ups`.
    /// Arduino: `ups, lerp, b, g, r, count, max`.
    pub fn encode(&self, kind: TransportKind) -> [u8; HEADER_LEN] {
        let [r, g, b] = self.reduction;
        let fields: [[u8; 4]; 7] = match kind {
            TransportKind::Tcp => [
                self.max_brightness.to_be_bytes(),
                self.led_count.to_be_bytes(),
                r.to_be_bytes(),
                g.to_be_bytes(),
                b.to_be_bytes(),
                self.lerp.to_be_bytes(),
                self.ups.to_be_bytes(),
            ],
            TransportKind::Serial => [
                self.ups.to_be_bytes(),
                self.lerp.to_be_bytes(),
                b.to_be_bytes(),
                g.to_be_bytes(),
                r.to_be_bytes(),
                self.led_count.to_be_bytes(),
                self.max_brightness.to_be_bytes(),
            ],
        };

        let mut out = [0u8; HEADER_LEN];
        for (chunk, field) in out.chunks_exact_mut(4).zip(fields.iter()) {
            chunk.copy_from_slice(field);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> ControllerHeader {
        ControllerHeader {
            max_brightness: 300,
            led_count: 60,
            reduction: [1.0, 0.5, 0.25],
            lerp: 0.5,
            ups: 30,
        }
    }

    #[test]
    fn test_pi_layout() {
        let bytes = header().encode(TransportKind::Tcp);
        assert_eq!(&bytes[0..4], &300u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &60u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &1.0f32.to_be_bytes());
        assert_eq!(&bytes[24..28], &30u32.to_be_bytes());
    }

    #[test]
    fn test_arduino_layout() {
        let bytes = header().encode(TransportKind::Serial);
        assert_eq!(&bytes[0..4], &30u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &0.5f32.to_be_bytes());
        assert_eq!(&bytes[8..12], &0.25f32.to_be_bytes());
        assert_eq!(&bytes[24..28], &300u32.to_be_bytes());
    }
}
