//! Wire encoding of LED colors
//!
//! The payload is 3 bytes per LED, in ascending global LED index order over
//! the whole configured address space. Its length never depends on which
//! strands were sampled during a tick.

use crate::models::{self, Color, ColorOrder, FrameFormat};

pub const BYTES_PER_LED: usize = 3;

const ADALIGHT_MAGIC: [u8; 3] = *b"Ada";
const ADALIGHT_HEADER_LEN: usize = 6;

fn header_len(format: FrameFormat) -> usize {
    match format {
        FrameFormat::Raw => 0,
        FrameFormat::Adalight => ADALIGHT_HEADER_LEN,
    }
}

/// Colors computed for one tick, as (global LED index, color) pairs
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Frame {
    entries: Vec<(usize, Color)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the colors of a strand starting at LED `id_min`
    pub fn push_strand(&mut self, id_min: usize, colors: impl IntoIterator<Item = Color>) {
        self.entries.extend(
            colors
                .into_iter()
                .enumerate()
                .map(|(i, color)| (id_min + i, color)),
        );
    }

    pub fn entries(&self) -> &[(usize, Color)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Encoder holding the last known color of every LED
pub struct FrameEncoder {
    format: FrameFormat,
    color_order: ColorOrder,
    leds: Vec<Color>,
    buf: Vec<u8>,
    notified_out_of_range: bool,
}

impl FrameEncoder {
    pub fn new(led_count: usize, config: &models::Frame) -> Self {
        Self {
            format: config.format,
            color_order: config.color_order,
            leds: vec![Color::default(); led_count],
            buf: Vec::with_capacity(header_len(config.format) + led_count * BYTES_PER_LED),
            notified_out_of_range: false,
        }
    }

    pub fn led_count(&self) -> usize {
        self.leds.len()
    }

    /// Last known color of every LED
    pub fn leds(&self) -> &[Color] {
        &self.leds
    }

    /// Length of every encoded frame
    pub fn frame_len(&self) -> usize {
        header_len(self.format) + self.leds.len() * BYTES_PER_LED
    }

    /// Encode `frame` on top of the last known colors
    ///
    /// LEDs missing from `frame` keep their previous value, black if they
    /// never had one.
    pub fn encode(&mut self, frame: &Frame) -> &[u8] {
        for &(idx, color) in frame.entries() {
            if let Some(led) = self.leds.get_mut(idx) {
                *led = color;
            } else if !self.notified_out_of_range {
                self.notified_out_of_range = true;
                warn!(led = %idx, led_count = %self.leds.len(), "LED index out of range");
            }
        }

        self.buf.clear();

        if self.format == FrameFormat::Adalight {
            let count = self.leds.len().saturating_sub(1);
            let hi = (count >> 8) as u8;
            let lo = (count & 0xFF) as u8;

            self.buf.extend_from_slice(&ADALIGHT_MAGIC);
            self.buf.extend_from_slice(&[hi, lo, hi ^ lo ^ 0x55]);
        }

        for led in &self.leds {
            let (r, g, b) = self.color_order.reorder_from_rgb(*led).into_components();
            self.buf.extend_from_slice(&[r, g, b]);
        }

        &self.buf
    }
}
