use std::{ops::Range, path::PathBuf, time::Duration};

use derive_more::From;
use parse_display::Display;
use serde_derive::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;
use thiserror::Error;
use validator::Validate;

mod backend;
pub use backend::*;

pub type Color = palette::rgb::LinSrgb<u8>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("strand {strand} (LEDs {start}..{end}) overlaps or leaves a gap before LED {expected}")]
    OverlappingStrands {
        strand: usize,
        start: usize,
        end: usize,
        expected: usize,
    },
    #[error("strand {strand} refers to display {display}, but only {available} are configured")]
    InvalidDisplayIndex {
        strand: usize,
        display: usize,
        available: usize,
    },
    #[error("the adalight header addresses 1 to 65536 LEDs, got {count}")]
    AdalightLedCount { count: usize },
}

/// Largest LED count the 16-bit adalight header can describe
pub const ADALIGHT_MAX_LEDS: usize = 1 << 16;

fn default_period_ms() -> u32 {
    33
}

fn default_failure_warning_threshold() -> u32 {
    10
}

fn default_hotplug_poll_ms() -> u32 {
    1000
}

fn default_baud_rate() -> u32 {
    115200
}

/// Binding of strands to one of the connected displays
///
/// Displays have no stable identity, so an assignment picks the `shown`-th
/// connected display (zero-based, in enumeration order) whose resolution is
/// `width` x `height`. If two displays share a resolution and get swapped
/// between sessions, the assignment follows the enumeration order, not the
/// physical screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DisplayAssignment {
    #[validate(range(min = 1))]
    pub width: u32,
    #[validate(range(min = 1))]
    pub height: u32,
    #[serde(default)]
    pub shown: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[display(style = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// Unit step along the traversal axis, as (dx, dy)
    pub fn step(&self) -> (i64, i64) {
        match self {
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
        }
    }
}

/// A physically contiguous run of LEDs mapped to one edge of one display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Strand {
    /// Index of the first LED of this strand on the wire
    pub id_min: u32,
    #[validate(range(min = 1))]
    pub count: u32,
    /// Index into [Config::displays]
    pub display: usize,
    pub start_x: u32,
    pub start_y: u32,
    pub direction: Direction,
    /// Side of the square sampled for each LED, in pixels
    #[validate(range(min = 1))]
    pub size: u32,
}

impl Strand {
    /// Global LED indices covered by this strand
    pub fn leds(&self) -> Range<usize> {
        let start = self.id_min as usize;
        start..(start + self.count as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    Rgb,
    Bgr,
    Rbg,
    Brg,
    Gbr,
    Grb,
}

impl ColorOrder {
    pub fn reorder_from_rgb(&self, color: Color) -> Color {
        let (r, g, b) = color.into_components();

        Color::from_components(match self {
            ColorOrder::Rgb => (r, g, b),
            ColorOrder::Bgr => (b, g, r),
            ColorOrder::Rbg => (r, b, g),
            ColorOrder::Brg => (b, r, g),
            ColorOrder::Gbr => (g, b, r),
            ColorOrder::Grb => (g, r, b),
        })
    }
}

impl Default for ColorOrder {
    fn default() -> Self {
        Self::Rgb
    }
}

/// Layout of the bytes sent to the microcontroller for each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[display(style = "lowercase")]
pub enum FrameFormat {
    /// Format v1: 3 bytes per LED, no header
    Raw,
    /// Adalight header followed by the raw payload
    Adalight,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::Raw
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct Frame {
    pub format: FrameFormat,
    pub color_order: ColorOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Serial {
    #[serde(default = "default_baud_rate")]
    #[validate(range(min = 1))]
    pub baud_rate: u32,
}

impl Default for Serial {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DummyMode {
    Text,
    Ansi,
}

impl Default for DummyMode {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Dummy {
    pub mode: DummyMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, From)]
#[serde(rename_all = "lowercase", tag = "type", deny_unknown_fields)]
pub enum Transport {
    Serial(Serial),
    Dummy(Dummy),
}

impl Default for Transport {
    fn default() -> Self {
        Self::Serial(Serial::default())
    }
}

impl Validate for Transport {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            Transport::Serial(serial) => serial.validate(),
            Transport::Dummy(dummy) => dummy.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum CaptureBackend {
    /// Live screen contents of the connected monitors
    Xcap,
    /// Each PNG file stands for one display; a missing file is a disconnected display
    Image { files: Vec<PathBuf> },
}

impl Default for CaptureBackend {
    fn default() -> Self {
        Self::Xcap
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Capture {
    /// Interval between two display list refreshes, for backends that poll
    #[serde(default = "default_hotplug_poll_ms")]
    #[validate(range(min = 10))]
    pub hotplug_poll_ms: u32,
    #[serde(flatten)]
    pub backend: CaptureBackend,
}

impl Capture {
    pub fn hotplug_poll(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_ms as _)
    }
}

impl Default for Capture {
    fn default() -> Self {
        Self {
            hotplug_poll_ms: default_hotplug_poll_ms(),
            backend: CaptureBackend::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Tick period of the update loop
    ///
    /// Also bounds every send. Display captures are bounded by
    /// `capture_timeout_ms` instead when it is set.
    #[serde(default = "default_period_ms")]
    #[validate(range(min = 1))]
    pub period_ms: u32,
    /// Time allowed for the captures of one tick, defaults to the tick period
    ///
    /// Large screens may take longer than a tick to capture; a capture which
    /// times out skips its strands for that tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub capture_timeout_ms: Option<u32>,
    /// Consecutive failed sends before a connectivity warning is raised
    #[serde(default = "default_failure_warning_threshold")]
    #[validate(range(min = 1))]
    pub failure_warning_threshold: u32,
    /// Name of the serial port, as listed by the transport
    pub port: String,
    #[serde(default)]
    #[validate(nested)]
    pub transport: Transport,
    #[serde(default)]
    #[validate(nested)]
    pub capture: Capture,
    #[serde(default)]
    #[validate(nested)]
    pub frame: Frame,
    #[serde(default)]
    #[validate(nested)]
    pub displays: Vec<DisplayAssignment>,
    #[serde(default)]
    #[validate(nested)]
    pub strands: Vec<Strand>,
}

impl Config {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms as _)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms.unwrap_or(self.period_ms) as _)
    }

    /// Size of the LED address space, i.e. the sum of all strand counts
    pub fn led_count(&self) -> usize {
        self.strands.iter().map(|strand| strand.count as usize).sum()
    }

    /// Validate field ranges and the strand tables
    ///
    /// Strand LED ranges must tile `0..led_count()` without overlap, and every
    /// strand must refer to a configured display assignment. The adalight
    /// format also needs an LED count its header can encode.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        for (strand_idx, strand) in self.strands.iter().enumerate() {
            if strand.display >= self.displays.len() {
                return Err(ConfigError::InvalidDisplayIndex {
                    strand: strand_idx,
                    display: strand.display,
                    available: self.displays.len(),
                });
            }
        }

        let mut order: Vec<_> = self.strands.iter().enumerate().collect();
        order.sort_by_key(|(_, strand)| strand.id_min);

        let mut expected = 0;
        for (strand_idx, strand) in order {
            let leds = strand.leds();
            if leds.start != expected {
                return Err(ConfigError::OverlappingStrands {
                    strand: strand_idx,
                    start: leds.start,
                    end: leds.end,
                    expected,
                });
            }

            expected = leds.end;
        }

        if self.frame.format == FrameFormat::Adalight {
            let count = self.led_count();
            if count == 0 || count > ADALIGHT_MAX_LEDS {
                return Err(ConfigError::AdalightLedCount { count });
            }
        }

        Ok(())
    }
}
