use std::fmt;
use std::str::FromStr;

/// File signature, the first four bytes of every binary.
pub const MAGIC: &[u8; 4] = b"AMBI";

/// Per-LED color layout carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedFormat {
    Rgb,
    Rgbw,
}

impl LedFormat {
    #[must_use]
    pub fn bytes_per_led(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgbw => 4,
        }
    }

    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Rgb => 0,
            Self::Rgbw => 1,
        }
    }

    /// Decode the header byte. Unknown values are not an error at this
    /// layer; callers that care reject `None`.
    #[must_use]
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Rgb),
            1 => Some(Self::Rgbw),
            _ => None,
        }
    }
}

impl fmt::Display for LedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb => write!(f, "rgb"),
            Self::Rgbw => write!(f, "rgbw"),
        }
    }
}

impl FromStr for LedFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgb" => Ok(Self::Rgb),
            "rgbw" => Ok(Self::Rgbw),
            other => Err(format!("unknown LED format '{other}' (expected rgb or rgbw)")),
        }
    }
}

/// Parsed file header.
///
/// `offset` is the strip's rotational offset: how many LED positions,
/// counter-clockwise, separate physical LED 0 from the top-right corner.
/// It is recorded so a reader can tell how the payloads were rotated; the
/// payload bytes themselves are already in physical order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub fps: f32,
    pub led_count: u16,
    pub format: LedFormat,
    pub offset: u16,
}

impl Header {
    #[must_use]
    pub fn new(fps: f32, led_count: u16, format: LedFormat, offset: u16) -> Self {
        Self {
            fps,
            led_count,
            format,
            offset,
        }
    }

    /// Expected payload size of every record in the file.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        usize::from(self.led_count) * self.format.bytes_per_led()
    }
}
