use std::fmt;

use serde::{Deserialize, Serialize};

/// 24-bit color as consumed by the device controller.
///
/// The packed form is `R | G << 8 | B << 16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const BLACK: RgbColor = RgbColor::new(0, 0, 0);
    pub const WHITE: RgbColor = RgbColor::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn to_packed(self) -> u32 {
        self.r as u32 | (self.g as u32) << 8 | (self.b as u32) << 16
    }

    pub const fn from_packed(value: u32) -> Self {
        Self {
            r: (value & 0xFF) as u8,
            g: ((value >> 8) & 0xFF) as u8,
            b: ((value >> 16) & 0xFF) as u8,
        }
    }

    pub fn is_black(self) -> bool {
        self == Self::BLACK
    }

    /// Multiplies every channel by `factor`, clamped to `[0, 1]`.
    pub fn scaled(self, factor: f32) -> Self {
        let factor = if factor.is_finite() {
            factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            r: scale_channel(self.r, factor),
            g: scale_channel(self.g, factor),
            b: scale_channel(self.b, factor),
        }
    }

    /// Linear blend towards `other`; `t = 0` returns `self`.
    pub fn lerp(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Self {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
        }
    }

    /// Fully saturated color for a hue in degrees.
    pub fn from_hue(hue: f32) -> Self {
        let hue = hue.rem_euclid(360.0);
        let sector = hue / 60.0;
        let x = 1.0 - (sector % 2.0 - 1.0).abs();
        let (r, g, b) = match sector as u32 {
            0 => (1.0, x, 0.0),
            1 => (x, 1.0, 0.0),
            2 => (0.0, 1.0, x),
            3 => (0.0, x, 1.0),
            4 => (x, 0.0, 1.0),
            _ => (1.0, 0.0, x),
        };
        Self {
            r: (r * 255.0_f32).round() as u8,
            g: (g * 255.0_f32).round() as u8,
            b: (b * 255.0_f32).round() as u8,
        }
    }
}

impl From<u32> for RgbColor {
    fn from(value: u32) -> Self {
        Self::from_packed(value)
    }
}

impl From<RgbColor> for u32 {
    fn from(value: RgbColor) -> Self {
        value.to_packed()
    }
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Samples a palette as an evenly spaced gradient.
pub fn sample_palette(colors: &[RgbColor], t: f32) -> RgbColor {
    match colors {
        [] => RgbColor::WHITE,
        [single] => *single,
        _ => {
            let t = t.clamp(0.0, 1.0) * (colors.len() - 1) as f32;
            let index = (t.floor() as usize).min(colors.len() - 2);
            colors[index].lerp(colors[index + 1], t - index as f32)
        }
    }
}

fn scale_channel(value: u8, factor: f32) -> u8 {
    (value as f32 * factor).round().clamp(0.0, 255.0) as u8
}

/// Serde adapter storing a color as its packed integer.
pub(crate) mod packed {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::RgbColor;

    pub fn serialize<S: Serializer>(color: &RgbColor, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(color.to_packed())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RgbColor, D::Error> {
        Ok(RgbColor::from_packed(u32::deserialize(deserializer)?))
    }
}
