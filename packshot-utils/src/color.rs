//! Color values used for canvas backgrounds and letterbox padding.

use image::Rgba;
use serde::{Deserialize, Serialize};

/// Simple RGBA color stored in 8-bit channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct RgbaColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl RgbaColor {
    pub const WHITE: Self = Self::opaque(255, 255, 255);
    pub const BLACK: Self = Self::opaque(0, 0, 0);
    pub const TRANSPARENT: Self = Self {
        red: 0,
        green: 0,
        blue: 0,
        alpha: 0,
    };

    /// Constructs an opaque RGB color.
    pub const fn opaque(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha: 255,
        }
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.red, self.green, self.blue, self.alpha])
    }

    /// `#rrggbb`, or `#rrggbbaa` when the color is not fully opaque.
    pub fn to_hex(self) -> String {
        if self.alpha == 255 {
            format!("#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
        } else {
            format!(
                "#{:02x}{:02x}{:02x}{:02x}",
                self.red, self.green, self.blue, self.alpha
            )
        }
    }
}

impl Default for RgbaColor {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Parse a hexadecimal color string. Accepts `#RGB`, `#RRGGBB`, `#RRGGBBAA`, with or without `#`.
pub fn parse_hex_color(input: &str) -> Option<RgbaColor> {
    let trimmed = input.trim();
    let hex = trimmed
        .strip_prefix('#')
        .or_else(|| trimmed.strip_prefix("0x"))
        .unwrap_or(trimmed);

    match hex.len() {
        3 => Some(RgbaColor::opaque(
            nibble(hex.get(0..1)?)?,
            nibble(hex.get(1..2)?)?,
            nibble(hex.get(2..3)?)?,
        )),
        6 => Some(RgbaColor::opaque(
            byte(hex.get(0..2)?)?,
            byte(hex.get(2..4)?)?,
            byte(hex.get(4..6)?)?,
        )),
        8 => Some(RgbaColor {
            red: byte(hex.get(0..2)?)?,
            green: byte(hex.get(2..4)?)?,
            blue: byte(hex.get(4..6)?)?,
            alpha: byte(hex.get(6..8)?)?,
        }),
        _ => None,
    }
}

/// Parse a named color (`white`, `black`, `transparent`) or a hex string.
pub fn parse_color_spec(input: &str) -> Option<RgbaColor> {
    match input.trim().to_ascii_lowercase().as_str() {
        "white" => Some(RgbaColor::WHITE),
        "black" => Some(RgbaColor::BLACK),
        "transparent" | "none" => Some(RgbaColor::TRANSPARENT),
        other => parse_hex_color(other),
    }
}

fn byte(slice: &str) -> Option<u8> {
    u8::from_str_radix(slice, 16).ok()
}

fn nibble(slice: &str) -> Option<u8> {
    let nib = u8::from_str_radix(slice, 16).ok()?;
    Some((nib << 4) | nib)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_hex() {
        assert_eq!(parse_hex_color("#fff"), Some(RgbaColor::WHITE));
        assert_eq!(
            parse_hex_color("0x102030"),
            Some(RgbaColor::opaque(0x10, 0x20, 0x30))
        );
        assert_eq!(
            parse_hex_color("10203080").map(|c| c.alpha),
            Some(0x80)
        );
        assert_eq!(parse_hex_color("#12345"), None);
        assert_eq!(parse_hex_color("#gggggg"), None);
    }

    #[test]
    fn named_colors_resolve() {
        assert_eq!(parse_color_spec(" White "), Some(RgbaColor::WHITE));
        assert_eq!(parse_color_spec("transparent"), Some(RgbaColor::TRANSPARENT));
        assert_eq!(parse_color_spec("#000"), Some(RgbaColor::BLACK));
    }

    #[test]
    fn hex_output_round_trips() {
        let color = RgbaColor::opaque(1, 2, 254);
        assert_eq!(color.to_hex(), "#0102fe");
        assert_eq!(parse_hex_color(&color.to_hex()), Some(color));
        assert_eq!(RgbaColor::TRANSPARENT.to_hex(), "#00000000");
    }
}
