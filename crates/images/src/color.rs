//! Color names and hex notation

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};

/// RGBA color, straight (non-premultiplied) alpha.
pub type Color = image::Rgba<u8>;

static NAMED_COLORS: Lazy<HashMap<&'static str, [u8; 3]>> = Lazy::new(|| {
	HashMap::from([
		("black", [0x00, 0x00, 0x00]),
		("silver", [0xc0, 0xc0, 0xc0]),
		("gray", [0x80, 0x80, 0x80]),
		("grey", [0x80, 0x80, 0x80]),
		("white", [0xff, 0xff, 0xff]),
		("maroon", [0x80, 0x00, 0x00]),
		("red", [0xff, 0x00, 0x00]),
		("purple", [0x80, 0x00, 0x80]),
		("fuchsia", [0xff, 0x00, 0xff]),
		("magenta", [0xff, 0x00, 0xff]),
		("green", [0x00, 0x80, 0x00]),
		("lime", [0x00, 0xff, 0x00]),
		("olive", [0x80, 0x80, 0x00]),
		("yellow", [0xff, 0xff, 0x00]),
		("navy", [0x00, 0x00, 0x80]),
		("blue", [0x00, 0x00, 0xff]),
		("teal", [0x00, 0x80, 0x80]),
		("aqua", [0x00, 0xff, 0xff]),
		("cyan", [0x00, 0xff, 0xff]),
		("orange", [0xff, 0xa5, 0x00]),
		("pink", [0xff, 0xc0, 0xcb]),
		("brown", [0xa5, 0x2a, 0x2a]),
		("gold", [0xff, 0xd7, 0x00]),
		("indigo", [0x4b, 0x00, 0x82]),
		("violet", [0xee, 0x82, 0xee]),
		("turquoise", [0x40, 0xe0, 0xd0]),
		("salmon", [0xfa, 0x80, 0x72]),
		("coral", [0xff, 0x7f, 0x50]),
		("khaki", [0xf0, 0xe6, 0x8c]),
		("crimson", [0xdc, 0x14, 0x3c]),
		("darkgray", [0xa9, 0xa9, 0xa9]),
		("darkgrey", [0xa9, 0xa9, 0xa9]),
		("dimgray", [0x69, 0x69, 0x69]),
		("dimgrey", [0x69, 0x69, 0x69]),
		("lightgray", [0xd3, 0xd3, 0xd3]),
		("lightgrey", [0xd3, 0xd3, 0xd3]),
		("darkred", [0x8b, 0x00, 0x00]),
		("darkgreen", [0x00, 0x64, 0x00]),
		("darkblue", [0x00, 0x00, 0x8b]),
		("lightblue", [0xad, 0xd8, 0xe6]),
		("lightgreen", [0x90, 0xee, 0x90]),
		("lightyellow", [0xff, 0xff, 0xe0]),
		("skyblue", [0x87, 0xce, 0xeb]),
		("steelblue", [0x46, 0x82, 0xb4]),
		("tomato", [0xff, 0x63, 0x47]),
		("orchid", [0xda, 0x70, 0xd6]),
		("plum", [0xdd, 0xa0, 0xdd]),
		("tan", [0xd2, 0xb4, 0x8c]),
		("beige", [0xf5, 0xf5, 0xdc]),
		("ivory", [0xff, 0xff, 0xf0]),
	])
});

/// Parse a color name, `#rrggbb` or `#rrggbbaa` value.
pub fn parse_color(value: &str) -> Result<Color> {
	let invalid = || Error::InvalidColor(value.to_string());

	if let Some(hex) = value.strip_prefix('#') {
		if !hex.is_ascii() {
			return Err(invalid());
		}
		let byte =
			|index: usize| u8::from_str_radix(&hex[index..index + 2], 16).map_err(|_| invalid());
		return match hex.len() {
			6 => Ok(image::Rgba([byte(0)?, byte(2)?, byte(4)?, 0xff])),
			8 => Ok(image::Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
			_ => Err(invalid()),
		};
	}

	NAMED_COLORS
		.get(value.to_ascii_lowercase().as_str())
		.map(|&[r, g, b]| image::Rgba([r, g, b, 0xff]))
		.ok_or_else(invalid)
}

/// Hex form used when embedding a color into generated SVG.
pub fn to_svg_hex(color: Color) -> String {
	let [r, g, b, _] = color.0;
	format!("#{r:02x}{g:02x}{b:02x}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn named_colors_parse() {
		assert_eq!(parse_color("white").unwrap(), image::Rgba([255, 255, 255, 255]));
		assert_eq!(parse_color("RED").unwrap(), image::Rgba([255, 0, 0, 255]));
	}

	#[test]
	fn hex_colors_parse() {
		assert_eq!(
			parse_color("#336699").unwrap(),
			image::Rgba([0x33, 0x66, 0x99, 0xff])
		);
		assert_eq!(
			parse_color("#33669980").unwrap(),
			image::Rgba([0x33, 0x66, 0x99, 0x80])
		);
	}

	#[test]
	fn junk_is_rejected() {
		assert!(parse_color("#12345").is_err());
		assert!(parse_color("notacolor").is_err());
		assert!(parse_color("#zzzzzz").is_err());
	}
}
