//! Final device-orientation transform
//!
//! Stream Deck models disagree on how key bitmaps are oriented on the wire;
//! the hardware facade describes the required rotation/mirroring and every
//! composed key image is passed through it last.

use image::{imageops, RgbaImage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceTransform {
	/// Clockwise rotation in degrees; only 0/90/180/270 are meaningful.
	pub rotation: u16,
	pub flip_horizontal: bool,
	pub flip_vertical: bool,
}

impl DeviceTransform {
	pub fn apply(&self, image: &RgbaImage) -> RgbaImage {
		let mut out = match self.rotation % 360 {
			90 => imageops::rotate90(image),
			180 => imageops::rotate180(image),
			270 => imageops::rotate270(image),
			_ => image.clone(),
		};
		if self.flip_horizontal {
			out = imageops::flip_horizontal(&out);
		}
		if self.flip_vertical {
			out = imageops::flip_vertical(&out);
		}
		out
	}

	pub fn is_identity(&self) -> bool {
		self.rotation % 360 == 0 && !self.flip_horizontal && !self.flip_vertical
	}
}
