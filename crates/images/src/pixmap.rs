//! Conversions between `tiny_skia::Pixmap` (premultiplied) and
//! `image::RgbaImage` (straight alpha).

use image::RgbaImage;
use tiny_skia::{Pixmap, PremultipliedColorU8};

use crate::error::{Error, Result};

pub fn new_pixmap(width: u32, height: u32) -> Result<Pixmap> {
	Pixmap::new(width.max(1), height.max(1)).ok_or(Error::PixmapAllocation)
}

pub fn pixmap_to_image(pixmap: &Pixmap) -> RgbaImage {
	let mut out = RgbaImage::new(pixmap.width(), pixmap.height());
	for (pixel, out_pixel) in pixmap.pixels().iter().zip(out.pixels_mut()) {
		let demultiplied = pixel.demultiply();
		*out_pixel = image::Rgba([
			demultiplied.red(),
			demultiplied.green(),
			demultiplied.blue(),
			demultiplied.alpha(),
		]);
	}
	out
}

pub fn image_to_pixmap(source: &RgbaImage) -> Result<Pixmap> {
	let mut pixmap = new_pixmap(source.width(), source.height())?;
	for (pixel, out_pixel) in source.pixels().zip(pixmap.pixels_mut()) {
		let [r, g, b, a] = pixel.0;
		*out_pixel = premultiply(r, g, b, a);
	}
	Ok(pixmap)
}

fn premultiply(r: u8, g: u8, b: u8, a: u8) -> PremultipliedColorU8 {
	let scale = |channel: u8| ((u16::from(channel) * u16::from(a) + 127) / 255) as u8;
	PremultipliedColorU8::from_rgba(scale(r), scale(g), scale(b), a)
		.unwrap_or(PremultipliedColorU8::TRANSPARENT)
}

pub fn skia_color(color: crate::color::Color) -> tiny_skia::Color {
	let [r, g, b, a] = color.0;
	tiny_skia::Color::from_rgba8(r, g, b, a)
}
