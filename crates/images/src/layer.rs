//! Per-layer transform chain and composition
//!
//! Every image layer — raster file or drawing — goes through the same fixed
//! pipeline: crop → rotate → margin-fit (aspect preserved) → colorize
//! (alpha preserved) → opacity. The positioned results are then
//! alpha-composited bottom-up over an opaque black key.

use std::{fs, io::Read, path::Path};

use image::{imageops, RgbaImage};
use tiny_skia::{PixmapPaint, Transform};

use crate::{
	color::Color,
	consts::{KEY_BACKGROUND, MAXIMUM_FILE_SIZE},
	error::{Error, Result},
	geometry::{Angle, CropBox, Margins},
	pixmap::{image_to_pixmap, new_pixmap, pixmap_to_image},
};

/// The fixed transform chain applied to one layer.
#[derive(Debug, Clone, Default)]
pub struct LayerPipeline {
	pub crop: Option<CropBox>,
	pub rotate: Option<Angle>,
	pub margins: Margins,
	pub colorize: Option<Color>,
	/// 0–100; `None` leaves the layer untouched.
	pub opacity: Option<u8>,
}

/// Decode a raster file, refusing anything over the size cap.
pub fn load_raster(path: &Path) -> Result<RgbaImage> {
	let io_error = |e: std::io::Error| Error::Io(e, path.to_path_buf().into_boxed_path());
	let mut file = fs::File::open(path).map_err(io_error)?;
	if file.metadata().map_err(io_error)?.len() > MAXIMUM_FILE_SIZE {
		return Err(Error::TooLarge);
	}
	let mut data = vec![];
	file.read_to_end(&mut data).map_err(io_error)?;
	Ok(image::load_from_memory(&data)?.to_rgba8())
}

/// Run the pipeline and return the transformed layer with the position it
/// must be pasted at inside the key.
pub fn place_layer(
	source: RgbaImage,
	pipeline: &LayerPipeline,
	key_width: u32,
	key_height: u32,
) -> Result<(RgbaImage, i64, i64)> {
	let mut layer = source;

	if let Some(crop) = pipeline.crop {
		let (x, y, width, height) = crop.resolve(layer.width(), layer.height());
		if width > 0 && height > 0 {
			layer = imageops::crop_imm(&layer, x, y, width, height).to_image();
		}
	}

	if let Some(angle) = pipeline.rotate {
		layer = rotate_in_place(&layer, angle)?;
	}

	let margins = pipeline.margins.resolve(key_width, key_height);
	let max_width = (key_width as i32 - margins.left - margins.right).max(1) as u32;
	let max_height = (key_height as i32 - margins.top - margins.bottom).max(1) as u32;

	// Fit inside the margin box, enlarging or shrinking but keeping aspect.
	if layer.width() != 0 && layer.height() != 0 {
		let ratio_w = max_width as f64 / layer.width() as f64;
		let ratio_h = max_height as f64 / layer.height() as f64;
		let ratio = ratio_w.min(ratio_h);
		let new_width = ((layer.width() as f64 * ratio).round() as u32).max(1);
		let new_height = ((layer.height() as f64 * ratio).round() as u32).max(1);
		if (new_width, new_height) != (layer.width(), layer.height()) {
			layer = imageops::resize(&layer, new_width, new_height, imageops::FilterType::Lanczos3);
		}
	}

	if let Some(color) = pipeline.colorize {
		let [r, g, b, _] = color.0;
		for pixel in layer.pixels_mut() {
			pixel.0 = [r, g, b, pixel.0[3]];
		}
	}

	if let Some(opacity) = pipeline.opacity {
		let opacity = u16::from(opacity.min(100));
		for pixel in layer.pixels_mut() {
			pixel.0[3] = ((u16::from(pixel.0[3]) * opacity) / 100) as u8;
		}
	}

	let position_x =
		i64::from(margins.left) + i64::from((max_width.saturating_sub(layer.width())) / 2);
	let position_y =
		i64::from(margins.top) + i64::from((max_height.saturating_sub(layer.height())) / 2);

	Ok((layer, position_x, position_y))
}

/// Rotate clockwise around the center, keeping the canvas size (corners that
/// leave the canvas are clipped, newly exposed area is transparent).
fn rotate_in_place(source: &RgbaImage, angle: Angle) -> Result<RgbaImage> {
	let source_pixmap = image_to_pixmap(source)?;
	let mut target = new_pixmap(source.width(), source.height())?;
	let transform = Transform::from_rotate_at(
		angle.degrees(),
		source.width() as f32 / 2.0,
		source.height() as f32 / 2.0,
	);
	target.draw_pixmap(
		0,
		0,
		source_pixmap.as_ref(),
		&PixmapPaint::default(),
		transform,
		None,
	);
	Ok(pixmap_to_image(&target))
}

/// Alpha-composite positioned layers bottom-up over an opaque black key.
pub fn composite(
	layers: impl IntoIterator<Item = (RgbaImage, i64, i64)>,
	key_width: u32,
	key_height: u32,
) -> RgbaImage {
	let mut key = RgbaImage::from_pixel(key_width, key_height, image::Rgba(KEY_BACKGROUND));
	for (layer, x, y) in layers {
		imageops::overlay(&mut key, &layer, x, y);
	}
	key
}

/// Uniformly darken a composed key image, used to dim keys sitting below an
/// overlay. `level` is the number of overlays above the key.
pub fn dim_for_overlay(image: &RgbaImage, level: u32) -> RgbaImage {
	let divisor = 1 + 3 * u16::from(level.min(20) as u8);
	let mut out = image.clone();
	for pixel in out.pixels_mut() {
		let [r, g, b, a] = pixel.0;
		pixel.0 = [
			(u16::from(r) / divisor) as u8,
			(u16::from(g) / divisor) as u8,
			(u16::from(b) / divisor) as u8,
			a,
		];
	}
	out
}

/// Decode a raster without touching the filesystem; used by tests and by
/// callers that already hold the bytes.
pub fn decode_raster(data: &[u8]) -> Result<RgbaImage> {
	if data.len() as u64 > MAXIMUM_FILE_SIZE {
		return Err(Error::TooLarge);
	}
	Ok(image::load_from_memory(data)?.to_rgba8())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::geometry::Dimension;

	fn checker(width: u32, height: u32) -> RgbaImage {
		RgbaImage::from_fn(width, height, |x, y| {
			if (x + y) % 2 == 0 {
				image::Rgba([255, 255, 255, 255])
			} else {
				image::Rgba([0, 0, 0, 255])
			}
		})
	}

	#[test]
	fn fit_enlarges_small_sources() {
		let source = checker(4, 4);
		let (layer, x, y) = place_layer(source, &LayerPipeline::default(), 64, 64).unwrap();
		assert_eq!((layer.width(), layer.height()), (64, 64));
		assert_eq!((x, y), (0, 0));
	}

	#[test]
	fn fit_keeps_aspect_and_centers() {
		let source = checker(100, 50);
		let (layer, x, y) = place_layer(source, &LayerPipeline::default(), 64, 64).unwrap();
		assert_eq!((layer.width(), layer.height()), (64, 32));
		assert_eq!((x, y), (0, 16));
	}

	#[test]
	fn margins_shrink_the_box() {
		let pipeline = LayerPipeline {
			margins: Margins {
				top: Dimension::Pixels(8),
				right: Dimension::Pixels(8),
				bottom: Dimension::Pixels(8),
				left: Dimension::Pixels(8),
			},
			..Default::default()
		};
		let (layer, x, y) = place_layer(checker(10, 10), &pipeline, 64, 64).unwrap();
		assert_eq!((layer.width(), layer.height()), (48, 48));
		assert_eq!((x, y), (8, 8));
	}

	#[test]
	fn colorize_preserves_alpha() {
		let mut source = RgbaImage::new(2, 1);
		source.put_pixel(0, 0, image::Rgba([10, 20, 30, 200]));
		source.put_pixel(1, 0, image::Rgba([10, 20, 30, 0]));
		let pipeline = LayerPipeline {
			colorize: Some(image::Rgba([255, 0, 0, 255])),
			..Default::default()
		};
		let (layer, _, _) = place_layer(source, &pipeline, 2, 1).unwrap();
		assert_eq!(layer.get_pixel(0, 0).0[3], 200);
		assert_eq!(layer.get_pixel(0, 0).0[0], 255);
		assert_eq!(layer.get_pixel(1, 0).0[3], 0);
	}

	#[test]
	fn opacity_scales_alpha() {
		let source = RgbaImage::from_pixel(1, 1, image::Rgba([255, 255, 255, 200]));
		let pipeline = LayerPipeline {
			opacity: Some(50),
			..Default::default()
		};
		let (layer, _, _) = place_layer(source, &pipeline, 1, 1).unwrap();
		assert_eq!(layer.get_pixel(0, 0).0[3], 100);
	}

	#[test]
	fn crop_runs_against_source_dimensions() {
		let pipeline = LayerPipeline {
			crop: Some(CropBox {
				left: Dimension::Percent(0.0),
				top: Dimension::Percent(0.0),
				right: Dimension::Percent(25.0),
				bottom: Dimension::Percent(100.0),
			}),
			..Default::default()
		};
		// 100x50 source; cropping the left quarter then fitting into 64x64
		// yields a taller-than-wide result.
		let (layer, _, _) = place_layer(checker(100, 50), &pipeline, 64, 64).unwrap();
		assert!(layer.width() < layer.height());
	}

	#[test]
	fn composite_starts_from_black() {
		let key = composite(std::iter::empty(), 4, 4);
		assert_eq!(key.get_pixel(0, 0), &image::Rgba([0, 0, 0, 255]));
	}

	#[test]
	fn composite_blends_partial_alpha() {
		let layer = RgbaImage::from_pixel(4, 4, image::Rgba([255, 255, 255, 128]));
		let key = composite([(layer, 0, 0)], 4, 4);
		let pixel = key.get_pixel(2, 2);
		assert!(pixel.0[0] > 100 && pixel.0[0] < 150);
		assert_eq!(pixel.0[3], 255);
	}

	#[test]
	fn oversized_data_is_refused() {
		let data = vec![0_u8; (MAXIMUM_FILE_SIZE + 1) as usize];
		assert!(matches!(decode_raster(&data), Err(Error::TooLarge)));
	}

	#[test]
	fn rotation_keeps_canvas_size() {
		let source = checker(10, 20);
		let rotated = rotate_in_place(&source, Angle(90.0)).unwrap();
		assert_eq!((rotated.width(), rotated.height()), (10, 20));
	}
}
