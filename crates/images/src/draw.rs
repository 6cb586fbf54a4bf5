//! Vector drawing primitives
//!
//! Shapes are drawn into a transparent, key-sized canvas. Coordinates are
//! alternating x/y [`Dimension`]s resolved against the key width/height;
//! angles follow the clock face (0 = 12 o'clock, clockwise).

use image::RgbaImage;
use tiny_skia::{FillRule, Paint, PathBuilder, Rect, Stroke, Transform};

use crate::{
	color::Color,
	error::{Error, Result},
	geometry::{Angle, Dimension},
	pixmap::{new_pixmap, pixmap_to_image, skia_color},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
	Points,
	Line,
	Rectangle,
	Polygon,
	Ellipse,
	Arc,
	Chord,
	PieSlice,
	Fill,
}

impl Shape {
	pub fn parse(value: &str) -> Option<Self> {
		Some(match value {
			"points" => Self::Points,
			"line" => Self::Line,
			"rectangle" => Self::Rectangle,
			"polygon" => Self::Polygon,
			"ellipse" => Self::Ellipse,
			"arc" => Self::Arc,
			"chord" => Self::Chord,
			"pieslice" => Self::PieSlice,
			"fill" => Self::Fill,
			_ => return None,
		})
	}
}

/// A fully-resolved drawing instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawSpec {
	pub shape: Shape,
	pub coords: Vec<Dimension>,
	pub outline: Color,
	pub fill: Option<Color>,
	pub width: u32,
	pub radius: u32,
	pub angles: (Angle, Angle),
}

impl DrawSpec {
	/// Render onto a transparent canvas of the key size.
	pub fn render(&self, key_width: u32, key_height: u32) -> Result<RgbaImage> {
		// `fill` is sugar for a borderless full-size rectangle.
		if self.shape == Shape::Fill {
			let full = Self {
				shape: Shape::Rectangle,
				coords: vec![
					Dimension::ZERO,
					Dimension::ZERO,
					Dimension::Percent(100.0),
					Dimension::Percent(100.0),
				],
				outline: self.outline,
				fill: self.fill.or(Some(self.outline)),
				width: 0,
				radius: 0,
				angles: self.angles,
			};
			return full.render(key_width, key_height);
		}

		let points = self.resolve_points(key_width, key_height)?;
		let mut pixmap = new_pixmap(key_width, key_height)?;

		match self.shape {
			Shape::Points => {
				for &(x, y) in &points {
					if let Some(rect) = Rect::from_xywh(x, y, 1.0, 1.0) {
						fill_rect(&mut pixmap, rect, self.outline);
					}
				}
			}

			Shape::Line => {
				if let Some(path) = polyline(&points, false) {
					stroke_path(&mut pixmap, &path, self.outline, self.width);
				}
			}

			Shape::Polygon => {
				if let Some(path) = polyline(&points, true) {
					if let Some(fill) = self.fill {
						fill_path(&mut pixmap, &path, fill);
					}
					stroke_path(&mut pixmap, &path, self.outline, self.width.max(1));
				}
			}

			Shape::Rectangle => {
				let bounds = bounding_pair(&points)?;
				let path = if self.radius > 0 {
					rounded_rect_path(bounds, self.radius as f32)
				} else {
					Rect::from_ltrb(bounds.0, bounds.1, bounds.2, bounds.3)
						.map(PathBuilder::from_rect)
				};
				if let Some(path) = path {
					if let Some(fill) = self.fill {
						fill_path(&mut pixmap, &path, fill);
					}
					if self.width > 0 {
						stroke_path(&mut pixmap, &path, self.outline, self.width);
					}
				}
			}

			Shape::Ellipse => {
				let bounds = bounding_pair(&points)?;
				if let Some(path) = ellipse_path(bounds) {
					if let Some(fill) = self.fill {
						fill_path(&mut pixmap, &path, fill);
					}
					if self.width > 0 {
						stroke_path(&mut pixmap, &path, self.outline, self.width);
					}
				}
			}

			Shape::Arc | Shape::Chord | Shape::PieSlice => {
				let bounds = bounding_pair(&points)?;
				let (start, end) = self.angles;
				if let Some(path) = arc_path(bounds, start, end, self.shape) {
					if self.shape != Shape::Arc {
						if let Some(fill) = self.fill {
							fill_path(&mut pixmap, &path, fill);
						}
					}
					stroke_path(&mut pixmap, &path, self.outline, self.width.max(1));
				}
			}

			Shape::Fill => unreachable!("rewritten above"),
		}

		Ok(pixmap_to_image(&pixmap))
	}

	fn resolve_points(&self, key_width: u32, key_height: u32) -> Result<Vec<(f32, f32)>> {
		let expected = match self.shape {
			Shape::Points | Shape::Line | Shape::Polygon => 2,
			_ => 4,
		};
		if self.coords.len() < expected {
			return Err(Error::NotEnoughCoordinates {
				expected,
				got: self.coords.len(),
			});
		}
		Ok(self
			.coords
			.chunks_exact(2)
			.map(|pair| {
				(
					pair[0].resolve(key_width) as f32,
					pair[1].resolve(key_height) as f32,
				)
			})
			.collect())
	}
}

type Bounds = (f32, f32, f32, f32);

/// First two points as a normalized (left, top, right, bottom) box. Both
/// corners are inclusive, so the far edge extends one pixel past the
/// coordinate (a `0,0,100%,100%` rectangle covers the whole key).
fn bounding_pair(points: &[(f32, f32)]) -> Result<Bounds> {
	if points.len() < 2 {
		return Err(Error::NotEnoughCoordinates {
			expected: 4,
			got: points.len() * 2,
		});
	}
	let (x0, y0) = points[0];
	let (x1, y1) = points[1];
	Ok((x0.min(x1), y0.min(y1), x0.max(x1) + 1.0, y0.max(y1) + 1.0))
}

fn polyline(points: &[(f32, f32)], close: bool) -> Option<tiny_skia::Path> {
	let mut builder = PathBuilder::new();
	let (first_x, first_y) = *points.first()?;
	builder.move_to(first_x, first_y);
	for &(x, y) in &points[1..] {
		builder.line_to(x, y);
	}
	if close {
		builder.close();
	}
	builder.finish()
}

/// Cubic-arc circle constant.
const KAPPA: f32 = 0.552_284_8;

fn ellipse_path(bounds: Bounds) -> Option<tiny_skia::Path> {
	let (left, top, right, bottom) = bounds;
	let oval = Rect::from_ltrb(left, top, right, bottom)?;
	PathBuilder::from_oval(oval)
}

fn rounded_rect_path(bounds: Bounds, radius: f32) -> Option<tiny_skia::Path> {
	let (left, top, right, bottom) = bounds;
	let radius = radius.min((right - left) / 2.0).min((bottom - top) / 2.0);
	if radius <= 0.0 {
		return Rect::from_ltrb(left, top, right, bottom).map(PathBuilder::from_rect);
	}
	let control = radius * KAPPA;
	let mut builder = PathBuilder::new();
	builder.move_to(left + radius, top);
	builder.line_to(right - radius, top);
	builder.cubic_to(
		right - radius + control,
		top,
		right,
		top + radius - control,
		right,
		top + radius,
	);
	builder.line_to(right, bottom - radius);
	builder.cubic_to(
		right,
		bottom - radius + control,
		right - radius + control,
		bottom,
		right - radius,
		bottom,
	);
	builder.line_to(left + radius, bottom);
	builder.cubic_to(
		left + radius - control,
		bottom,
		left,
		bottom - radius + control,
		left,
		bottom - radius,
	);
	builder.line_to(left, top + radius);
	builder.cubic_to(
		left,
		top + radius - control,
		left + radius - control,
		top,
		left + radius,
		top,
	);
	builder.close();
	builder.finish()
}

/// Point on the ellipse inscribed in `bounds` at clock angle `degrees`.
fn clock_point(bounds: Bounds, degrees: f32) -> (f32, f32) {
	let (left, top, right, bottom) = bounds;
	let center_x = (left + right) / 2.0;
	let center_y = (top + bottom) / 2.0;
	let radius_x = (right - left) / 2.0;
	let radius_y = (bottom - top) / 2.0;
	let radians = degrees.to_radians();
	(
		center_x + radius_x * radians.sin(),
		center_y - radius_y * radians.cos(),
	)
}

/// Sampled elliptical arc between two clock angles; `Chord` closes the two
/// endpoints, `PieSlice` closes through the center.
fn arc_path(bounds: Bounds, start: Angle, end: Angle, shape: Shape) -> Option<tiny_skia::Path> {
	let mut start_degrees = start.degrees();
	let mut end_degrees = end.degrees();
	if end_degrees < start_degrees {
		end_degrees += 360.0;
	}
	if end_degrees - start_degrees > 360.0 {
		end_degrees = start_degrees + 360.0;
	}

	const STEP: f32 = 4.0;
	let mut builder = PathBuilder::new();
	let (start_x, start_y) = clock_point(bounds, start_degrees);
	builder.move_to(start_x, start_y);
	while start_degrees < end_degrees {
		start_degrees = (start_degrees + STEP).min(end_degrees);
		let (x, y) = clock_point(bounds, start_degrees);
		builder.line_to(x, y);
	}

	match shape {
		Shape::Chord => builder.close(),
		Shape::PieSlice => {
			let (left, top, right, bottom) = bounds;
			builder.line_to((left + right) / 2.0, (top + bottom) / 2.0);
			builder.close();
		}
		_ => {}
	}
	builder.finish()
}

fn paint(color: Color) -> Paint<'static> {
	let mut paint = Paint::default();
	paint.set_color(skia_color(color));
	paint.anti_alias = true;
	paint
}

fn fill_path(pixmap: &mut tiny_skia::Pixmap, path: &tiny_skia::Path, color: Color) {
	pixmap.fill_path(
		path,
		&paint(color),
		FillRule::Winding,
		Transform::identity(),
		None,
	);
}

fn stroke_path(pixmap: &mut tiny_skia::Pixmap, path: &tiny_skia::Path, color: Color, width: u32) {
	if width == 0 {
		return;
	}
	let stroke = Stroke {
		width: width as f32,
		..Stroke::default()
	};
	pixmap.stroke_path(path, &paint(color), &stroke, Transform::identity(), None);
}

fn fill_rect(pixmap: &mut tiny_skia::Pixmap, rect: Rect, color: Color) {
	pixmap.fill_rect(rect, &paint(color), Transform::identity(), None);
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spec(shape: Shape, coords: Vec<Dimension>) -> DrawSpec {
		DrawSpec {
			shape,
			coords,
			outline: image::Rgba([255, 255, 255, 255]),
			fill: Some(image::Rgba([255, 0, 0, 255])),
			width: 1,
			radius: 0,
			angles: (Angle(0.0), Angle(90.0)),
		}
	}

	#[test]
	fn fill_covers_the_whole_key() {
		let image = spec(Shape::Fill, vec![]).render(8, 8).unwrap();
		assert_eq!(image.get_pixel(0, 0), &image::Rgba([255, 0, 0, 255]));
		assert_eq!(image.get_pixel(7, 7), &image::Rgba([255, 0, 0, 255]));
	}

	#[test]
	fn rectangle_fills_inside() {
		let coords = vec![
			Dimension::Pixels(2),
			Dimension::Pixels(2),
			Dimension::Pixels(13),
			Dimension::Pixels(13),
		];
		let image = spec(Shape::Rectangle, coords).render(16, 16).unwrap();
		assert_eq!(image.get_pixel(8, 8), &image::Rgba([255, 0, 0, 255]));
		assert_eq!(image.get_pixel(0, 0).0[3], 0);
	}

	#[test]
	fn missing_coordinates_error() {
		let result = spec(Shape::Rectangle, vec![Dimension::Pixels(1); 2]).render(16, 16);
		assert!(matches!(
			result,
			Err(Error::NotEnoughCoordinates { expected: 4, got: 2 })
		));
	}

	#[test]
	fn percent_coordinates_span_the_key() {
		let coords = vec![
			Dimension::Percent(0.0),
			Dimension::Percent(0.0),
			Dimension::Percent(100.0),
			Dimension::Percent(100.0),
		];
		let image = spec(Shape::Rectangle, coords).render(32, 32).unwrap();
		assert_eq!(image.get_pixel(16, 16), &image::Rgba([255, 0, 0, 255]));
	}

	#[test]
	fn shape_names_parse() {
		assert_eq!(Shape::parse("pieslice"), Some(Shape::PieSlice));
		assert_eq!(Shape::parse("fill"), Some(Shape::Fill));
		assert_eq!(Shape::parse("triangle"), None);
	}
}
