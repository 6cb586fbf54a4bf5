//! Text rasterization
//!
//! Lines of text are rendered by generating a minimal SVG document per line
//! and rasterizing it through `usvg`/`resvg` with the system font database,
//! the same route the SVG handling takes. Widths are measured by scanning
//! the rendered pixels, with a cache keyed on the exact request.
//!
//! The caller gets back a [`RenderedText`] block holding the full laid-out
//! bitmap plus everything needed to place, crop and scroll it inside a key.

use std::{collections::HashMap, sync::Mutex};

use image::{imageops, RgbaImage};
use once_cell::sync::Lazy;
use resvg::usvg::{self, fontdb, TreeParsing, TreeTextToPath};
use tiny_skia::Transform;
use tracing::warn;

use crate::{
	color::{to_svg_hex, Color},
	consts::{FIT_MAX_RATIO, FIT_MIN_RATIO, LINE_HEIGHT_RATIO},
	emoji::expand_emojis,
	error::Result,
	geometry::{Dimension, Margins, ResolvedMargins},
	pixmap::{new_pixmap, pixmap_to_image},
};

static FONT_DB: Lazy<fontdb::Database> = Lazy::new(|| {
	let mut db = fontdb::Database::new();
	db.load_system_fonts();
	if db.len() == 0 {
		warn!("No system fonts found; text will not render");
	}
	db
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontWeight {
	Thin,
	Light,
	Regular,
	#[default]
	Medium,
	Bold,
	Black,
}

impl FontWeight {
	pub fn parse(value: &str) -> Option<Self> {
		Some(match value {
			"thin" => Self::Thin,
			"light" => Self::Light,
			"regular" => Self::Regular,
			"medium" => Self::Medium,
			"bold" => Self::Bold,
			"black" => Self::Black,
			_ => return None,
		})
	}

	fn css(self) -> u16 {
		match self {
			Self::Thin => 100,
			Self::Light => 300,
			Self::Regular => 400,
			Self::Medium => 500,
			Self::Bold => 700,
			Self::Black => 900,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontStyle {
	#[default]
	Normal,
	Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
	#[default]
	Left,
	Center,
	Right,
}

impl Align {
	pub fn parse(value: &str) -> Option<Self> {
		Some(match value {
			"left" => Self::Left,
			"center" => Self::Center,
			"right" => Self::Right,
			_ => return None,
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VAlign {
	#[default]
	Top,
	Middle,
	Bottom,
}

impl VAlign {
	pub fn parse(value: &str) -> Option<Self> {
		Some(match value {
			"top" => Self::Top,
			"middle" => Self::Middle,
			"bottom" => Self::Bottom,
			_ => return None,
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextSize {
	Fixed(Dimension),
	/// Largest size such that the text fits its bounded box.
	Fit,
}

/// Fully-resolved text line options.
#[derive(Debug, Clone)]
pub struct TextOptions {
	pub size: TextSize,
	pub weight: FontWeight,
	pub style: FontStyle,
	pub color: Color,
	pub align: Align,
	pub valign: VAlign,
	pub margins: Margins,
	pub wrap: bool,
	/// Pixels (or percent of the scroll axis) per second; negative reverses.
	pub scroll: Option<Dimension>,
	pub opacity: Option<u8>,
	pub emojis: bool,
}

impl Default for TextOptions {
	fn default() -> Self {
		Self {
			size: TextSize::Fixed(Dimension::Percent(20.0)),
			weight: FontWeight::default(),
			style: FontStyle::default(),
			color: image::Rgba([255, 255, 255, 255]),
			align: Align::Left,
			valign: VAlign::Top,
			margins: Margins::default(),
			wrap: false,
			scroll: None,
			opacity: None,
			emojis: true,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAxis {
	Horizontal,
	Vertical,
}

/// A laid-out text block ready to be placed inside a key.
#[derive(Debug, Clone)]
pub struct RenderedText {
	image: RgbaImage,
	total_width: u32,
	total_height: u32,
	max_width: u32,
	max_height: u32,
	margins: ResolvedMargins,
	align: Align,
	valign: VAlign,
	scrollable: Option<ScrollAxis>,
	scroll_pixels: i32,
	key_width: u32,
	key_height: u32,
}

impl RenderedText {
	pub fn scrollable(&self) -> Option<ScrollAxis> {
		self.scrollable
	}

	/// Signed scroll speed in pixels per second along the scroll axis.
	pub fn scroll_pixels(&self) -> i32 {
		self.scroll_pixels
	}

	/// Extract the frame visible at the given scroll offset, with the
	/// position it must be pasted at inside the key.
	pub fn frame(&self, scrolled: i64) -> (RgbaImage, i64, i64) {
		let overflow_x = self.total_width > self.max_width;
		let overflow_y = self.total_height > self.max_height;

		// Window origin inside the block along each axis.
		let window_x = if overflow_x {
			let base = match (self.scrollable, self.align) {
				(Some(ScrollAxis::Horizontal), _) => {
					if self.scroll_pixels >= 0 {
						0
					} else {
						self.total_width as i64 - self.max_width as i64
					}
				}
				(_, Align::Left) => 0,
				(_, Align::Right) => self.total_width as i64 - self.max_width as i64,
				(_, Align::Center) => (self.total_width as i64 - self.max_width as i64) / 2,
			};
			base + if self.scrollable == Some(ScrollAxis::Horizontal) {
				scrolled
			} else {
				0
			}
		} else {
			0
		};

		let window_y = if overflow_y {
			let base = match (self.scrollable, self.valign) {
				(Some(ScrollAxis::Vertical), _) => {
					if self.scroll_pixels >= 0 {
						0
					} else {
						self.total_height as i64 - self.max_height as i64
					}
				}
				(_, VAlign::Top) => 0,
				(_, VAlign::Bottom) => self.total_height as i64 - self.max_height as i64,
				(_, VAlign::Middle) => (self.total_height as i64 - self.max_height as i64) / 2,
			};
			base + if self.scrollable == Some(ScrollAxis::Vertical) {
				scrolled
			} else {
				0
			}
		} else {
			0
		};

		let visible_width = self.total_width.min(self.max_width);
		let visible_height = self.total_height.min(self.max_height);
		let frame = crop_window(&self.image, window_x, window_y, visible_width, visible_height);

		let x = if overflow_x {
			i64::from(self.margins.left)
		} else {
			match self.align {
				Align::Left => i64::from(self.margins.left),
				Align::Right => {
					i64::from(self.key_width) - i64::from(self.margins.right)
						- i64::from(visible_width)
				}
				Align::Center => {
					i64::from(self.margins.left)
						+ (i64::from(self.max_width) - i64::from(visible_width)) / 2
				}
			}
		};
		let y = if overflow_y {
			i64::from(self.margins.top)
		} else {
			match self.valign {
				VAlign::Top => i64::from(self.margins.top),
				VAlign::Bottom => {
					i64::from(self.key_height) - i64::from(self.margins.bottom)
						- i64::from(visible_height)
				}
				VAlign::Middle => {
					i64::from(self.margins.top)
						+ (i64::from(self.max_height) - i64::from(visible_height)) / 2
				}
			}
		};

		(frame, x, y)
	}

	/// Wrap the scroll offset once the text has fully left the window, so it
	/// re-enters from the opposite edge.
	pub fn wrap_scrolled(&self, scrolled: i64) -> i64 {
		let (total, max) = match self.scrollable {
			Some(ScrollAxis::Horizontal) => (i64::from(self.total_width), i64::from(self.max_width)),
			Some(ScrollAxis::Vertical) => {
				(i64::from(self.total_height), i64::from(self.max_height))
			}
			None => return scrolled,
		};
		let sign = if self.scroll_pixels >= 0 { 1 } else { -1 };
		if sign * scrolled >= total {
			-sign * max
		} else {
			scrolled
		}
	}
}

/// Copy a window out of `source`, padding out-of-range areas with
/// transparency.
fn crop_window(source: &RgbaImage, x: i64, y: i64, width: u32, height: u32) -> RgbaImage {
	let mut out = RgbaImage::new(width.max(1), height.max(1));
	imageops::overlay(&mut out, source, -x, -y);
	out
}

struct LaidOutBlock {
	lines: Vec<(String, u32)>,
	width: u32,
	height: u32,
	line_height: u32,
	size: u32,
}

/// Renders and measures text through the SVG pipeline, caching measured
/// widths.
pub struct TextRenderer {
	measure_cache: Mutex<HashMap<(u16, bool, u32, String), u32>>,
}

impl Default for TextRenderer {
	fn default() -> Self {
		Self::new()
	}
}

impl TextRenderer {
	pub fn new() -> Self {
		Self {
			measure_cache: Mutex::new(HashMap::new()),
		}
	}

	/// Lay out and rasterize `content` for a key of the given size. Returns
	/// `None` when there is nothing visible to draw.
	pub fn render(
		&self,
		content: &str,
		options: &TextOptions,
		key_width: u32,
		key_height: u32,
	) -> Result<Option<RenderedText>> {
		let content = if options.emojis {
			expand_emojis(content)
		} else {
			content.to_string()
		};
		if content.trim().is_empty() {
			return Ok(None);
		}

		let margins = options.margins.resolve(key_width, key_height);
		let max_width = (key_width as i32 - margins.left - margins.right).max(1) as u32;
		let max_height = (key_height as i32 - margins.top - margins.bottom).max(1) as u32;

		let block = match options.size {
			TextSize::Fixed(dimension) => {
				let size = dimension.resolve(key_height).max(1) as u32;
				self.layout(&content, size, options, max_width)?
			}
			TextSize::Fit => self.layout_fit(&content, options, max_width, max_height)?,
		};
		if block.width == 0 || block.lines.is_empty() {
			return Ok(None);
		}

		let mut image = RgbaImage::new(block.width, block.height);
		for (index, (line, line_width)) in block.lines.iter().enumerate() {
			let Some(line_image) =
				self.render_line(line, block.size, options, block.line_height)?
			else {
				continue;
			};
			let x = match options.align {
				Align::Left => 0,
				Align::Right => i64::from(block.width) - i64::from(*line_width),
				Align::Center => (i64::from(block.width) - i64::from(*line_width)) / 2,
			};
			imageops::overlay(
				&mut image,
				&line_image,
				x,
				i64::from(index as u32 * block.line_height),
			);
		}

		if let Some(opacity) = options.opacity {
			let opacity = u16::from(opacity.min(100));
			for pixel in image.pixels_mut() {
				pixel.0[3] = ((u16::from(pixel.0[3]) * opacity) / 100) as u8;
			}
		}

		// A scroll only engages when the text overflows along its axis.
		let mut scrollable = None;
		let mut scroll_pixels = 0;
		if let Some(scroll) = options.scroll {
			let pixels = scroll.resolve(if options.wrap { key_height } else { key_width });
			if pixels != 0 {
				if options.wrap && block.height > max_height {
					scrollable = Some(ScrollAxis::Vertical);
					scroll_pixels = pixels;
				} else if !options.wrap && block.width > max_width {
					scrollable = Some(ScrollAxis::Horizontal);
					scroll_pixels = pixels;
				}
			}
		}

		Ok(Some(RenderedText {
			total_width: block.width,
			total_height: block.height,
			image,
			max_width,
			max_height,
			margins,
			align: options.align,
			valign: options.valign,
			scrollable,
			scroll_pixels,
			key_width,
			key_height,
		}))
	}

	fn layout(
		&self,
		content: &str,
		size: u32,
		options: &TextOptions,
		max_width: u32,
	) -> Result<LaidOutBlock> {
		let line_height = (size as f32 * LINE_HEIGHT_RATIO).ceil() as u32;

		// Collapse runs of whitespace; drop trailing empty lines.
		let mut raw_lines: Vec<String> = content
			.lines()
			.map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
			.collect();
		if !options.wrap {
			raw_lines = vec![raw_lines
				.iter()
				.filter(|line| !line.is_empty())
				.cloned()
				.collect::<Vec<_>>()
				.join(" ")];
		}
		while raw_lines.last().is_some_and(|line| line.is_empty()) {
			raw_lines.pop();
		}

		let mut lines = Vec::new();
		for raw_line in raw_lines {
			if raw_line.is_empty() {
				lines.push((String::from(" "), 0));
				continue;
			}
			if options.wrap {
				for wrapped in self.wrap_line(&raw_line, size, options, max_width)? {
					let width = self.measure(&wrapped, size, options)?;
					lines.push((wrapped, width));
				}
			} else {
				let width = self.measure(&raw_line, size, options)?;
				lines.push((raw_line, width));
			}
		}

		let width = lines.iter().map(|(_, width)| *width).max().unwrap_or(0);
		let height = lines.len() as u32 * line_height;
		Ok(LaidOutBlock {
			lines,
			width,
			height,
			line_height,
			size,
		})
	}

	/// Binary search for the largest size whose block fits the box.
	fn layout_fit(
		&self,
		content: &str,
		options: &TextOptions,
		max_width: u32,
		max_height: u32,
	) -> Result<LaidOutBlock> {
		let min_size = ((max_width as f32 * FIT_MIN_RATIO).round() as u32).max(4);
		let mut lo = min_size;
		let mut hi = ((max_width as f32 * FIT_MAX_RATIO).round() as u32).max(min_size);

		let mut best = None;
		while lo <= hi {
			let mid = lo + (hi - lo) / 2;
			let block = self.layout(content, mid, options, max_width)?;
			if block.width <= max_width && block.height <= max_height {
				best = Some(block);
				lo = mid + 1;
			} else if mid == 0 {
				break;
			} else {
				hi = mid - 1;
			}
		}

		match best {
			Some(block) => Ok(block),
			None => self.layout(content, min_size, options, max_width),
		}
	}

	fn wrap_line(
		&self,
		line: &str,
		size: u32,
		options: &TextOptions,
		max_width: u32,
	) -> Result<Vec<String>> {
		let mut lines = Vec::new();
		let mut current = String::new();

		for word in line.split(' ') {
			let candidate = if current.is_empty() {
				word.to_string()
			} else {
				format!("{current} {word}")
			};
			if self.measure(&candidate, size, options)? <= max_width {
				current = candidate;
				continue;
			}
			if !current.is_empty() {
				lines.push(std::mem::take(&mut current));
			}
			if self.measure(word, size, options)? <= max_width {
				current = word.to_string();
			} else {
				// A single word wider than the box: hard-split on characters.
				for ch in word.chars() {
					let candidate = format!("{current}{ch}");
					if !current.is_empty()
						&& self.measure(&candidate, size, options)? > max_width
					{
						lines.push(std::mem::take(&mut current));
						current.push(ch);
					} else {
						current = candidate;
					}
				}
			}
		}
		if !current.is_empty() {
			lines.push(current);
		}
		Ok(lines)
	}

	fn measure(&self, text: &str, size: u32, options: &TextOptions) -> Result<u32> {
		let key = (
			options.weight.css(),
			options.style == FontStyle::Italic,
			size,
			text.to_string(),
		);
		if let Some(&width) = self
			.measure_cache
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.get(&key)
		{
			return Ok(width);
		}

		let line_height = (size as f32 * LINE_HEIGHT_RATIO).ceil() as u32;
		let width = self
			.render_line(text, size, options, line_height)?
			.map_or(0, |image| image.width());
		self.measure_cache
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.insert(key, width);
		Ok(width)
	}

	/// Rasterize one line at the given size. The result is cropped to the
	/// inked columns but keeps a fixed vertical extent so that stacked lines
	/// share a baseline grid.
	fn render_line(
		&self,
		text: &str,
		size: u32,
		options: &TextOptions,
		line_height: u32,
	) -> Result<Option<RgbaImage>> {
		if text.trim().is_empty() {
			return Ok(None);
		}

		// Sanity-cap the canvas; a runaway font size must not OOM the
		// worker.
		let size = size.min(1024);
		let char_count = (text.chars().count() as u32).min(256);
		let canvas_width = (size * 2 * (char_count + 2)).min(16384).max(size * 2);
		let canvas_height = (size * 2).max(line_height);

		let svg = svg_for_line(text, size, canvas_width, canvas_height, options);
		let mut tree = usvg::Tree::from_str(&svg, &usvg::Options::default())?;
		tree.convert_text(&FONT_DB);
		let rtree = resvg::Tree::from_usvg(&tree);

		let mut pixmap = new_pixmap(canvas_width, canvas_height)?;
		rtree.render(Transform::default(), &mut pixmap.as_mut());
		let rendered = pixmap_to_image(&pixmap);

		// Find the inked horizontal extent.
		let mut min_x = None;
		let mut max_x = None;
		for (x, _, pixel) in rendered.enumerate_pixels() {
			if pixel.0[3] > 0 {
				min_x = Some(min_x.map_or(x, |current: u32| current.min(x)));
				max_x = Some(max_x.map_or(x, |current: u32| current.max(x)));
			}
		}
		let (Some(min_x), Some(max_x)) = (min_x, max_x) else {
			return Ok(None);
		};

		let width = max_x - min_x + 1;
		let height = line_height.min(rendered.height());
		Ok(Some(
			imageops::crop_imm(&rendered, min_x, 0, width, height).to_image(),
		))
	}
}

fn svg_for_line(
	text: &str,
	size: u32,
	canvas_width: u32,
	canvas_height: u32,
	options: &TextOptions,
) -> String {
	let style = match options.style {
		FontStyle::Italic => "italic",
		FontStyle::Normal => "normal",
	};
	let alpha = f32::from(options.color.0[3]) / 255.0;
	format!(
		concat!(
			r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
			r#"<text x="0" y="{baseline}" font-family="sans-serif" font-size="{size}" "#,
			r#"font-weight="{weight}" font-style="{style}" fill="{fill}" fill-opacity="{alpha}" "#,
			r#"xml:space="preserve">{content}</text></svg>"#
		),
		w = canvas_width,
		h = canvas_height,
		baseline = size,
		size = size,
		weight = options.weight.css(),
		style = style,
		fill = to_svg_hex(options.color),
		alpha = alpha,
		content = escape_xml(text),
	)
}

fn escape_xml(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for ch in text.chars() {
		match ch {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&apos;"),
			_ => out.push(ch),
		}
	}
	out
}
