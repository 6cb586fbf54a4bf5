//! Key bitmap pipeline
//!
//! Everything that touches pixels lives here: vector drawing primitives,
//! raster file loading, the per-layer transform chain (crop → rotate →
//! margin-fit → colorize → opacity), text rasterization, emoji expansion,
//! layer composition and the final device-orientation transform.
//!
//! The crate is deliberately free of any knowledge of decks, keys or the
//! configuration tree — callers hand it fully-resolved specs and a target
//! size and get an [`image::RgbaImage`] back.

#![warn(
	clippy::all,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	unused_qualifications,
	rust_2018_idioms
)]
#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

mod color;
mod consts;
mod draw;
mod emoji;
mod error;
mod geometry;
mod layer;
mod pixmap;
mod text;
mod transform;

pub use color::{parse_color, Color};
pub use consts::KEY_BACKGROUND;
pub use draw::{DrawSpec, Shape};
pub use emoji::expand_emojis;
pub use error::{Error, Result};
pub use geometry::{Angle, CropBox, Dimension, Margins, ResolvedMargins};
pub use layer::{
	composite, decode_raster, dim_for_overlay, load_raster, place_layer, LayerPipeline,
};
pub use text::{
	Align, FontStyle, FontWeight, RenderedText, ScrollAxis, TextOptions, TextRenderer, TextSize,
	VAlign,
};
pub use transform::DeviceTransform;

pub use image::RgbaImage;
