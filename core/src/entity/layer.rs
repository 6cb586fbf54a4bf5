//! Image layer entities: `IMAGE[;layer=…][;opts]`
//!
//! A layer draws either a raster file (the entity file itself, or a `file=`
//! target) or a vector primitive (`draw=…`). The options here resolve into
//! the pixel pipeline of `sdfs-images`.

use sdfs_images::{Angle, DrawSpec, LayerPipeline, Shape};

use super::{Version, Versioned};
use crate::config::{ConfigError, OptionMap};

/// Where the layer's pixels come from.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSource {
	/// The entity file itself is the image.
	SelfFile,
	/// `file=<path>` (escape sequences already decoded).
	File(String),
	/// `file=__inside__`: the entity file's content is the path.
	Inside,
	/// `draw=<shape>` with its coordinates and styling.
	Draw(DrawSpec),
}

/// A fully-resolved image layer.
#[derive(Debug, Clone)]
pub struct LayerSpec {
	pub source: LayerSource,
	pub pipeline: LayerPipeline,
}

#[derive(Debug, Clone)]
pub struct LayerEntity {
	pub version: Version,
	/// `layer=` index; `-1` is the single unlayered variant.
	pub layer: i32,
}

impl LayerEntity {
	pub fn new(version: Version, layer: i32) -> Self {
		Self { version, layer }
	}

	pub fn name(&self) -> Option<&str> {
		self.version.name_option()
	}
}

impl Versioned for LayerEntity {
	fn path(&self) -> &std::path::Path {
		self.version.path()
	}
	fn mtime(&self) -> std::time::SystemTime {
		self.version.mtime()
	}
	fn disabled(&self) -> bool {
		self.version.disabled()
	}
}

/// `ref=PAGE:KEY:LAYER` — empty segments mean "same".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRef {
	pub page: Option<String>,
	pub key: Option<String>,
	pub target: Option<String>,
}

impl LayerRef {
	pub fn parse(value: &str) -> Result<Self, ConfigError> {
		let parts: Vec<&str> = value.split(':').collect();
		let invalid = || ConfigError::InvalidValue {
			key: "ref".to_string(),
			value: value.to_string(),
		};
		let [page, key, target]: [&str; 3] = parts.try_into().map_err(|_| invalid())?;
		Ok(Self {
			page: (!page.is_empty()).then(|| page.to_string()),
			key: (!key.is_empty()).then(|| key.to_string()),
			target: (!target.is_empty()).then(|| target.to_string()),
		})
	}
}

/// Build the pixel spec from interpolated options.
pub fn resolve_layer_spec(options: &OptionMap) -> Result<LayerSpec, ConfigError> {
	options.at_most_one_of(&["draw", "file"])?;

	let source = if let Some(shape_name) = options.get_raw("draw") {
		let shape = Shape::parse(shape_name).ok_or_else(|| ConfigError::InvalidValue {
			key: "draw".to_string(),
			value: shape_name.to_string(),
		})?;
		let coords = options.get_coords("coords")?.unwrap_or_default();
		if coords.is_empty() && shape != Shape::Fill {
			return Err(ConfigError::Missing("coords".to_string()));
		}
		LayerSource::Draw(DrawSpec {
			shape,
			coords,
			outline: options
				.get_color("outline")?
				.unwrap_or(image::Rgba([255, 255, 255, 255])),
			fill: options.get_color("fill")?,
			width: options.get_u32("width")?.unwrap_or(1),
			radius: options.get_u32("radius")?.unwrap_or(0),
			angles: options
				.get_angles("angles")?
				.unwrap_or((Angle(0.0), Angle(360.0))),
		})
	} else if let Some(file) = options.get_raw("file") {
		if file == "__inside__" {
			LayerSource::Inside
		} else {
			LayerSource::File(options.decode(file))
		}
	} else {
		LayerSource::SelfFile
	};

	Ok(LayerSpec {
		source,
		pipeline: LayerPipeline {
			crop: options.get_crop("crop")?,
			rotate: options.get_angle("rotate")?,
			margins: options.get_margins("margin")?.unwrap_or_default(),
			colorize: options.get_color("colorize")?,
			opacity: options.get_u8_percent("opacity")?,
		},
	})
}
