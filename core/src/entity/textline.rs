//! Text line entities: `TEXT[;line=…][;opts]`

use sdfs_images::{Align, Dimension, FontStyle, FontWeight, TextOptions, TextSize, VAlign};

use super::{layer::LayerRef, Version, Versioned};
use crate::config::{ConfigError, OptionMap};

/// Where the text content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSource {
	/// `text=…` inline (escapes already decoded).
	Inline(String),
	/// The entity file's content.
	SelfContent,
	/// `file=<path>` content.
	File(String),
	/// `file=__inside__`: the entity file's content is the path.
	Inside,
}

/// A fully-resolved text line.
#[derive(Debug, Clone)]
pub struct TextSpec {
	pub source: TextSource,
	pub options: TextOptions,
}

#[derive(Debug, Clone)]
pub struct TextEntity {
	pub version: Version,
	/// `line=` index; `-1` is the single unnumbered variant.
	pub line: i32,
}

impl TextEntity {
	pub fn new(version: Version, line: i32) -> Self {
		Self { version, line }
	}

	pub fn name(&self) -> Option<&str> {
		self.version.name_option()
	}
}

impl Versioned for TextEntity {
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

/// `ref=PAGE:KEY:LINE`, same shape as layer references.
pub type TextRef = LayerRef;

/// Build the text spec from interpolated options.
pub fn resolve_text_spec(options: &OptionMap) -> Result<TextSpec, ConfigError> {
	options.at_most_one_of(&["text", "file"])?;
	options.at_most_one_of(&["size", "fit"])?;

	let source = if let Some(text) = options.get_raw("text") {
		TextSource::Inline(options.decode(text))
	} else if let Some(file) = options.get_raw("file") {
		if file == "__inside__" {
			TextSource::Inside
		} else {
			TextSource::File(options.decode(file))
		}
	} else {
		TextSource::SelfContent
	};

	let fit = options.get_bool("fit")?.unwrap_or(false);
	let size = if fit {
		TextSize::Fit
	} else {
		TextSize::Fixed(
			options
				.get_dimension("size")?
				.unwrap_or(Dimension::Percent(20.0)),
		)
	};

	let weight = match options.get_raw("weight") {
		None => FontWeight::Medium,
		Some(value) => FontWeight::parse(value).ok_or_else(|| ConfigError::InvalidValue {
			key: "weight".to_string(),
			value: value.to_string(),
		})?,
	};
	let style = if options.get_bool("italic")?.unwrap_or(false) {
		FontStyle::Italic
	} else {
		FontStyle::Normal
	};

	// `fit` text centers by default; fixed-size text sits top-left.
	let align = match options.get_raw("align") {
		None => {
			if fit {
				Align::Center
			} else {
				Align::Left
			}
		}
		Some(value) => Align::parse(value).ok_or_else(|| ConfigError::InvalidValue {
			key: "align".to_string(),
			value: value.to_string(),
		})?,
	};
	let valign = match options.get_raw("valign") {
		None => {
			if fit {
				VAlign::Middle
			} else {
				VAlign::Top
			}
		}
		Some(value) => VAlign::parse(value).ok_or_else(|| ConfigError::InvalidValue {
			key: "valign".to_string(),
			value: value.to_string(),
		})?,
	};

	Ok(TextSpec {
		source,
		options: TextOptions {
			size,
			weight,
			style,
			color: options
				.get_color("color")?
				.unwrap_or(image::Rgba([255, 255, 255, 255])),
			align,
			valign,
			margins: options.get_margins("margin")?.unwrap_or_default(),
			wrap: options.get_bool("wrap")?.unwrap_or(false),
			scroll: options.get_dimension("scroll")?,
			opacity: options.get_u8_percent("opacity")?,
			emojis: options.get_bool("emojis")?.unwrap_or(true),
		},
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::parse_name;

	fn options(name: &str) -> OptionMap {
		parse_name(name).unwrap().unwrap().options
	}

	#[test]
	fn inline_text_resolves_with_defaults() {
		let spec = resolve_text_spec(&options("TEXT;text=hello")).unwrap();
		assert_eq!(spec.source, TextSource::Inline("hello".to_string()));
		assert_eq!(spec.options.size, TextSize::Fixed(Dimension::Percent(20.0)));
		assert_eq!(spec.options.align, Align::Left);
		assert_eq!(spec.options.valign, VAlign::Top);
		assert!(spec.options.emojis);
	}

	#[test]
	fn fit_changes_the_default_alignment() {
		let spec = resolve_text_spec(&options("TEXT;text=hi;fit")).unwrap();
		assert_eq!(spec.options.size, TextSize::Fit);
		assert_eq!(spec.options.align, Align::Center);
		assert_eq!(spec.options.valign, VAlign::Middle);
	}

	#[test]
	fn explicit_alignment_beats_fit_defaults() {
		let spec = resolve_text_spec(&options("TEXT;text=hi;fit;align=right")).unwrap();
		assert_eq!(spec.options.align, Align::Right);
	}

	#[test]
	fn size_and_fit_conflict() {
		assert!(matches!(
			resolve_text_spec(&options("TEXT;text=hi;fit;size=12")),
			Err(ConfigError::Conflicting(_, _))
		));
	}

	#[test]
	fn text_and_file_conflict() {
		assert!(matches!(
			resolve_text_spec(&options("TEXT;text=hi;file=other")),
			Err(ConfigError::Conflicting(_, _))
		));
	}

	#[test]
	fn scroll_and_styling_parse() {
		let spec = resolve_text_spec(&options(
			"TEXT;line=2;text=long;scroll=-20;weight=bold;italic;color=cyan;wrap",
		))
		.unwrap();
		assert_eq!(spec.options.scroll, Some(Dimension::Pixels(-20)));
		assert_eq!(spec.options.weight, FontWeight::Bold);
		assert_eq!(spec.options.style, FontStyle::Italic);
		assert!(spec.options.wrap);
	}
}
