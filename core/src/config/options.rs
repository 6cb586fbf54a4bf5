//! Typed option extraction
//!
//! Raw options are strings straight out of the filename (after variable
//! substitution). Each entity pulls what it understands through the typed
//! getters here; anything ill-formed turns the entity invalid rather than
//! crashing anything.

use std::collections::BTreeMap;

use sdfs_images::{parse_color, Angle, Color, CropBox, Dimension, Margins};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error("malformed option segment '{0}'")]
	MalformedOption(String),

	#[error("invalid value '{value}' for option '{key}'")]
	InvalidValue { key: String, value: String },

	#[error("option '{key}' expects {expected} comma-separated values")]
	WrongArity { key: String, expected: usize },

	#[error("options '{0}' and '{1}' cannot be combined")]
	Conflicting(String, String),

	#[error("missing required option '{0}'")]
	Missing(String),
}

impl ConfigError {
	fn invalid(key: &str, value: &str) -> Self {
		Self::InvalidValue {
			key: key.to_string(),
			value: value.to_string(),
		}
	}
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Ordered raw option storage. Duplicate keys keep the last occurrence but
/// preserve the first position, so round-tripping is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionMap {
	entries: Vec<(String, String)>,
}

impl OptionMap {
	pub fn new(entries: Vec<(String, String)>) -> Self {
		let mut map = Self { entries: Vec::new() };
		for (key, value) in entries {
			map.set(key, value);
		}
		map
	}

	pub fn set(&mut self, key: String, value: String) {
		if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
			existing.1 = value;
		} else {
			self.entries.push((key, value));
		}
	}

	pub fn remove(&mut self, key: &str) -> Option<String> {
		let index = self.entries.iter().position(|(k, _)| k == key)?;
		Some(self.entries.remove(index).1)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries
			.iter()
			.map(|(key, value)| (key.as_str(), value.as_str()))
	}

	pub fn get_raw(&self, key: &str) -> Option<&str> {
		self.entries
			.iter()
			.find(|(k, _)| k == key)
			.map(|(_, value)| value.as_str())
	}

	pub fn contains(&self, key: &str) -> bool {
		self.get_raw(key).is_some()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Flatten into a plain map, for sub-option merging.
	pub fn to_btree(&self) -> BTreeMap<String, String> {
		self.entries.iter().cloned().collect()
	}

	pub fn from_btree(map: BTreeMap<String, String>) -> Self {
		Self {
			entries: map.into_iter().collect(),
		}
	}

	pub fn get_string(&self, key: &str) -> Option<String> {
		self.get_raw(key).map(str::to_string)
	}

	/// Apply this entity's escape replacements (`slash=`/`semicolon=`
	/// overridable, `\\` → `/` and `^` → `;` by default) to a value.
	pub fn decode(&self, value: &str) -> String {
		super::grammar::decode_escapes(
			value,
			self.get_raw("slash")
				.unwrap_or(super::grammar::DEFAULT_SLASH_REPL),
			self.get_raw("semicolon")
				.unwrap_or(super::grammar::DEFAULT_SEMICOLON_REPL),
		)
	}

	pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
		match self.get_raw(key) {
			None => Ok(None),
			Some("true") => Ok(Some(true)),
			Some("false") => Ok(Some(false)),
			Some(other) => Err(ConfigError::invalid(key, other)),
		}
	}

	pub fn get_u32(&self, key: &str) -> Result<Option<u32>> {
		self.parse_with(key, str::parse)
	}

	pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
		self.parse_with(key, str::parse)
	}

	pub fn get_i32(&self, key: &str) -> Result<Option<i32>> {
		self.parse_with(key, str::parse)
	}

	pub fn get_u8_percent(&self, key: &str) -> Result<Option<u8>> {
		match self.get_u32(key)? {
			None => Ok(None),
			Some(value) if value <= 100 => Ok(Some(value as u8)),
			Some(value) => Err(ConfigError::invalid(key, &value.to_string())),
		}
	}

	pub fn get_dimension(&self, key: &str) -> Result<Option<Dimension>> {
		self.parse_with(key, |value| Dimension::parse(value).map_err(|_| ()))
	}

	pub fn get_angle(&self, key: &str) -> Result<Option<Angle>> {
		self.parse_with(key, |value| Angle::parse(value).map_err(|_| ()))
	}

	pub fn get_color(&self, key: &str) -> Result<Option<Color>> {
		self.parse_with(key, |value| parse_color(value).map_err(|_| ()))
	}

	/// `margin=top,right,bottom,left`.
	pub fn get_margins(&self, key: &str) -> Result<Option<Margins>> {
		let Some(value) = self.get_raw(key) else {
			return Ok(None);
		};
		let parts = self.dimension_list(key, value)?;
		let [top, right, bottom, left]: [Dimension; 4] = parts
			.try_into()
			.map_err(|_| ConfigError::WrongArity {
				key: key.to_string(),
				expected: 4,
			})?;
		Ok(Some(Margins {
			top,
			right,
			bottom,
			left,
		}))
	}

	/// `crop=left,top,right,bottom`.
	pub fn get_crop(&self, key: &str) -> Result<Option<CropBox>> {
		let Some(value) = self.get_raw(key) else {
			return Ok(None);
		};
		let parts = self.dimension_list(key, value)?;
		let [left, top, right, bottom]: [Dimension; 4] = parts
			.try_into()
			.map_err(|_| ConfigError::WrongArity {
				key: key.to_string(),
				expected: 4,
			})?;
		Ok(Some(CropBox {
			left,
			top,
			right,
			bottom,
		}))
	}

	/// `coords=x1,y1[,x2,y2…]` — any even number of values.
	pub fn get_coords(&self, key: &str) -> Result<Option<Vec<Dimension>>> {
		let Some(value) = self.get_raw(key) else {
			return Ok(None);
		};
		let parts = self.dimension_list(key, value)?;
		if parts.is_empty() || parts.len() % 2 != 0 {
			return Err(ConfigError::invalid(key, value));
		}
		Ok(Some(parts))
	}

	/// `angles=start,end`.
	pub fn get_angles(&self, key: &str) -> Result<Option<(Angle, Angle)>> {
		let Some(value) = self.get_raw(key) else {
			return Ok(None);
		};
		let parts: Vec<&str> = value.split(',').collect();
		if parts.len() != 2 {
			return Err(ConfigError::WrongArity {
				key: key.to_string(),
				expected: 2,
			});
		}
		let start = Angle::parse(parts[0]).map_err(|_| ConfigError::invalid(key, value))?;
		let end = Angle::parse(parts[1]).map_err(|_| ConfigError::invalid(key, value))?;
		Ok(Some((start, end)))
	}

	/// `disabled[=bool]` with the `enabled[=bool]` synonym; configuring both
	/// is an error.
	pub fn disabled(&self) -> Result<bool> {
		let disabled = self.get_bool("disabled")?;
		let enabled = self.get_bool("enabled")?;
		match (disabled, enabled) {
			(Some(_), Some(_)) => Err(ConfigError::Conflicting(
				"disabled".to_string(),
				"enabled".to_string(),
			)),
			(Some(disabled), None) => Ok(disabled),
			(None, Some(enabled)) => Ok(!enabled),
			(None, None) => Ok(false),
		}
	}

	/// Reject combinations like `draw` + `file` that select two sources.
	pub fn at_most_one_of(&self, keys: &[&str]) -> Result<()> {
		let present: Vec<&&str> = keys.iter().filter(|key| self.contains(key)).collect();
		if present.len() > 1 {
			return Err(ConfigError::Conflicting(
				present[0].to_string(),
				present[1].to_string(),
			));
		}
		Ok(())
	}

	fn dimension_list(&self, key: &str, value: &str) -> Result<Vec<Dimension>> {
		value
			.split(',')
			.map(|part| Dimension::parse(part).map_err(|_| ConfigError::invalid(key, value)))
			.collect()
	}

	fn parse_with<T, E>(
		&self,
		key: &str,
		parse: impl Fn(&str) -> std::result::Result<T, E>,
	) -> Result<Option<T>> {
		match self.get_raw(key) {
			None => Ok(None),
			Some(value) => parse(value)
				.map(Some)
				.map_err(|_| ConfigError::invalid(key, value)),
		}
	}
}
