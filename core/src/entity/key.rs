//! Key entities: `KEY_<r>,<c>[;name=…][;ref=…][;disabled]/`

use std::collections::BTreeMap;

use super::{
	event::EventEntity, layer::LayerEntity, textline::TextEntity, var::VarEntity, EventKind,
	Version, VersionSlot, Versioned,
};
use crate::config::ConfigError;

/// `ref=PAGE:KEY` — empty segments mean "same page" / "same key".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
	pub page: Option<String>,
	pub key: Option<String>,
}

impl KeyRef {
	pub fn parse(value: &str) -> Result<Self, ConfigError> {
		let (page, key) = value.split_once(':').ok_or_else(|| ConfigError::InvalidValue {
			key: "ref".to_string(),
			value: value.to_string(),
		})?;
		Ok(Self {
			page: (!page.is_empty()).then(|| page.to_string()),
			key: (!key.is_empty()).then(|| key.to_string()),
		})
	}
}

#[derive(Debug, Clone)]
pub struct KeyEntity {
	pub version: Version,
	pub row: u8,
	pub col: u8,
	pub layers: BTreeMap<i32, VersionSlot<LayerEntity>>,
	pub lines: BTreeMap<i32, VersionSlot<TextEntity>>,
	pub events: BTreeMap<EventKind, VersionSlot<EventEntity>>,
	pub vars: BTreeMap<String, VersionSlot<VarEntity>>,
}

impl KeyEntity {
	pub fn new(version: Version, row: u8, col: u8) -> Self {
		Self {
			version,
			row,
			col,
			layers: BTreeMap::new(),
			lines: BTreeMap::new(),
			events: BTreeMap::new(),
			vars: BTreeMap::new(),
		}
	}

	pub fn name(&self) -> Option<&str> {
		self.version.name_option()
	}

	pub fn reference(&self) -> Result<Option<KeyRef>, ConfigError> {
		self.version
			.parsed
			.options
			.get_raw("ref")
			.map(KeyRef::parse)
			.transpose()
	}

	/// Whether anything would be drawn or dispatched for this key.
	pub fn has_content(&self) -> bool {
		self.layers.values().any(|slot| slot.active().is_some())
			|| self.lines.values().any(|slot| slot.active().is_some())
			|| self.events.values().any(|slot| slot.active().is_some())
	}
}

impl Versioned for KeyEntity {
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
