//! Page entities: `PAGE_<n>[;name=…][;overlay][;disabled]/`

use std::collections::BTreeMap;

use super::{event::EventEntity, key::KeyEntity, var::VarEntity, EventKind, Version, VersionSlot, Versioned};
use crate::config::ConfigError;

#[derive(Debug, Clone)]
pub struct PageEntity {
	pub version: Version,
	pub number: u16,
	/// Children are owned per version: two directories claiming the same
	/// page number each carry their own keys.
	pub keys: BTreeMap<(u8, u8), VersionSlot<KeyEntity>>,
	pub events: BTreeMap<EventKind, VersionSlot<EventEntity>>,
	pub vars: BTreeMap<String, VersionSlot<VarEntity>>,
}

impl PageEntity {
	pub fn new(version: Version, number: u16) -> Self {
		Self {
			version,
			number,
			keys: BTreeMap::new(),
			events: BTreeMap::new(),
			vars: BTreeMap::new(),
		}
	}

	pub fn config(&self) -> Result<PageConfig, ConfigError> {
		let options = &self.version.parsed.options;
		Ok(PageConfig {
			name: options.get_string("name"),
			overlay: options.get_bool("overlay")?.unwrap_or(false),
			disabled: self.version.disabled,
		})
	}

	pub fn is_overlay(&self) -> bool {
		self.config().map(|config| config.overlay).unwrap_or(false)
	}

	pub fn name(&self) -> Option<&str> {
		self.version.name_option()
	}

	/// A page is navigable only when it has at least one enabled key.
	pub fn has_enabled_keys(&self) -> bool {
		self.keys.values().any(|slot| slot.active().is_some())
	}
}

impl Versioned for PageEntity {
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageConfig {
	pub name: Option<String>,
	pub overlay: bool,
	pub disabled: bool,
}
