//! The typed entity model
//!
//! Entities form a tree — deck ⊃ page ⊃ key ⊃ {image layer, text line,
//! event, variable} — where pages and decks also own variables and
//! start/end events. Each entity is born from a filename the moment the
//! watcher reports a well-formed path, and dies when the path goes away.
//!
//! Structural identity (page number, key coordinates, layer index, event
//! kind, variable name) is parsed eagerly; everything else stays raw until
//! resolution, because option values may reference variables.

pub mod event;
pub mod key;
pub mod layer;
pub mod page;
pub mod textline;
pub mod var;
mod versions;

use std::{
	path::{Path, PathBuf},
	time::SystemTime,
};

pub use versions::{VersionSlot, Versioned};

use crate::config::{ConfigError, ParsedName};

/// Event discriminator. Keys allow all five kinds; pages and decks only
/// `start`/`end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
	Press,
	LongPress,
	Release,
	Start,
	End,
}

impl EventKind {
	pub fn parse(value: &str) -> Option<Self> {
		Some(match value {
			"PRESS" => Self::Press,
			"LONGPRESS" => Self::LongPress,
			"RELEASE" => Self::Release,
			"START" => Self::Start,
			"END" => Self::End,
			_ => return None,
		})
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Press => "press",
			Self::LongPress => "longpress",
			Self::Release => "release",
			Self::Start => "start",
			Self::End => "end",
		}
	}

	pub fn allowed_on_pages_and_decks(self) -> bool {
		matches!(self, Self::Start | Self::End)
	}
}

/// The shared per-version core: where the entity lives on disk, when it was
/// last touched, and its raw parsed name. `error` carries a structural
/// parse problem (conflicting flags and the like); such a version still
/// occupies its identity but is invalid for rendering and dispatch.
#[derive(Debug, Clone)]
pub struct Version {
	pub path: PathBuf,
	pub mtime: SystemTime,
	pub parsed: ParsedName,
	pub disabled: bool,
	pub error: Option<ConfigError>,
}

impl Version {
	pub fn new(path: PathBuf, mtime: SystemTime, parsed: ParsedName) -> Self {
		let (disabled, error) = match parsed.options.disabled() {
			Ok(disabled) => (disabled, None),
			Err(error) => (false, Some(error)),
		};
		Self {
			path,
			mtime,
			parsed,
			disabled,
			error,
		}
	}

	pub fn name_option(&self) -> Option<&str> {
		self.parsed.options.get_raw("name")
	}

	pub fn is_valid(&self) -> bool {
		self.error.is_none()
	}
}

impl Versioned for Version {
	fn path(&self) -> &Path {
		&self.path
	}
	fn mtime(&self) -> SystemTime {
		self.mtime
	}
	fn disabled(&self) -> bool {
		self.disabled
	}
}

/// Find an entry by numeric/structural identifier or, failing that, by its
/// `name` option — the resolution rule shared by pages, keys, layers and
/// lines.
pub fn find_by_identifier_or_name<'a, K: Ord, T: Versioned>(
	entries: impl Iterator<Item = (&'a K, &'a VersionSlot<T>)>,
	filter: &str,
	to_identifier: impl Fn(&str) -> Option<K>,
	name_of: impl Fn(&T) -> Option<&str>,
) -> Option<&'a T>
where
	K: 'a,
	T: 'a,
{
	let entries: Vec<_> = entries.collect();

	if let Some(wanted) = to_identifier(filter) {
		if let Some((_, slot)) = entries.iter().find(|(key, _)| **key == wanted) {
			if let Some(active) = slot.active() {
				return Some(active);
			}
		}
	}

	entries
		.iter()
		.filter_map(|(_, slot)| slot.active())
		.find(|version| name_of(version) == Some(filter))
}
