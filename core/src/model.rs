//! The live configuration tree
//!
//! `DeckModel` mirrors the deck directory: pages, keys and their children,
//! all keyed by structural identity with shadowed duplicate versions. The
//! only way in is [`DeckModel::apply`], fed by the watcher (plus the
//! initial scan, which synthesizes create events) — mutation order is
//! receipt order, and a rename that keeps the identity is an in-place
//! option change, never a destroy/create pair.

use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
	time::SystemTime,
};

use sdfs_fs_watcher::{FsEvent, FsEventKind};
use tracing::{debug, warn};

use crate::{
	config::{parse_name, BaseName, ParsedName},
	entity::{
		event::EventEntity, find_by_identifier_or_name, key::KeyEntity, layer::LayerEntity,
		page::PageEntity, textline::TextEntity, var::VarEntity, EventKind, Version, VersionSlot,
	},
};

/// What a model mutation affected, for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelChange {
	/// A variable definition (at any scope) appeared, changed or vanished.
	VarChanged { name: String },
	/// A key or any of its visual children changed.
	KeyChanged { page: u16, key: (u8, u8) },
	/// A page appeared, disappeared, or its own options changed.
	PageChanged { number: u16 },
	/// An event definition changed at the given scope.
	EventChanged { scope: EventScope, kind: EventKind },
	/// A deck-root state file (`.current_page` and friends) was touched.
	StateFile { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
	Deck,
	Page(u16),
	Key(u16, (u8, u8)),
}

/// What kind of thing a dependency-graph consumer path is, mapped back
/// through the tree structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumer {
	Key { page: u16, key: (u8, u8) },
	Var { name: String },
	Other,
}

#[derive(Debug)]
pub struct DeckModel {
	pub root: PathBuf,
	pub serial: String,
	pub rows: u8,
	pub cols: u8,
	pub pages: BTreeMap<u16, VersionSlot<PageEntity>>,
	pub events: BTreeMap<EventKind, VersionSlot<EventEntity>>,
	pub vars: BTreeMap<String, VersionSlot<VarEntity>>,
}

/// Deck-root state files maintained by the service, not entities.
pub const STATE_FILES: [&str; 4] = [
	".current_page",
	".set_current_page",
	".current_brightness",
	".model",
];

impl DeckModel {
	pub fn new(root: PathBuf, serial: String, rows: u8, cols: u8) -> Self {
		Self {
			root,
			serial,
			rows,
			cols,
			pages: BTreeMap::new(),
			events: BTreeMap::new(),
			vars: BTreeMap::new(),
		}
	}

	/// Enumerate the tree on startup, applying synthetic create events in
	/// sorted order so the initial state matches what the watcher would
	/// have produced.
	pub fn scan(&mut self) -> Vec<ModelChange> {
		let mut changes = Vec::new();
		for path in sorted_entries(&self.root) {
			let is_dir = path.is_dir();
			changes.extend(self.apply(&FsEvent::create(path.clone(), is_dir)));
			if is_dir {
				for child in sorted_entries(&path) {
					let child_is_dir = child.is_dir();
					changes.extend(self.apply(&FsEvent::create(child.clone(), child_is_dir)));
					if child_is_dir {
						for grandchild in sorted_entries(&child) {
							let grandchild_is_dir = grandchild.is_dir();
							changes.extend(
								self.apply(&FsEvent::create(grandchild, grandchild_is_dir)),
							);
						}
					}
				}
			}
		}
		changes
	}

	/// Apply one watcher event.
	pub fn apply(&mut self, event: &FsEvent) -> Vec<ModelChange> {
		match &event.kind {
			FsEventKind::Create | FsEventKind::Modify => self.upsert(&event.path, event.is_dir),
			FsEventKind::Remove => self.remove(&event.path),
			FsEventKind::Rename { from } => {
				// Same parent and same identity: the entity survives with
				// new options. Anything else is a move.
				if let Some(changes) = self.try_rename_in_place(from, &event.path, event.is_dir) {
					changes
				} else {
					let mut changes = self.remove(from);
					changes.extend(self.upsert(&event.path, event.is_dir));
					changes
				}
			}
		}
	}

	fn upsert(&mut self, path: &Path, is_dir: bool) -> Vec<ModelChange> {
		let (serial, rows, cols) = (self.serial.clone(), self.rows, self.cols);
		let Some(location) = self.classify(path) else {
			return Vec::new();
		};
		let name = match path.file_name().and_then(|name| name.to_str()) {
			Some(name) => name.to_string(),
			None => return Vec::new(),
		};

		if matches!(location, Location::DeckChild) && STATE_FILES.contains(&name.as_str()) {
			return vec![ModelChange::StateFile { name }];
		}

		let Some(parsed) = parse_name(&name) else {
			return Vec::new();
		};
		let parsed = match parsed {
			Ok(parsed) => parsed,
			Err(error) => {
				warn!("[{serial}] Ignoring ill-formed name '{name}': {error}");
				return Vec::new();
			}
		};

		// Directory-ness must match the entity kind.
		let wants_dir = matches!(parsed.base, BaseName::Page(_) | BaseName::Key { .. });
		if wants_dir != is_dir {
			return Vec::new();
		}

		let version = Version::new(path.to_path_buf(), mtime_of(path), parsed.clone());

		match location {
			Location::DeckChild => match parsed.base {
				BaseName::Page(number) => {
					let slot = self.pages.entry(number).or_default();
					match slot.get_mut(path) {
						Some(existing) => existing.version = version,
						None => slot.upsert(PageEntity::new(version, number)),
					}
					vec![ModelChange::PageChanged { number }]
				}
				BaseName::Var(var_name) => {
					self.vars
						.entry(var_name.clone())
						.or_default()
						.upsert(VarEntity::new(version, var_name.clone()));
					vec![ModelChange::VarChanged { name: var_name }]
				}
				BaseName::Event(kind) if kind.allowed_on_pages_and_decks() => {
					self.events
						.entry(kind)
						.or_default()
						.upsert(EventEntity::new(version, kind));
					vec![ModelChange::EventChanged {
						scope: EventScope::Deck,
						kind,
					}]
				}
				_ => {
					debug!("[{serial}] '{name}' is not valid at deck level");
					Vec::new()
				}
			},

			Location::PageChild { page } => {
				let Some(page_entity) = self.page_by_dir_mut(&page) else {
					return Vec::new();
				};
				let number = page_entity.number;
				match parsed.base {
					BaseName::Key { row, col } => {
						if row > rows || col > cols {
							warn!("[{serial}] KEY_{row},{col} is outside the {rows}x{cols} grid");
							return Vec::new();
						}
						let slot = page_entity.keys.entry((row, col)).or_default();
						match slot.get_mut(path) {
							Some(existing) => existing.version = version,
							None => slot.upsert(KeyEntity::new(version, row, col)),
						}
						vec![ModelChange::KeyChanged {
							page: number,
							key: (row, col),
						}]
					}
					BaseName::Var(var_name) => {
						page_entity
							.vars
							.entry(var_name.clone())
							.or_default()
							.upsert(VarEntity::new(version, var_name.clone()));
						vec![ModelChange::VarChanged { name: var_name }]
					}
					BaseName::Event(kind) if kind.allowed_on_pages_and_decks() => {
						page_entity
							.events
							.entry(kind)
							.or_default()
							.upsert(EventEntity::new(version, kind));
						vec![ModelChange::EventChanged {
							scope: EventScope::Page(number),
							kind,
						}]
					}
					_ => Vec::new(),
				}
			}

			Location::KeyChild { page, key } => {
				let Some((number, key_entity)) = self.key_by_dirs_mut(&page, &key) else {
					return Vec::new();
				};
				let key_id = (key_entity.row, key_entity.col);
				match parsed.base {
					BaseName::Image => {
						let layer = layer_index(&parsed);
						key_entity
							.layers
							.entry(layer)
							.or_default()
							.upsert(LayerEntity::new(version, layer));
						vec![ModelChange::KeyChanged {
							page: number,
							key: key_id,
						}]
					}
					BaseName::Text => {
						let line = line_index(&parsed);
						key_entity
							.lines
							.entry(line)
							.or_default()
							.upsert(TextEntity::new(version, line));
						vec![ModelChange::KeyChanged {
							page: number,
							key: key_id,
						}]
					}
					BaseName::Event(kind) => {
						key_entity
							.events
							.entry(kind)
							.or_default()
							.upsert(EventEntity::new(version, kind));
						vec![ModelChange::EventChanged {
							scope: EventScope::Key(number, key_id),
							kind,
						}]
					}
					BaseName::Var(var_name) => {
						key_entity
							.vars
							.entry(var_name.clone())
							.or_default()
							.upsert(VarEntity::new(version, var_name.clone()));
						vec![ModelChange::VarChanged { name: var_name }]
					}
					_ => Vec::new(),
				}
			}
		}
	}

	fn remove(&mut self, path: &Path) -> Vec<ModelChange> {
		let Some(location) = self.classify(path) else {
			return Vec::new();
		};
		let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
			return Vec::new();
		};
		if matches!(location, Location::DeckChild) && STATE_FILES.contains(&name) {
			return vec![ModelChange::StateFile {
				name: name.to_string(),
			}];
		}
		let Some(Ok(parsed)) = parse_name(name) else {
			return Vec::new();
		};

		match location {
			Location::DeckChild => match parsed.base {
				BaseName::Page(number) => {
					if let Some(slot) = self.pages.get_mut(&number) {
						slot.remove(path);
						if slot.is_empty() {
							self.pages.remove(&number);
						}
						return vec![ModelChange::PageChanged { number }];
					}
					Vec::new()
				}
				BaseName::Var(var_name) => {
					if let Some(slot) = self.vars.get_mut(&var_name) {
						slot.remove(path);
						if slot.is_empty() {
							self.vars.remove(&var_name);
						}
						return vec![ModelChange::VarChanged { name: var_name }];
					}
					Vec::new()
				}
				BaseName::Event(kind) => {
					if let Some(slot) = self.events.get_mut(&kind) {
						slot.remove(path);
						if slot.is_empty() {
							self.events.remove(&kind);
						}
						return vec![ModelChange::EventChanged {
							scope: EventScope::Deck,
							kind,
						}];
					}
					Vec::new()
				}
				_ => Vec::new(),
			},

			Location::PageChild { page } => {
				let Some(page_entity) = self.page_by_dir_mut(&page) else {
					return Vec::new();
				};
				let number = page_entity.number;
				match parsed.base {
					BaseName::Key { row, col } => {
						if let Some(slot) = page_entity.keys.get_mut(&(row, col)) {
							slot.remove(path);
							if slot.is_empty() {
								page_entity.keys.remove(&(row, col));
							}
							return vec![ModelChange::KeyChanged {
								page: number,
								key: (row, col),
							}];
						}
						Vec::new()
					}
					BaseName::Var(var_name) => {
						if let Some(slot) = page_entity.vars.get_mut(&var_name) {
							slot.remove(path);
							if slot.is_empty() {
								page_entity.vars.remove(&var_name);
							}
							return vec![ModelChange::VarChanged { name: var_name }];
						}
						Vec::new()
					}
					BaseName::Event(kind) => {
						if let Some(slot) = page_entity.events.get_mut(&kind) {
							slot.remove(path);
							if slot.is_empty() {
								page_entity.events.remove(&kind);
							}
							return vec![ModelChange::EventChanged {
								scope: EventScope::Page(number),
								kind,
							}];
						}
						Vec::new()
					}
					_ => Vec::new(),
				}
			}

			Location::KeyChild { page, key } => {
				let Some((number, key_entity)) = self.key_by_dirs_mut(&page, &key) else {
					return Vec::new();
				};
				let key_id = (key_entity.row, key_entity.col);
				let key_changed = vec![ModelChange::KeyChanged {
					page: number,
					key: key_id,
				}];
				match parsed.base {
					BaseName::Image => {
						let layer = layer_index(&parsed);
						if let Some(slot) = key_entity.layers.get_mut(&layer) {
							slot.remove(path);
							if slot.is_empty() {
								key_entity.layers.remove(&layer);
							}
							return key_changed;
						}
						Vec::new()
					}
					BaseName::Text => {
						let line = line_index(&parsed);
						if let Some(slot) = key_entity.lines.get_mut(&line) {
							slot.remove(path);
							if slot.is_empty() {
								key_entity.lines.remove(&line);
							}
							return key_changed;
						}
						Vec::new()
					}
					BaseName::Event(kind) => {
						if let Some(slot) = key_entity.events.get_mut(&kind) {
							slot.remove(path);
							if slot.is_empty() {
								key_entity.events.remove(&kind);
							}
							return vec![ModelChange::EventChanged {
								scope: EventScope::Key(number, key_id),
								kind,
							}];
						}
						Vec::new()
					}
					BaseName::Var(var_name) => {
						if let Some(slot) = key_entity.vars.get_mut(&var_name) {
							slot.remove(path);
							if slot.is_empty() {
								key_entity.vars.remove(&var_name);
							}
							return vec![ModelChange::VarChanged { name: var_name }];
						}
						Vec::new()
					}
					_ => Vec::new(),
				}
			}
		}
	}

	/// Handle a rename that keeps parent and identity: the version mutates
	/// in place (same entity, new options). Returns `None` when identities
	/// differ and the caller must fall back to remove + create.
	fn try_rename_in_place(
		&mut self,
		from: &Path,
		to: &Path,
		is_dir: bool,
	) -> Option<Vec<ModelChange>> {
		if from.parent() != to.parent() {
			return None;
		}
		let old_name = from.file_name()?.to_str()?;
		let new_name = to.file_name()?.to_str()?;
		let old_parsed = parse_name(old_name)?.ok()?;
		let new_parsed = parse_name(new_name)?.ok()?;
		if !same_identity(&old_parsed.base, &new_parsed.base) {
			return None;
		}

		// Re-slot under the new path by removing and re-inserting; identity
		// is unchanged so consumers keep finding the same entity.
		let mut changes = self.remove(from);
		changes.extend(self.upsert(to, is_dir));
		changes.dedup();
		Some(changes)
	}

	/// What a dependency-graph consumer path corresponds to in the tree.
	pub fn classify_consumer(&self, path: &Path) -> Consumer {
		let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
			return Consumer::Other;
		};
		if let Some(Ok(parsed)) = parse_name(name) {
			if let BaseName::Var(var_name) = parsed.base {
				return Consumer::Var { name: var_name };
			}
		}
		match self.classify(path) {
			Some(Location::KeyChild { page, key }) => {
				let Some((number, key_entity)) = self.key_by_dirs(&page, &key) else {
					return Consumer::Other;
				};
				Consumer::Key {
					page: number,
					key: (key_entity.row, key_entity.col),
				}
			}
			// The key directory itself is a consumer too (its own options
			// may reference variables).
			Some(Location::PageChild { page }) => {
				let Some(Ok(page_parsed)) = parse_name(&page) else {
					return Consumer::Other;
				};
				let BaseName::Page(number) = page_parsed.base else {
					return Consumer::Other;
				};
				if let Some(Ok(parsed)) = parse_name(name) {
					if let BaseName::Key { row, col } = parsed.base {
						return Consumer::Key {
							page: number,
							key: (row, col),
						};
					}
				}
				Consumer::Other
			}
			_ => Consumer::Other,
		}
	}

	/// Resolve a page by number or name.
	pub fn find_page(&self, filter: &str) -> Option<&PageEntity> {
		find_by_identifier_or_name(
			self.pages.iter(),
			filter,
			|value| value.parse::<u16>().ok(),
			|page| page.name(),
		)
	}

	pub fn page(&self, number: u16) -> Option<&PageEntity> {
		self.pages.get(&number).and_then(VersionSlot::active)
	}

	pub fn key(&self, page: u16, key: (u8, u8)) -> Option<&KeyEntity> {
		self.page(page)?.keys.get(&key).and_then(VersionSlot::active)
	}

	fn classify(&self, path: &Path) -> Option<Location> {
		let relative = path.strip_prefix(&self.root).ok()?;
		let components: Vec<String> = relative
			.components()
			.map(|component| component.as_os_str().to_string_lossy().into_owned())
			.collect();
		match components.len() {
			1 => Some(Location::DeckChild),
			2 => Some(Location::PageChild {
				page: components[0].clone(),
			}),
			3 => Some(Location::KeyChild {
				page: components[0].clone(),
				key: components[1].clone(),
			}),
			_ => None,
		}
	}

	fn page_by_dir_mut(&mut self, page_dir: &str) -> Option<&mut PageEntity> {
		let path = self.root.join(page_dir);
		let BaseName::Page(number) = parse_name(page_dir)?.ok()?.base else {
			return None;
		};
		self.pages.get_mut(&number)?.get_mut(&path)
	}

	fn key_by_dirs_mut(&mut self, page_dir: &str, key_dir: &str) -> Option<(u16, &mut KeyEntity)> {
		let page_path = self.root.join(page_dir);
		let key_path = page_path.join(key_dir);
		let BaseName::Page(number) = parse_name(page_dir)?.ok()?.base else {
			return None;
		};
		let BaseName::Key { row, col } = parse_name(key_dir)?.ok()?.base else {
			return None;
		};
		let page = self.pages.get_mut(&number)?.get_mut(&page_path)?;
		Some((number, page.keys.get_mut(&(row, col))?.get_mut(&key_path)?))
	}

	fn key_by_dirs(&self, page_dir: &str, key_dir: &str) -> Option<(u16, &KeyEntity)> {
		let page_path = self.root.join(page_dir);
		let key_path = page_path.join(key_dir);
		let BaseName::Page(number) = parse_name(page_dir)?.ok()?.base else {
			return None;
		};
		let BaseName::Key { row, col } = parse_name(key_dir)?.ok()?.base else {
			return None;
		};
		let page = self.pages.get(&number)?.get(&page_path)?;
		Some((number, page.keys.get(&(row, col))?.get(&key_path)?))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
	DeckChild,
	PageChild { page: String },
	KeyChild { page: String, key: String },
}

fn layer_index(parsed: &ParsedName) -> i32 {
	parsed
		.options
		.get_raw("layer")
		.and_then(|value| value.parse().ok())
		.unwrap_or(-1)
}

fn line_index(parsed: &ParsedName) -> i32 {
	parsed
		.options
		.get_raw("line")
		.and_then(|value| value.parse().ok())
		.unwrap_or(-1)
}

fn same_identity(a: &BaseName, b: &BaseName) -> bool {
	match (a, b) {
		(BaseName::Page(a), BaseName::Page(b)) => a == b,
		(BaseName::Key { row: ar, col: ac }, BaseName::Key { row: br, col: bc }) => {
			ar == br && ac == bc
		}
		(BaseName::Image, BaseName::Image) | (BaseName::Text, BaseName::Text) => true,
		(BaseName::Event(a), BaseName::Event(b)) => a == b,
		(BaseName::Var(a), BaseName::Var(b)) => a == b,
		_ => false,
	}
}

/// Change time, not content mtime: a rename must bump the version so the
/// renamed file wins its slot.
fn mtime_of(path: &Path) -> SystemTime {
	#[cfg(unix)]
	{
		use std::os::unix::fs::MetadataExt;
		if let Ok(metadata) = path.metadata() {
			return SystemTime::UNIX_EPOCH
				+ std::time::Duration::new(
					metadata.ctime().max(0) as u64,
					metadata.ctime_nsec().max(0) as u32,
				);
		}
	}
	path.metadata()
		.and_then(|metadata| metadata.modified())
		.unwrap_or_else(|_| SystemTime::now())
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
	let mut entries: Vec<PathBuf> = fs::read_dir(dir)
		.map(|iter| {
			iter.filter_map(|entry| entry.ok().map(|entry| entry.path()))
				.collect()
		})
		.unwrap_or_default();
	entries.sort();
	entries
}

#[cfg(test)]
mod tests {
	use super::*;

	fn model(root: &Path) -> DeckModel {
		DeckModel::new(root.to_path_buf(), "TESTSERIAL01".to_string(), 3, 5)
	}

	fn touch(path: &Path) {
		fs::write(path, "").expect("write");
	}

	fn build_tree(root: &Path) {
		fs::create_dir_all(root.join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&root.join("PAGE_1/KEY_1,1/TEXT;text=hello"));
		touch(&root.join("PAGE_1/KEY_1,1/ON_PRESS;command=echo hi"));
		touch(&root.join("PAGE_1/VAR_COLOR;value=red"));
		touch(&root.join("VAR_COLOR;value=blue"));
		touch(&root.join("ON_START;command=init"));
	}

	#[test]
	fn scan_builds_the_tree() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_tree(dir.path());
		let mut model = model(dir.path());
		let changes = model.scan();

		assert!(model.page(1).is_some());
		assert!(model.key(1, (1, 1)).is_some());
		assert!(model.key(1, (1, 1)).unwrap().lines.contains_key(&-1));
		assert!(model.vars.contains_key("COLOR"));
		assert!(model.page(1).unwrap().vars.contains_key("COLOR"));
		assert!(model.events.contains_key(&EventKind::Start));
		assert!(changes.contains(&ModelChange::KeyChanged {
			page: 1,
			key: (1, 1)
		}));
	}

	#[test]
	fn keys_outside_the_grid_are_ignored() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_9,9")).expect("mkdirs");
		let mut model = model(dir.path());
		model.scan();
		assert!(model.page(1).unwrap().keys.is_empty());
	}

	#[test]
	fn remove_destroys_the_entity() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_tree(dir.path());
		let mut model = model(dir.path());
		model.scan();

		let text_path = dir.path().join("PAGE_1/KEY_1,1/TEXT;text=hello");
		fs::remove_file(&text_path).expect("remove");
		let changes = model.apply(&FsEvent::remove(text_path, false));

		assert!(model.key(1, (1, 1)).unwrap().lines.is_empty());
		assert_eq!(
			changes,
			vec![ModelChange::KeyChanged {
				page: 1,
				key: (1, 1)
			}]
		);
	}

	#[test]
	fn rename_preserving_identity_is_an_option_change() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_tree(dir.path());
		let mut model = model(dir.path());
		model.scan();

		let old_path = dir.path().join("VAR_COLOR;value=blue");
		let new_path = dir.path().join("VAR_COLOR;value=green");
		fs::rename(&old_path, &new_path).expect("rename");
		let changes = model.apply(&FsEvent::rename(old_path, new_path.clone(), false));

		assert_eq!(
			changes,
			vec![ModelChange::VarChanged {
				name: "COLOR".to_string()
			}]
		);
		let slot = model.vars.get("COLOR").expect("slot");
		assert_eq!(slot.iter().count(), 1);
		assert_eq!(slot.active().unwrap().version.path, new_path);
	}

	#[test]
	fn rename_changing_identity_destroys_and_creates() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_tree(dir.path());
		let mut model = model(dir.path());
		model.scan();

		let old_path = dir.path().join("VAR_COLOR;value=blue");
		let new_path = dir.path().join("VAR_OTHER;value=blue");
		fs::rename(&old_path, &new_path).expect("rename");
		let changes = model.apply(&FsEvent::rename(old_path, new_path, false));

		assert!(!model.vars.contains_key("COLOR"));
		assert!(model.vars.contains_key("OTHER"));
		assert_eq!(changes.len(), 2);
	}

	#[test]
	fn duplicate_identities_shadow_by_mtime() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		let first = dir.path().join("PAGE_1/KEY_1,1/TEXT;text=first");
		touch(&first);
		let mut model = model(dir.path());
		model.scan();

		// A second TEXT with the same (missing) line index shadows the
		// first, because its mtime is newer.
		std::thread::sleep(std::time::Duration::from_millis(20));
		let second = dir.path().join("PAGE_1/KEY_1,1/TEXT;text=second;name=n2");
		touch(&second);
		model.apply(&FsEvent::create(second.clone(), false));

		let key = model.key(1, (1, 1)).unwrap();
		let slot = key.lines.get(&-1).unwrap();
		assert_eq!(slot.iter().count(), 2);
		assert_eq!(slot.active().unwrap().version.path, second);
	}

	#[test]
	fn disabled_version_yields_to_the_shadowed_one() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		let first = dir.path().join("PAGE_1/KEY_1,1/TEXT;text=first");
		touch(&first);
		std::thread::sleep(std::time::Duration::from_millis(20));
		let second = dir.path().join("PAGE_1/KEY_1,1/TEXT;text=second;disabled");
		touch(&second);

		let mut model = model(dir.path());
		model.scan();

		let key = model.key(1, (1, 1)).unwrap();
		assert_eq!(
			key.lines.get(&-1).unwrap().active().unwrap().version.path,
			first
		);
	}

	#[test]
	fn state_files_are_reported_not_modeled() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join(".set_current_page");
		touch(&path);
		let mut model = model(dir.path());
		let changes = model.apply(&FsEvent::create(path, false));
		assert_eq!(
			changes,
			vec![ModelChange::StateFile {
				name: ".set_current_page".to_string()
			}]
		);
	}

	#[test]
	fn foreign_files_are_ignored() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("README.md");
		touch(&path);
		let mut model = model(dir.path());
		assert!(model.apply(&FsEvent::create(path, false)).is_empty());
	}

	#[test]
	fn event_kind_gating_by_scope() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1")).expect("mkdirs");
		let press = dir.path().join("ON_PRESS;command=x");
		touch(&press);
		let mut model = model(dir.path());
		// ON_PRESS is not valid at deck level.
		assert!(model.apply(&FsEvent::create(press, false)).is_empty());
		assert!(model.events.is_empty());
	}
}
