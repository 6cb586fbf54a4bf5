//! Helpers behind the CLI verbs
//!
//! Every verb works through the filesystem only: `make-dirs` scaffolds the
//! tree, `inspect` dumps the parsed model, and the brightness/current-page
//! verbs read or write the deck state files that the running service picks
//! up through the watcher.

use std::path::{Path, PathBuf};

use serde_json::json;

use crate::{
	device::{read_model_file, write_model_file, DeviceInfo},
	entity::Versioned,
	error::{Error, Result},
	model::DeckModel,
};

/// Serial numbers are twelve uppercase alphanumerics starting with a letter.
pub fn looks_like_serial(name: &str) -> bool {
	name.len() == 12
		&& name.starts_with(|c: char| c.is_ascii_uppercase())
		&& name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// `<root>/<serial>` — unless the directory already *is* the deck dir.
pub fn normalize_deck_directory(directory: &Path, serial: &str) -> PathBuf {
	if directory.file_name().and_then(|name| name.to_str()) == Some(serial) {
		directory.to_path_buf()
	} else {
		directory.join(serial)
	}
}

/// Find the deck directory to operate on: the directory itself when it
/// carries a `.model` file or a serial-shaped name, otherwise its single
/// deck-shaped child.
pub fn discover_deck_directory(directory: &Path, serial: Option<&str>) -> Result<(PathBuf, String)> {
	if let Some(serial) = serial {
		let deck_dir = normalize_deck_directory(directory, serial);
		if !deck_dir.is_dir() {
			return Err(Error::DeckDirectoryNotFound(deck_dir));
		}
		return Ok((deck_dir, serial.to_string()));
	}

	if let Some(name) = directory.file_name().and_then(|name| name.to_str()) {
		if directory.join(".model").is_file() || looks_like_serial(name) {
			return Ok((directory.to_path_buf(), name.to_string()));
		}
	}

	let mut candidates = Vec::new();
	for entry in std::fs::read_dir(directory)
		.map_err(|source| Error::io(directory.to_path_buf(), source))?
	{
		let entry = entry.map_err(|source| Error::io(directory.to_path_buf(), source))?;
		let path = entry.path();
		let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
			continue;
		};
		if path.is_dir() && (path.join(".model").is_file() || looks_like_serial(name)) {
			candidates.push((path.clone(), name.to_string()));
		}
	}
	match candidates.len() {
		1 => Ok(candidates.remove(0)),
		0 => Err(Error::DeckDirectoryNotFound(directory.to_path_buf())),
		_ => Err(Error::Device(format!(
			"{} deck directories found under '{}', pass a serial",
			candidates.len(),
			directory.display()
		))),
	}
}

/// Geometry for a deck directory: the `.model` file if present, a sensible
/// default (written back) otherwise.
pub fn deck_info(deck_dir: &Path, serial: &str) -> Result<DeviceInfo> {
	match read_model_file(deck_dir, serial) {
		Ok(info) => Ok(info),
		Err(_) => {
			let info = DeviceInfo {
				model: "FakeDeck".to_string(),
				serial: serial.to_string(),
				rows: 3,
				cols: 5,
				key_width: 72,
				key_height: 72,
				transform: Default::default(),
			};
			write_model_file(deck_dir, &info)?;
			Ok(info)
		}
	}
}

/// Scaffold `PAGE_<n>/KEY_<r>,<c>/` directories for the whole grid.
pub fn make_dirs(deck_dir: &Path, info: &DeviceInfo, pages: u16) -> Result<()> {
	for page in 1..=pages.max(1) {
		for row in 1..=info.rows {
			for col in 1..=info.cols {
				let key_dir = deck_dir
					.join(format!("PAGE_{page}"))
					.join(format!("KEY_{row},{col}"));
				std::fs::create_dir_all(&key_dir)
					.map_err(|source| Error::io(key_dir.clone(), source))?;
			}
		}
	}
	write_model_file(deck_dir, info)
}

/// Parse the tree and dump it as JSON.
pub fn inspect(deck_dir: &Path, info: &DeviceInfo) -> Result<serde_json::Value> {
	let mut model = DeckModel::new(
		deck_dir.to_path_buf(),
		info.serial.clone(),
		info.rows,
		info.cols,
	);
	model.scan();

	let pages: Vec<serde_json::Value> = model
		.pages
		.iter()
		.filter_map(|(&number, slot)| {
			let page = slot.active()?;
			let keys: Vec<serde_json::Value> = page
				.keys
				.iter()
				.filter_map(|(&(row, col), key_slot)| {
					let key = key_slot.active()?;
					Some(json!({
						"row": row,
						"col": col,
						"name": key.name(),
						"path": key.path(),
						"layers": key.layers.keys().collect::<Vec<_>>(),
						"text_lines": key.lines.keys().collect::<Vec<_>>(),
						"events": key.events.keys().map(|kind| kind.as_str()).collect::<Vec<_>>(),
						"vars": key.vars.keys().collect::<Vec<_>>(),
					}))
				})
				.collect();
			Some(json!({
				"number": number,
				"name": page.name(),
				"overlay": page.is_overlay(),
				"disabled": page.disabled(),
				"keys": keys,
			}))
		})
		.collect();

	Ok(json!({
		"serial": info.serial,
		"model": info.model,
		"rows": info.rows,
		"cols": info.cols,
		"key_width": info.key_width,
		"key_height": info.key_height,
		"pages": pages,
		"vars": model.vars.keys().collect::<Vec<_>>(),
		"events": model.events.keys().map(|kind| kind.as_str()).collect::<Vec<_>>(),
	}))
}

/// Read `.current_page`.
pub fn get_current_page(deck_dir: &Path) -> Result<String> {
	let path = deck_dir.join(".current_page");
	std::fs::read_to_string(&path).map_err(|source| Error::io(path, source))
}

/// Ask the running service to change page by dropping `.set_current_page`.
pub fn set_current_page(deck_dir: &Path, target: &str) -> Result<()> {
	let path = deck_dir.join(".set_current_page");
	std::fs::write(&path, target).map_err(|source| Error::io(path, source))
}

pub fn get_brightness(deck_dir: &Path) -> Result<u8> {
	let path = deck_dir.join(".current_brightness");
	let content = std::fs::read_to_string(&path).map_err(|source| Error::io(path.clone(), source))?;
	content
		.trim()
		.parse()
		.map_err(|_| Error::Device(format!("unreadable brightness in '{}'", path.display())))
}

pub fn set_brightness(deck_dir: &Path, level: u8) -> Result<()> {
	let path = deck_dir.join(".current_brightness");
	std::fs::write(&path, level.min(100).to_string()).map_err(|source| Error::io(path, source))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serial_shape_is_recognized() {
		assert!(looks_like_serial("AB12CD34EF56"));
		assert!(!looks_like_serial("ab12cd34ef56"));
		assert!(!looks_like_serial("1B12CD34EF56"));
		assert!(!looks_like_serial("SHORT"));
	}

	#[test]
	fn make_dirs_scaffolds_the_grid() {
		let dir = tempfile::tempdir().expect("tempdir");
		let info = deck_info(dir.path(), "TESTSERIAL01").unwrap();
		make_dirs(dir.path(), &info, 2).unwrap();

		assert!(dir.path().join("PAGE_1/KEY_1,1").is_dir());
		assert!(dir.path().join("PAGE_2/KEY_3,5").is_dir());
		assert!(dir.path().join(".model").is_file());
	}

	#[test]
	fn inspect_reports_the_tree() {
		let dir = tempfile::tempdir().expect("tempdir");
		let info = deck_info(dir.path(), "TESTSERIAL01").unwrap();
		make_dirs(dir.path(), &info, 1).unwrap();
		std::fs::write(dir.path().join("PAGE_1/KEY_1,1/TEXT;text=hi"), "").unwrap();

		let report = inspect(dir.path(), &info).unwrap();
		assert_eq!(report["rows"], 3);
		assert_eq!(report["pages"][0]["number"], 1);
		let keys = report["pages"][0]["keys"].as_array().unwrap();
		assert_eq!(keys.len(), 15);
	}

	#[test]
	fn deck_discovery_prefers_the_given_directory() {
		let dir = tempfile::tempdir().expect("tempdir");
		let deck_dir = dir.path().join("TESTSERIAL01");
		std::fs::create_dir_all(&deck_dir).unwrap();

		let (found, serial) = discover_deck_directory(dir.path(), None).unwrap();
		assert_eq!(found, deck_dir);
		assert_eq!(serial, "TESTSERIAL01");

		let (direct, _) = discover_deck_directory(&deck_dir, None).unwrap();
		assert_eq!(direct, deck_dir);
	}

	#[test]
	fn state_file_verbs_round_trip() {
		let dir = tempfile::tempdir().expect("tempdir");
		set_brightness(dir.path(), 80).unwrap();
		assert_eq!(get_brightness(dir.path()).unwrap(), 80);

		set_current_page(dir.path(), "__next__").unwrap();
		assert_eq!(
			std::fs::read_to_string(dir.path().join(".set_current_page")).unwrap(),
			"__next__"
		);
	}
}
