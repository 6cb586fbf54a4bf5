//! The hardware facade
//!
//! Everything the core needs from a Stream Deck: per-key images, backlight,
//! a press/release input stream and the orientation quirk descriptor. The
//! USB HID specifics live behind implementations of [`DeckDevice`]; the
//! in-memory [`FakeDevice`] backs headless runs and tests.

use std::{
	collections::HashMap,
	path::Path,
	sync::Mutex,
	time::Instant,
};

use sdfs_images::{DeviceTransform, RgbaImage};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

pub const DEFAULT_BRIGHTNESS: u8 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
	pub model: String,
	pub serial: String,
	pub rows: u8,
	pub cols: u8,
	pub key_width: u32,
	pub key_height: u32,
	/// Pre-transform the compositor must apply to every final key bitmap.
	pub transform: DeviceTransform,
}

/// One press or release, with a monotonic timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
	pub row: u8,
	pub col: u8,
	pub pressed: bool,
	pub at: Instant,
}

/// Minimal device contract; implementations must be cheap to call from the
/// single-threaded core (writes are serialized by the caller).
pub trait DeckDevice: Send + Sync {
	fn info(&self) -> DeviceInfo;
	fn set_key_image(&self, row: u8, col: u8, image: &RgbaImage) -> Result<()>;
	fn clear_key(&self, row: u8, col: u8) -> Result<()>;
	fn set_brightness(&self, level: u8) -> Result<()>;
}

/// In-memory device: records what would be shown and lets tests (or the
/// headless runner) inject input.
pub struct FakeDevice {
	info: DeviceInfo,
	images: Mutex<HashMap<(u8, u8), RgbaImage>>,
	brightness: Mutex<u8>,
	input_tx: mpsc::UnboundedSender<KeyInput>,
}

impl FakeDevice {
	pub fn new(info: DeviceInfo) -> (Self, mpsc::UnboundedReceiver<KeyInput>) {
		let (input_tx, input_rx) = mpsc::unbounded_channel();
		(
			Self {
				info,
				images: Mutex::new(HashMap::new()),
				brightness: Mutex::new(DEFAULT_BRIGHTNESS),
				input_tx,
			},
			input_rx,
		)
	}

	pub fn standard(serial: &str) -> (Self, mpsc::UnboundedReceiver<KeyInput>) {
		Self::new(DeviceInfo {
			model: "FakeDeck".to_string(),
			serial: serial.to_string(),
			rows: 3,
			cols: 5,
			key_width: 72,
			key_height: 72,
			transform: DeviceTransform::default(),
		})
	}

	pub fn press(&self, row: u8, col: u8) {
		self.input_tx
			.send(KeyInput {
				row,
				col,
				pressed: true,
				at: Instant::now(),
			})
			.ok();
	}

	pub fn release(&self, row: u8, col: u8) {
		self.input_tx
			.send(KeyInput {
				row,
				col,
				pressed: false,
				at: Instant::now(),
			})
			.ok();
	}

	pub fn image_of(&self, row: u8, col: u8) -> Option<RgbaImage> {
		self.images
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.get(&(row, col))
			.cloned()
	}

	pub fn brightness(&self) -> u8 {
		*self
			.brightness
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
	}
}

impl DeckDevice for FakeDevice {
	fn info(&self) -> DeviceInfo {
		self.info.clone()
	}

	fn set_key_image(&self, row: u8, col: u8, image: &RgbaImage) -> Result<()> {
		self.images
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.insert((row, col), image.clone());
		Ok(())
	}

	fn clear_key(&self, row: u8, col: u8) -> Result<()> {
		self.images
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.remove(&(row, col));
		Ok(())
	}

	fn set_brightness(&self, level: u8) -> Result<()> {
		*self
			.brightness
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner) = level.min(100);
		Ok(())
	}
}

/// `.model` state file: `<model>:<rows>:<cols>:<key_width>:<key_height>`,
/// written on first run against real hardware so later headless runs know
/// the geometry.
pub fn write_model_file(deck_dir: &Path, info: &DeviceInfo) -> Result<()> {
	let path = deck_dir.join(".model");
	let content = format!(
		"{}:{}:{}:{}:{}",
		info.model, info.rows, info.cols, info.key_width, info.key_height
	);
	if std::fs::read_to_string(&path).is_ok_and(|existing| existing == content) {
		return Ok(());
	}
	std::fs::write(&path, content).map_err(|source| Error::io(path, source))
}

pub fn read_model_file(deck_dir: &Path, serial: &str) -> Result<DeviceInfo> {
	let path = deck_dir.join(".model");
	let content =
		std::fs::read_to_string(&path).map_err(|_| Error::UnknownModel(deck_dir.to_path_buf()))?;
	let parts: Vec<&str> = content.trim().split(':').collect();
	let [model, rows, cols, key_width, key_height]: [&str; 5] = parts
		.try_into()
		.map_err(|_| Error::UnknownModel(deck_dir.to_path_buf()))?;
	let parse_error = || Error::UnknownModel(deck_dir.to_path_buf());
	Ok(DeviceInfo {
		model: model.to_string(),
		serial: serial.to_string(),
		rows: rows.parse().map_err(|_| parse_error())?,
		cols: cols.parse().map_err(|_| parse_error())?,
		key_width: key_width.parse().map_err(|_| parse_error())?,
		key_height: key_height.parse().map_err(|_| parse_error())?,
		transform: DeviceTransform::default(),
	})
}
