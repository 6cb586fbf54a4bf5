//! Normalized filesystem event types

use std::path::PathBuf;

/// What happened to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEventKind {
	Create,
	Modify,
	Remove,
	/// The path was renamed; `from` is the previous location. The event's
	/// `path` is the new location.
	Rename { from: PathBuf },
}

/// A normalized filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
	pub path: PathBuf,
	pub kind: FsEventKind,
	/// Best-effort directory flag; `false` when the OS event did not say and
	/// the path is already gone.
	pub is_dir: bool,
}

impl FsEvent {
	pub fn create(path: impl Into<PathBuf>, is_dir: bool) -> Self {
		Self {
			path: path.into(),
			kind: FsEventKind::Create,
			is_dir,
		}
	}

	pub fn modify(path: impl Into<PathBuf>, is_dir: bool) -> Self {
		Self {
			path: path.into(),
			kind: FsEventKind::Modify,
			is_dir,
		}
	}

	pub fn remove(path: impl Into<PathBuf>, is_dir: bool) -> Self {
		Self {
			path: path.into(),
			kind: FsEventKind::Remove,
			is_dir,
		}
	}

	pub fn rename(from: impl Into<PathBuf>, to: impl Into<PathBuf>, is_dir: bool) -> Self {
		Self {
			path: to.into(),
			kind: FsEventKind::Rename { from: from.into() },
			is_dir,
		}
	}
}
