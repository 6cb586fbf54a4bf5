use std::path::PathBuf;

use thiserror::Error;

use crate::{config::ConfigError, expr::ExprError};

pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy. Most variants are recoverable per entity: the
/// offending key renders blank and everything else keeps running.
#[derive(Debug, Error)]
pub enum Error {
	#[error("ill-formed configuration: {0}")]
	Config(#[from] ConfigError),

	#[error("reference target not found: {0}")]
	UnresolvedReference(String),

	#[error("variable not defined in scope: {0}")]
	UnresolvedVariable(String),

	#[error("expression error: {0}")]
	Expr(#[from] ExprError),

	#[error("i/o error at '{}': {source}", .path.display())]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("image error: {0}")]
	Image(#[from] sdfs_images::Error),

	#[error("watcher error: {0}")]
	Watcher(#[from] sdfs_fs_watcher::WatcherError),

	#[error("device error: {0}")]
	Device(String),

	#[error("deck directory not found: {}", .0.display())]
	DeckDirectoryNotFound(PathBuf),

	#[error("cannot determine device model for '{}'", .0.display())]
	UnknownModel(PathBuf),
}

impl Error {
	pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Io {
			path: path.into(),
			source,
		}
	}
}
