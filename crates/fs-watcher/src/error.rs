use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatcherError>;

#[derive(Debug, Error)]
pub enum WatcherError {
	#[error("failed to watch path {path}: {source}")]
	WatchFailed {
		path: PathBuf,
		source: notify::Error,
	},

	#[error("failed to unwatch path {path}: {source}")]
	UnwatchFailed {
		path: PathBuf,
		source: notify::Error,
	},

	#[error("path does not exist: {0}")]
	PathNotFound(PathBuf),

	#[error("event channel closed")]
	ChannelClosed,

	#[error("notify error: {0}")]
	Notify(#[from] notify::Error),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}
