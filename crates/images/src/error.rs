use std::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("there was an i/o error at path '{}': {0}", .1.display())]
	Io(std::io::Error, Box<Path>),

	#[error("the image provided is too large (over 20MiB)")]
	TooLarge,
	#[error("invalid color: {0}")]
	InvalidColor(String),
	#[error("invalid dimension: {0}")]
	InvalidDimension(String),
	#[error("drawing needs at least {expected} coordinates, got {got}")]
	NotEnoughCoordinates { expected: usize, got: usize },
	#[error("failed to allocate a pixel buffer")]
	PixmapAllocation,
	#[error("no usable font matched the request")]
	FontUnavailable,

	#[error("error while loading the image (via the `image` crate): {0}")]
	Image(#[from] image::ImageError),
	#[error("error while parsing generated svg: {0}")]
	Svg(#[from] resvg::usvg::Error),
}
