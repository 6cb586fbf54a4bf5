/// Raster files above this size are refused outright.
pub const MAXIMUM_FILE_SIZE: u64 = 1024 * 1024 * 20;

/// Keys without content are rendered as opaque black.
pub const KEY_BACKGROUND: [u8; 4] = [0, 0, 0, 255];

/// `fit` font-size search bounds, as ratios of the bounded box width.
pub const FIT_MIN_RATIO: f32 = 0.1;
pub const FIT_MAX_RATIO: f32 = 1.2;

/// Vertical extent of a rendered text line, as a ratio of the font size.
/// Kept uniform so stacked lines share a baseline grid.
pub const LINE_HEIGHT_RATIO: f32 = 1.4;
