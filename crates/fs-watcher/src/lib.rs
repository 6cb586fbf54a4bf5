//! Recursive filesystem watcher for sdfs
//!
//! Wraps `notify` and emits a normalized, ordered event stream suitable for
//! driving a configuration tree:
//!
//! - **Normalization**: raw OS events (close-write, metadata, rename halves)
//!   are folded into `Create`/`Modify`/`Remove`/`Rename`.
//! - **Rename pairing**: the `From`/`To` halves emitted by inotify are paired
//!   into a single identity-preserving `Rename` event; a half left unpaired
//!   after the coalescing window degrades to `Remove`/`Create`.
//! - **Coalescing**: bursts on the same path (editor atomic saves, repeated
//!   writes) are merged within a short window before delivery, so consumers
//!   see one event per logical change.
//!
//! Events are delivered over an unbounded channel in receipt order. The
//! watcher task owns all buffering; dropping the [`FsWatcher`] stops it.

mod buffer;
mod error;
mod event;
mod watcher;

pub use buffer::EventBuffer;
pub use error::{Result, WatcherError};
pub use event::{FsEvent, FsEventKind};
pub use watcher::{FsWatcher, WatcherConfig};

// Re-exported for consumers that need to tweak recursion mode.
pub use notify::RecursiveMode;
