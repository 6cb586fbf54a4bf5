//! The watcher task: raw `notify` events in, normalized events out.

use std::{
	path::Path,
	time::{Duration, Instant},
};

use notify::{
	event::{AccessKind, AccessMode, CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode},
	Config, Event, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::{
	buffer::EventBuffer,
	event::FsEvent,
	error::{Result, WatcherError},
};

/// Tuning knobs for the watcher task.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
	/// How long a burst is held before delivery.
	pub coalesce_window: Duration,
	/// How often the buffer is checked for ready events.
	pub tick: Duration,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			coalesce_window: Duration::from_millis(50),
			tick: Duration::from_millis(25),
		}
	}
}

/// Recursive filesystem watcher delivering [`FsEvent`]s in receipt order.
pub struct FsWatcher {
	watcher: RecommendedWatcher,
	stop_tx: Option<oneshot::Sender<()>>,
}

impl FsWatcher {
	/// Create the watcher and its event stream. The returned receiver yields
	/// normalized events for every path later passed to [`Self::watch`].
	pub fn new(config: WatcherConfig) -> Result<(Self, mpsc::UnboundedReceiver<FsEvent>)> {
		let (raw_tx, raw_rx) = mpsc::unbounded_channel();
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (stop_tx, stop_rx) = oneshot::channel();

		let watcher = RecommendedWatcher::new(
			move |result: notify::Result<Event>| match result {
				Ok(event) => {
					if raw_tx.send(event).is_err() {
						error!("Tried to send a filesystem event to a closed channel");
					}
				}
				Err(e) => error!("Filesystem watch error: {e:#?}"),
			},
			Config::default(),
		)?;

		tokio::spawn(run_buffer_loop(config, raw_rx, events_tx, stop_rx));

		Ok((
			Self {
				watcher,
				stop_tx: Some(stop_tx),
			},
			events_rx,
		))
	}

	/// Watch `path` recursively.
	pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
		let path = path.as_ref();
		if !path.exists() {
			return Err(WatcherError::PathNotFound(path.to_path_buf()));
		}
		self.watcher
			.watch(path, RecursiveMode::Recursive)
			.map_err(|source| WatcherError::WatchFailed {
				path: path.to_path_buf(),
				source,
			})?;
		debug!("Now watching: {}", path.display());
		Ok(())
	}

	pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
		let path = path.as_ref();
		self.watcher
			.unwatch(path)
			.map_err(|source| WatcherError::UnwatchFailed {
				path: path.to_path_buf(),
				source,
			})?;
		debug!("Stopped watching: {}", path.display());
		Ok(())
	}
}

impl Drop for FsWatcher {
	fn drop(&mut self) {
		if let Some(stop_tx) = self.stop_tx.take() {
			// The buffer task may already be gone at shutdown.
			stop_tx.send(()).ok();
		}
	}
}

async fn run_buffer_loop(
	config: WatcherConfig,
	mut raw_rx: mpsc::UnboundedReceiver<Event>,
	events_tx: mpsc::UnboundedSender<FsEvent>,
	mut stop_rx: oneshot::Receiver<()>,
) {
	let mut buffer = EventBuffer::new(config.coalesce_window);
	let mut interval = tokio::time::interval(config.tick);
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			maybe_event = raw_rx.recv() => {
				let Some(event) = maybe_event else {
					break;
				};
				classify(&mut buffer, event, Instant::now());
			}

			_ = interval.tick() => {
				for event in buffer.drain_ready(Instant::now()) {
					if events_tx.send(event).is_err() {
						return;
					}
				}
			}

			_ = &mut stop_rx => {
				break;
			}
		}
	}

	for event in buffer.flush() {
		events_tx.send(event).ok();
	}
	debug!("Watcher buffer task stopped");
}

/// Fold a raw `notify` event into the buffer.
///
/// The mapping follows what the backends actually emit: on Linux a content
/// change surfaces as close-write, renames arrive as `From`/`To` halves (or
/// one `Both` carrying both paths), and directory-ness is only reliable on
/// create/remove kinds.
fn classify(buffer: &mut EventBuffer, event: Event, now: Instant) {
	match event.kind {
		EventKind::Create(kind) => {
			for path in event.paths {
				let is_dir = match kind {
					CreateKind::Folder => true,
					CreateKind::File => false,
					_ => path.is_dir(),
				};
				buffer.push_create(path, is_dir, now);
			}
		}

		EventKind::Modify(ModifyKind::Name(mode)) => match mode {
			RenameMode::From => {
				if let Some(path) = event.paths.into_iter().next() {
					buffer.push_rename_from(path, false, now);
				}
			}
			RenameMode::To => {
				if let Some(path) = event.paths.into_iter().next() {
					let is_dir = path.is_dir();
					buffer.push_rename_to(path, is_dir, now);
				}
			}
			RenameMode::Both => {
				let mut paths = event.paths.into_iter();
				match (paths.next(), paths.next()) {
					(Some(from), Some(to)) => {
						let is_dir = to.is_dir();
						buffer.push_rename_pair(from, to, is_dir, now);
					}
					(Some(path), None) => buffer.push_modify(path, false, now),
					_ => {}
				}
			}
			RenameMode::Any | RenameMode::Other => {
				// Unknowable half; treat each path as a content change and
				// let the consumer reconcile against its tree.
				for path in event.paths {
					if path.exists() {
						let is_dir = path.is_dir();
						buffer.push_modify(path, is_dir, now);
					} else {
						buffer.push_remove(path, false, now);
					}
				}
			}
		},

		EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any)
		| EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
			for path in event.paths {
				let is_dir = path.is_dir();
				buffer.push_modify(path, is_dir, now);
			}
		}

		EventKind::Remove(kind) => {
			for path in event.paths {
				let is_dir = matches!(kind, RemoveKind::Folder);
				buffer.push_remove(path, is_dir, now);
			}
		}

		EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
		other => warn!("Unhandled filesystem event kind: {other:?}"),
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::time::{sleep, timeout};

	use super::*;
	use crate::event::FsEventKind;

	async fn next_event_for(
		events_rx: &mut mpsc::UnboundedReceiver<FsEvent>,
		path: &Path,
	) -> FsEvent {
		timeout(Duration::from_secs(5), async {
			loop {
				let event = events_rx.recv().await.expect("event stream closed");
				if event.path == path {
					return event;
				}
			}
		})
		.await
		.expect("no event for path before timeout")
	}

	#[tokio::test]
	async fn create_file_is_reported_once() {
		let root = tempfile::tempdir().expect("tempdir");
		let (mut watcher, mut events_rx) =
			FsWatcher::new(WatcherConfig::default()).expect("watcher");
		watcher.watch(root.path()).expect("watch");

		let file_path = root.path().join("KEY_1,1");
		std::fs::write(&file_path, "x").expect("write");

		let event = next_event_for(&mut events_rx, &file_path).await;
		assert_eq!(event.kind, FsEventKind::Create);

		// The write burst must have been folded into the create.
		sleep(Duration::from_millis(150)).await;
		assert!(events_rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn rename_is_identity_preserving() {
		let root = tempfile::tempdir().expect("tempdir");
		let old_path = root.path().join("VAR_COLOR;value=red");
		std::fs::write(&old_path, "").expect("write");

		let (mut watcher, mut events_rx) =
			FsWatcher::new(WatcherConfig::default()).expect("watcher");
		watcher.watch(root.path()).expect("watch");

		let new_path = root.path().join("VAR_COLOR;value=blue");
		std::fs::rename(&old_path, &new_path).expect("rename");

		let event = next_event_for(&mut events_rx, &new_path).await;
		assert_eq!(
			event.kind,
			FsEventKind::Rename {
				from: old_path.clone()
			}
		);
	}

	#[tokio::test]
	async fn remove_is_reported() {
		let root = tempfile::tempdir().expect("tempdir");
		let file_path = root.path().join("TEXT;text=hello");
		std::fs::write(&file_path, "").expect("write");

		let (mut watcher, mut events_rx) =
			FsWatcher::new(WatcherConfig::default()).expect("watcher");
		watcher.watch(root.path()).expect("watch");

		std::fs::remove_file(&file_path).expect("remove");

		let event = next_event_for(&mut events_rx, &file_path).await;
		assert_eq!(event.kind, FsEventKind::Remove);
	}
}
