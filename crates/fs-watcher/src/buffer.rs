//! Event coalescing
//!
//! Holds normalized events for a short window before delivery, merging the
//! bursts that editors and shells produce for a single logical change:
//!
//! - repeated `Modify` on one path collapse into one;
//! - `Create` followed by `Modify` stays a single `Create`;
//! - `Create` followed by `Remove` inside the window cancels out;
//! - `Remove` followed by `Create` becomes `Modify` (atomic replace);
//! - a rename `From` half is held until its `To` half arrives, and degrades
//!   to `Remove` if none does before the window closes.

use std::{
	collections::VecDeque,
	path::{Path, PathBuf},
	time::{Duration, Instant},
};

use crate::event::{FsEvent, FsEventKind};

struct Slot {
	at: Instant,
	event: FsEvent,
}

struct PendingRename {
	at: Instant,
	from: PathBuf,
	is_dir: bool,
}

pub struct EventBuffer {
	window: Duration,
	pending: VecDeque<Slot>,
	renames: VecDeque<PendingRename>,
}

impl EventBuffer {
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			pending: VecDeque::new(),
			renames: VecDeque::new(),
		}
	}

	pub fn push_create(&mut self, path: PathBuf, is_dir: bool, now: Instant) {
		// A remove closely followed by a create of the same path is an
		// atomic replace: the path's identity survives.
		if self.take_pending(&path, &FsEventKind::Remove) {
			self.insert(FsEvent::modify(path, is_dir), now);
			return;
		}
		if self.refresh_pending(&path, now) {
			return;
		}
		self.insert(FsEvent::create(path, is_dir), now);
	}

	pub fn push_modify(&mut self, path: PathBuf, is_dir: bool, now: Instant) {
		if self.refresh_pending(&path, now) {
			return;
		}
		self.insert(FsEvent::modify(path, is_dir), now);
	}

	pub fn push_remove(&mut self, path: PathBuf, is_dir: bool, now: Instant) {
		if self.take_pending(&path, &FsEventKind::Create) {
			// Created and deleted inside the window: nobody needs to know.
			return;
		}
		self.take_pending(&path, &FsEventKind::Modify);
		self.insert(FsEvent::remove(path, is_dir), now);
	}

	pub fn push_rename_from(&mut self, from: PathBuf, is_dir: bool, now: Instant) {
		self.renames.push_back(PendingRename { at: now, from, is_dir });
	}

	pub fn push_rename_to(&mut self, to: PathBuf, is_dir: bool, now: Instant) {
		match self.renames.pop_front() {
			Some(pending) => self.push_rename_pair(pending.from, to, is_dir || pending.is_dir, now),
			// A rename into the tree from outside: the source was never ours.
			None => self.push_create(to, is_dir, now),
		}
	}

	pub fn push_rename_pair(&mut self, from: PathBuf, to: PathBuf, is_dir: bool, now: Instant) {
		// If the source only existed inside this window it has no identity
		// yet; collapse the whole sequence into a create of the target.
		if self.take_pending(&from, &FsEventKind::Create) {
			self.take_pending(&from, &FsEventKind::Modify);
			self.insert(FsEvent::create(to, is_dir), now);
			return;
		}
		self.take_pending(&from, &FsEventKind::Modify);
		self.insert(FsEvent::rename(from, to, is_dir), now);
	}

	/// Emit every buffered event older than the window, in receipt order.
	/// Unpaired rename sources past the window are emitted as removals.
	pub fn drain_ready(&mut self, now: Instant) -> Vec<FsEvent> {
		let mut out = Vec::new();
		while let Some(pending) = self.renames.front() {
			if now.duration_since(pending.at) < self.window {
				break;
			}
			let pending = self
				.renames
				.pop_front()
				.expect("front() just returned Some");
			out.push(FsEvent::remove(pending.from, pending.is_dir));
		}
		while let Some(slot) = self.pending.front() {
			if now.duration_since(slot.at) < self.window {
				break;
			}
			let slot = self.pending.pop_front().expect("front() just returned Some");
			out.push(slot.event);
		}
		out
	}

	/// Emit everything still buffered, regardless of age.
	pub fn flush(&mut self) -> Vec<FsEvent> {
		let mut out = self
			.renames
			.drain(..)
			.map(|pending| FsEvent::remove(pending.from, pending.is_dir))
			.collect::<Vec<_>>();
		out.extend(self.pending.drain(..).map(|slot| slot.event));
		out
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty() && self.renames.is_empty()
	}

	fn insert(&mut self, event: FsEvent, now: Instant) {
		self.pending.push_back(Slot { at: now, event });
	}

	/// Refresh the timestamp of a pending create/modify for `path`,
	/// returning whether one existed.
	fn refresh_pending(&mut self, path: &Path, now: Instant) -> bool {
		for slot in &mut self.pending {
			if slot.event.path == path
				&& matches!(slot.event.kind, FsEventKind::Create | FsEventKind::Modify)
			{
				slot.at = now;
				return true;
			}
		}
		false
	}

	fn take_pending(&mut self, path: &Path, kind: &FsEventKind) -> bool {
		if let Some(index) = self
			.pending
			.iter()
			.position(|slot| slot.event.path == path && slot.event.kind == *kind)
		{
			self.pending.remove(index);
			true
		} else {
			false
		}
	}
}
