//! Current page, overlay stack and navigation history
//!
//! At most one non-overlay page is current; overlays stack on top of it.
//! Keys of pages under an overlay stay *displayed* (their `start` processes
//! keep running) but only the topmost key with content at a position is
//! drawn and receives input.

use tracing::{debug, info};

use crate::{
	entity::event::PageTarget,
	model::DeckModel,
};

/// Where a key stands in the visible stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyVisibility {
	/// Whether this key's page is in the visible stack at all.
	pub displayed: bool,
	/// Whether this key is the one actually drawn at its position (no key
	/// with content sits above it).
	pub on_top: bool,
	/// Number of overlays covering this key's page (0 = topmost page).
	pub overlay_level: u32,
}

#[derive(Debug, Default)]
pub struct PageController {
	/// Visit history as `(page, is_overlay)`; the last entry is current.
	history: Vec<(u16, bool)>,
	current: Option<(u16, bool)>,
	/// Visible stack, top first; the last entry is the bottom non-overlay.
	visible: Vec<u16>,
}

impl PageController {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn current_page(&self) -> Option<u16> {
		self.current.map(|(number, _)| number)
	}

	pub fn current_is_overlay(&self) -> bool {
		self.current.is_some_and(|(_, overlay)| overlay)
	}

	/// Visible stack, topmost page first.
	pub fn visible_pages(&self) -> &[u16] {
		&self.visible
	}

	pub fn is_visible(&self, number: u16) -> bool {
		self.visible.contains(&number)
	}

	/// Resolve a navigation target and switch to it. Returns the pages
	/// whose keys need re-rendering (the old and new visible sets), or
	/// `None` when nothing changed.
	pub fn go_to(&mut self, model: &DeckModel, target: &PageTarget) -> Option<Vec<u16>> {
		let before: Vec<u16> = self.visible.clone();

		let (page_number, overlay) = match target {
			PageTarget::Back => {
				if self.history.len() < 2 {
					return None;
				}
				let (number, overlay) = self.pop_history(model)?;
				debug!("Going back to page {number}");
				(number, overlay)
			}
			other => {
				let page = match other {
					PageTarget::Number(number) => navigable(model, *number)?,
					PageTarget::Name(name) => {
						let page = model.find_page(name)?;
						navigable(model, page.number)?
					}
					PageTarget::First => {
						let number = model
							.pages
							.keys()
							.copied()
							.find(|&number| navigable(model, number).is_some())?;
						navigable(model, number)?
					}
					PageTarget::Next => navigable(model, self.current_page()?.checked_add(1)?)?,
					PageTarget::Previous => {
						navigable(model, self.current_page()?.checked_sub(1)?)?
					}
					PageTarget::Back => unreachable!("handled above"),
				};
				let overlay = page.is_overlay();
				let number = page.number;
				if Some(number) == self.current_page() {
					return None;
				}
				if self.visible.contains(&number) {
					info!("Page {number} is already open");
					return None;
				}
				(number, overlay)
			}
		};

		if !matches!(target, PageTarget::Back) {
			self.push_history(page_number, overlay);
		}
		self.rebuild_visible();

		let mut affected = before;
		for number in &self.visible {
			if !affected.contains(number) {
				affected.push(*number);
			}
		}
		Some(affected)
	}

	/// The visible stack can silently lose pages when directories vanish;
	/// prune and, if the current page is gone, fall back through history.
	pub fn prune(&mut self, model: &DeckModel) -> bool {
		let current_gone = self
			.current
			.is_some_and(|(number, _)| navigable(model, number).is_none());
		if current_gone {
			if self.pop_history(model).is_some() {
				self.rebuild_visible();
			} else {
				self.current = None;
				self.visible.clear();
			}
			return true;
		}
		false
	}

	fn push_history(&mut self, number: u16, overlay: bool) {
		let entry = (number, overlay);
		if self.history.last() != Some(&entry) {
			self.history.push(entry);
		}
		self.current = Some(entry);
	}

	/// Pop history entries until a still-existing page that is not the
	/// current one surfaces.
	fn pop_history(&mut self, model: &DeckModel) -> Option<(u16, bool)> {
		while let Some(entry) = self.history.pop() {
			if Some(entry) == self.current {
				continue;
			}
			if navigable(model, entry.0).is_some() {
				self.history.push(entry);
				self.current = Some(entry);
				return Some(entry);
			}
		}
		self.current = None;
		None
	}

	/// The visible stack is the suffix of history up to (and including) the
	/// first non-overlay page, top first.
	fn rebuild_visible(&mut self) {
		self.visible.clear();
		for &(number, overlay) in self.history.iter().rev() {
			self.visible.push(number);
			if !overlay {
				break;
			}
		}
	}

	/// Visibility of one key position on one page of the stack.
	pub fn key_visibility(&self, model: &DeckModel, page: u16, key: (u8, u8)) -> KeyVisibility {
		let Some(level) = self.visible.iter().position(|&number| number == page) else {
			return KeyVisibility {
				displayed: false,
				on_top: false,
				overlay_level: 0,
			};
		};

		// A key with content on a higher page hides ours.
		let hidden = self.visible[..level].iter().any(|&above| {
			model
				.key(above, key)
				.is_some_and(|candidate| candidate.has_content())
		});

		KeyVisibility {
			displayed: true,
			on_top: !hidden,
			overlay_level: level as u32,
		}
	}
}

fn navigable(model: &DeckModel, number: u16) -> Option<&crate::entity::page::PageEntity> {
	let page = model.page(number)?;
	if !page.has_enabled_keys() {
		return None;
	}
	Some(page)
}

#[cfg(test)]
mod tests {
	use std::fs;
	use std::path::Path;

	use super::*;

	fn build_page(root: &Path, spec: &str, keys: &[&str]) {
		let page_dir = root.join(spec);
		for key in keys {
			fs::create_dir_all(page_dir.join(key)).expect("mkdirs");
		}
		fs::create_dir_all(&page_dir).expect("mkdirs");
	}

	fn scanned(root: &Path) -> DeckModel {
		let mut model = DeckModel::new(root.to_path_buf(), "TESTSERIAL01".to_string(), 3, 5);
		model.scan();
		model
	}

	#[test]
	fn plain_navigation_replaces_the_page() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_page(dir.path(), "PAGE_1", &["KEY_1,1"]);
		build_page(dir.path(), "PAGE_2", &["KEY_1,1"]);
		let model = scanned(dir.path());
		let mut controller = PageController::new();

		controller.go_to(&model, &PageTarget::First).expect("navigate");
		assert_eq!(controller.current_page(), Some(1));

		controller
			.go_to(&model, &PageTarget::Number(2))
			.expect("navigate");
		assert_eq!(controller.current_page(), Some(2));
		assert_eq!(controller.visible_pages(), &[2]);
	}

	#[test]
	fn overlays_stack_and_back_pops_them() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_page(dir.path(), "PAGE_1", &["KEY_1,1"]);
		build_page(dir.path(), "PAGE_60;overlay", &["KEY_2,2"]);
		let model = scanned(dir.path());
		let mut controller = PageController::new();

		controller.go_to(&model, &PageTarget::Number(1)).expect("navigate");
		controller.go_to(&model, &PageTarget::Number(60)).expect("overlay");

		assert_eq!(controller.current_page(), Some(60));
		assert!(controller.current_is_overlay());
		assert_eq!(controller.visible_pages(), &[60, 1]);

		// `__back__` closes the overlay; the page below is current again
		// and history holds no residue of the overlay.
		controller.go_to(&model, &PageTarget::Back).expect("back");
		assert_eq!(controller.current_page(), Some(1));
		assert_eq!(controller.visible_pages(), &[1]);
	}

	#[test]
	fn back_walks_the_page_history() {
		let dir = tempfile::tempdir().expect("tempdir");
		for page in ["PAGE_1", "PAGE_2", "PAGE_3"] {
			build_page(dir.path(), page, &["KEY_1,1"]);
		}
		let model = scanned(dir.path());
		let mut controller = PageController::new();

		for number in [1, 2, 3] {
			controller
				.go_to(&model, &PageTarget::Number(number))
				.expect("navigate");
		}
		controller.go_to(&model, &PageTarget::Back).expect("back");
		assert_eq!(controller.current_page(), Some(2));
		controller.go_to(&model, &PageTarget::Back).expect("back");
		assert_eq!(controller.current_page(), Some(1));
	}

	#[test]
	fn next_and_previous_move_by_number() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_page(dir.path(), "PAGE_1", &["KEY_1,1"]);
		build_page(dir.path(), "PAGE_2", &["KEY_1,1"]);
		let model = scanned(dir.path());
		let mut controller = PageController::new();

		controller.go_to(&model, &PageTarget::Number(1)).expect("navigate");
		controller.go_to(&model, &PageTarget::Next).expect("next");
		assert_eq!(controller.current_page(), Some(2));
		controller.go_to(&model, &PageTarget::Previous).expect("previous");
		assert_eq!(controller.current_page(), Some(1));
		assert!(controller.go_to(&model, &PageTarget::Previous).is_none());
	}

	#[test]
	fn pages_without_keys_are_not_navigable() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_page(dir.path(), "PAGE_1", &["KEY_1,1"]);
		build_page(dir.path(), "PAGE_2", &[]);
		let model = scanned(dir.path());
		let mut controller = PageController::new();

		controller.go_to(&model, &PageTarget::Number(1)).expect("navigate");
		assert!(controller.go_to(&model, &PageTarget::Number(2)).is_none());
	}

	#[test]
	fn navigation_by_name_resolves() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_page(dir.path(), "PAGE_7;name=spotify", &["KEY_1,1"]);
		let model = scanned(dir.path());
		let mut controller = PageController::new();

		controller
			.go_to(&model, &PageTarget::Name("spotify".to_string()))
			.expect("navigate");
		assert_eq!(controller.current_page(), Some(7));
	}

	#[test]
	fn keys_under_an_overlay_stay_displayed_but_not_on_top() {
		let dir = tempfile::tempdir().expect("tempdir");
		build_page(dir.path(), "PAGE_1", &["KEY_1,1", "KEY_2,2"]);
		build_page(dir.path(), "PAGE_60;overlay", &["KEY_1,1"]);
		// Give the overlay key content so it occludes the key below.
		fs::write(
			dir.path().join("PAGE_60;overlay/KEY_1,1/TEXT;text=x"),
			"",
		)
		.expect("write");
		let model = scanned(dir.path());
		let mut controller = PageController::new();

		controller.go_to(&model, &PageTarget::Number(1)).expect("navigate");
		controller.go_to(&model, &PageTarget::Number(60)).expect("overlay");

		let covered = controller.key_visibility(&model, 1, (1, 1));
		assert!(covered.displayed);
		assert!(!covered.on_top);
		assert_eq!(covered.overlay_level, 1);

		// No overlay key with content at (2,2): the base key shows through.
		let uncovered = controller.key_visibility(&model, 1, (2, 2));
		assert!(uncovered.displayed);
		assert!(uncovered.on_top);

		let overlay_key = controller.key_visibility(&model, 60, (1, 1));
		assert!(overlay_key.on_top);
		assert_eq!(overlay_key.overlay_level, 0);
	}
}
