//! Variable lookup and the scope cascade
//!
//! A `$VAR_X` read from a key walks key → page → deck and takes the first
//! active definition. Process environment variables are visible under their
//! `SDFS_` names. Conditional definitions evaluate their `if`/`elif` chain
//! at lookup time, which may read further variables — every name touched
//! along the way lands in the dependency set, so a change anywhere in the
//! chain invalidates the original consumer directly.

use std::{cell::RefCell, collections::BTreeSet, fs, path::PathBuf};

use tracing::debug;

use crate::{
	entity::var::{resolve_var_spec, VarSource, VarSpec},
	expr::{self, ExprError},
	model::DeckModel,
};

/// Recursion bound for variables referencing variables. Cycles hit this and
/// resolve to "undefined", never hang.
const MAX_LOOKUP_DEPTH: u8 = 16;

/// A lookup position in the tree.
#[derive(Debug, Clone, Copy)]
pub struct VarScope<'a> {
	model: &'a DeckModel,
	page: Option<u16>,
	key: Option<(u8, u8)>,
}

impl<'a> VarScope<'a> {
	pub fn deck(model: &'a DeckModel) -> Self {
		Self {
			model,
			page: None,
			key: None,
		}
	}

	pub fn page(model: &'a DeckModel, page: u16) -> Self {
		Self {
			model,
			page: Some(page),
			key: None,
		}
	}

	pub fn key(model: &'a DeckModel, page: u16, key: (u8, u8)) -> Self {
		Self {
			model,
			page: Some(page),
			key: Some(key),
		}
	}

	/// Substitute variables and evaluate `{…}` groups in one option value.
	/// The dependency set is reported even when interpolation fails, so an
	/// unresolved reference is retried once the missing variable appears.
	pub fn interpolate(&self, input: &str) -> Interpolated {
		let tracker = RefCell::new(BTreeSet::new());
		let result = interpolate_tracked(self, &tracker, input, 0);
		Interpolated {
			result,
			used: tracker.into_inner(),
		}
	}

	/// Resolve one variable (bare name, or a full `SDFS_…` environment
	/// name) to its value, if defined in scope.
	pub fn lookup(&self, name: &str) -> Option<String> {
		if name.starts_with("SDFS_") {
			return std::env::var(name).ok();
		}
		let tracker = RefCell::new(BTreeSet::new());
		resolve_bare(self, &tracker, name, 0)
	}

	/// Every variable name defined anywhere in scope, nearest scope winning
	/// — the source of the `SDFS_VAR_*` environment bundle.
	pub fn names_in_scope(&self) -> BTreeSet<String> {
		let mut names: BTreeSet<String> = self.model.vars.keys().cloned().collect();
		if let Some(page) = self.page.and_then(|number| self.model.page(number)) {
			names.extend(page.vars.keys().cloned());
			if let Some(key) = self
				.key
				.and_then(|id| page.keys.get(&id))
				.and_then(|slot| slot.active())
			{
				names.extend(key.vars.keys().cloned());
			}
		}
		names
	}

	/// The nearest active definition of `name`, walking key → page → deck.
	fn find_definition(&self, name: &str) -> Option<(PathBuf, VarSpec)> {
		if let Some(page) = self.page.and_then(|number| self.model.page(number)) {
			if let Some(key) = self
				.key
				.and_then(|id| page.keys.get(&id))
				.and_then(|slot| slot.active())
			{
				if let Some(found) = spec_from_slot(key.vars.get(name)) {
					return Some(found);
				}
			}
			if let Some(found) = spec_from_slot(page.vars.get(name)) {
				return Some(found);
			}
		}
		spec_from_slot(self.model.vars.get(name))
	}
}

fn spec_from_slot(
	slot: Option<&crate::entity::VersionSlot<crate::entity::var::VarEntity>>,
) -> Option<(PathBuf, VarSpec)> {
	let var = slot?.active()?;
	if !var.version.is_valid() {
		return None;
	}
	match resolve_var_spec(&var.version.parsed.options) {
		Ok(spec) => Some((var.version.path.clone(), spec)),
		Err(error) => {
			debug!(
				"[VAR {}] Invalid definition at '{}': {error}",
				var.name,
				var.version.path.display()
			);
			None
		}
	}
}

/// Outcome of an interpolation plus the (bare) variable names it touched.
#[derive(Debug)]
pub struct Interpolated {
	pub result: Result<String, ExprError>,
	pub used: BTreeSet<String>,
}

fn interpolate_tracked(
	scope: &VarScope<'_>,
	tracker: &RefCell<BTreeSet<String>>,
	input: &str,
	depth: u8,
) -> Result<String, ExprError> {
	// Dependencies are recorded by `resolve_bare` as lookups happen, so the
	// set survives even a failing interpolation.
	expr::interpolate(input, &mut |name| lookup_tracked(scope, tracker, name, depth))
		.map(|(out, _)| out)
}

/// Resolve a `$VAR_…`/`$SDFS_…` reference token.
fn lookup_tracked(
	scope: &VarScope<'_>,
	tracker: &RefCell<BTreeSet<String>>,
	token: &str,
	depth: u8,
) -> Option<String> {
	// System-provided values come straight from the process environment.
	if token.starts_with("SDFS_") {
		return std::env::var(token).ok();
	}
	let name = token.strip_prefix("VAR_")?;
	resolve_bare(scope, tracker, name, depth)
}

fn resolve_bare(
	scope: &VarScope<'_>,
	tracker: &RefCell<BTreeSet<String>>,
	name: &str,
	depth: u8,
) -> Option<String> {
	if depth >= MAX_LOOKUP_DEPTH {
		debug!("[VAR {name}] Lookup recursion exceeded {MAX_LOOKUP_DEPTH} levels, giving up");
		return None;
	}
	tracker.borrow_mut().insert(name.to_string());

	let (path, spec) = scope.find_definition(name)?;

	// Conditional chain first: the first true condition selects its value.
	let raw_value = if spec.branches.is_empty() {
		read_source(&path, &spec.source)?
	} else {
		let mut selected = None;
		for branch in &spec.branches {
			let condition = interpolate_tracked(scope, tracker, &branch.condition, depth + 1)
				.map_err(|error| {
					debug!("[VAR {name}] Condition failed: {error}");
					error
				})
				.ok()?;
			let truthy = match crate::expr::evaluate(&condition) {
				Ok(value) => value.is_truthy(),
				// A bare substituted value is its own truth.
				Err(_) => !condition.trim().is_empty() && condition.trim() != "false",
			};
			if truthy {
				selected = Some(branch.then.clone());
				break;
			}
		}
		match selected.or_else(|| spec.else_value.clone()) {
			Some(value) => value,
			// No branch matched and no `else`: undefined.
			None => return None,
		}
	};

	// Values may themselves contain `$VAR` references.
	interpolate_tracked(scope, tracker, &raw_value, depth + 1).ok()
}

fn read_source(path: &PathBuf, source: &VarSource) -> Option<String> {
	match source {
		VarSource::Value(value) => Some(value.clone()),
		VarSource::SelfContent => fs::read_to_string(path)
			.ok()
			.map(|content| content.trim().to_string()),
		VarSource::File(target) => {
			let target_path = {
				let target = PathBuf::from(target);
				if target.is_absolute() {
					target
				} else {
					path.parent()?.join(target)
				}
			};
			fs::read_to_string(target_path)
				.ok()
				.map(|content| content.trim().to_string())
		}
	}
}

#[cfg(test)]
mod tests {
	use std::fs;
	use std::path::Path;

	use super::*;
	use crate::model::DeckModel;

	fn touch(path: &Path) {
		fs::write(path, "").expect("write");
	}

	fn scanned(root: &Path) -> DeckModel {
		let mut model = DeckModel::new(root.to_path_buf(), "TESTSERIAL01".to_string(), 3, 5);
		model.scan();
		model
	}

	#[test]
	fn cascade_prefers_the_nearest_scope() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,2")).expect("mkdirs");
		touch(&dir.path().join("VAR_COLOR;value=red"));
		touch(&dir.path().join("PAGE_1/KEY_1,1/VAR_COLOR;value=blue"));
		let model = scanned(dir.path());

		let on_key = VarScope::key(&model, 1, (1, 1));
		assert_eq!(on_key.lookup("COLOR").as_deref(), Some("blue"));

		let other_key = VarScope::key(&model, 1, (1, 2));
		assert_eq!(other_key.lookup("COLOR").as_deref(), Some("red"));

		let on_deck = VarScope::deck(&model);
		assert_eq!(on_deck.lookup("COLOR").as_deref(), Some("red"));
	}

	#[test]
	fn file_content_is_a_value_source() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::write(dir.path().join("VAR_GREETING"), "hello there\n").expect("write");
		let model = scanned(dir.path());

		assert_eq!(
			VarScope::deck(&model).lookup("GREETING").as_deref(),
			Some("hello there")
		);
	}

	#[test]
	fn values_may_reference_other_variables() {
		let dir = tempfile::tempdir().expect("tempdir");
		touch(&dir.path().join("VAR_WHO;value=world"));
		touch(&dir.path().join("VAR_MSG;value=hello $VAR_WHO"));
		let model = scanned(dir.path());

		let scope = VarScope::deck(&model);
		assert_eq!(scope.lookup("MSG").as_deref(), Some("hello world"));

		let interpolated = scope.interpolate("$VAR_MSG!");
		assert_eq!(interpolated.result.unwrap(), "hello world!");
		assert!(interpolated.used.contains("MSG"));
		assert!(interpolated.used.contains("WHO"));
	}

	#[test]
	fn conditional_variables_select_by_expression() {
		let dir = tempfile::tempdir().expect("tempdir");
		touch(&dir.path().join("VAR_A;value=1"));
		touch(&dir.path().join("VAR_STATE;if={$VAR_A==1};then=on;else=off"));
		let model = scanned(dir.path());
		assert_eq!(VarScope::deck(&model).lookup("STATE").as_deref(), Some("on"));

		let dir2 = tempfile::tempdir().expect("tempdir");
		touch(&dir2.path().join("VAR_A;value=0"));
		touch(&dir2.path().join("VAR_STATE;if={$VAR_A==1};then=on;else=off"));
		let model2 = scanned(dir2.path());
		assert_eq!(
			VarScope::deck(&model2).lookup("STATE").as_deref(),
			Some("off")
		);
	}

	#[test]
	fn conditional_without_match_or_else_is_undefined() {
		let dir = tempfile::tempdir().expect("tempdir");
		touch(&dir.path().join("VAR_A;value=0"));
		touch(&dir.path().join("VAR_STATE;if={$VAR_A==1};then=on"));
		let model = scanned(dir.path());
		assert_eq!(VarScope::deck(&model).lookup("STATE"), None);
	}

	#[test]
	fn condition_dependencies_are_tracked_transitively() {
		let dir = tempfile::tempdir().expect("tempdir");
		touch(&dir.path().join("VAR_A;value=1"));
		touch(&dir.path().join("VAR_STATE;if={$VAR_A==1};then=on;else=off"));
		let model = scanned(dir.path());

		let interpolated = VarScope::deck(&model).interpolate("$VAR_STATE");
		assert_eq!(interpolated.result.unwrap(), "on");
		assert!(interpolated.used.contains("STATE"));
		assert!(interpolated.used.contains("A"));
	}

	#[test]
	fn failed_interpolation_still_reports_dependencies() {
		let dir = tempfile::tempdir().expect("tempdir");
		let model = scanned(dir.path());
		let interpolated = VarScope::deck(&model).interpolate("$VAR_MISSING");
		assert!(interpolated.result.is_err());
		assert!(interpolated.used.contains("MISSING"));
	}

	#[test]
	fn reference_cycles_resolve_to_undefined() {
		let dir = tempfile::tempdir().expect("tempdir");
		touch(&dir.path().join("VAR_X;value=$VAR_Y"));
		touch(&dir.path().join("VAR_Y;value=$VAR_X"));
		let model = scanned(dir.path());
		assert_eq!(VarScope::deck(&model).lookup("X"), None);
	}

	#[test]
	fn environment_variables_are_visible_under_their_prefix() {
		let dir = tempfile::tempdir().expect("tempdir");
		let model = scanned(dir.path());
		std::env::set_var("SDFS_TEST_MARKER", "42");
		assert_eq!(
			VarScope::deck(&model).lookup("SDFS_TEST_MARKER").as_deref(),
			Some("42")
		);
	}

	#[test]
	fn disabled_definitions_are_skipped() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("VAR_COLOR;value=red"));
		touch(&dir.path().join("PAGE_1/KEY_1,1/VAR_COLOR;value=blue;disabled"));
		let model = scanned(dir.path());

		let scope = VarScope::key(&model, 1, (1, 1));
		assert_eq!(scope.lookup("COLOR").as_deref(), Some("red"));
	}
}
