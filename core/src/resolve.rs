//! Option resolution
//!
//! Bridges raw entities and typed specs: follows `ref=` inheritance chains,
//! interpolates variables into option values, merges indexed sub-options,
//! and reports every variable and reference touched so the dependency graph
//! can re-run the work when an input changes.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use tracing::debug;

use crate::{
	config::{merge_indexed, OptionMap},
	entity::{
		event::{resolve_event_spec, EventRef, EventSpec},
		find_by_identifier_or_name,
		key::KeyEntity,
		layer::LayerRef,
		EventKind, Versioned,
	},
	expr::ExprError,
	model::{DeckModel, EventScope},
	vars::VarScope,
};

/// Bound on `ref=` chains (key → key → key …). Longer chains — and cycles —
/// stop resolving here and the tail is ignored.
const MAX_REF_DEPTH: usize = 4;

/// Interpolation outcome for a whole option map.
pub struct ResolvedOptions {
	pub options: OptionMap,
	pub used_vars: BTreeSet<String>,
	/// First interpolation failure, if any; the owning entity is invalid.
	pub error: Option<ExprError>,
}

/// Interpolate every option value in `scope`, then merge indexed
/// sub-options. Keys belonging to conditional variable definitions are left
/// raw — they evaluate at lookup time.
pub fn interpolate_options(scope: &VarScope<'_>, options: &OptionMap) -> ResolvedOptions {
	let mut used_vars = BTreeSet::new();
	let mut error = None;
	let mut out = Vec::new();

	for (key, value) in options.iter() {
		if key == "if" || key == "then" || key == "else" || key.starts_with("elif") || key.starts_with("then")
		{
			out.push((key.to_string(), value.to_string()));
			continue;
		}
		let interpolated = scope.interpolate(value);
		used_vars.extend(interpolated.used);
		match interpolated.result {
			Ok(resolved) => out.push((key.to_string(), resolved)),
			Err(expr_error) => {
				if error.is_none() {
					error = Some(expr_error);
				}
				out.push((key.to_string(), value.to_string()));
			}
		}
	}

	let mut merged = OptionMap::new(out).to_btree();
	merge_indexed(&mut merged);

	ResolvedOptions {
		options: OptionMap::from_btree(merged),
		used_vars,
		error,
	}
}

/// The key plus every key it (transitively) references, nearest first, with
/// the reference paths touched along the way.
pub fn key_chain<'a>(
	model: &'a DeckModel,
	page: u16,
	key: (u8, u8),
) -> (Vec<&'a KeyEntity>, HashSet<PathBuf>) {
	let mut chain = Vec::new();
	let mut refs = HashSet::new();

	let Some(mut current) = model.key(page, key) else {
		return (chain, refs);
	};
	let mut current_page = page;
	chain.push(current);

	for _ in 0..MAX_REF_DEPTH {
		let Ok(Some(key_ref)) = current.reference() else {
			break;
		};
		let target_page = match &key_ref.page {
			Some(filter) => match model.find_page(filter) {
				Some(found) => found.number,
				None => break,
			},
			None => current_page,
		};
		let target = match &key_ref.key {
			Some(filter) => model.page(target_page).and_then(|page_entity| {
				find_by_identifier_or_name(
					page_entity.keys.iter(),
					filter,
					parse_key_filter,
					|candidate| candidate.name(),
				)
			}),
			None => model.key(target_page, (current.row, current.col)),
		};
		let Some(target) = target else {
			break;
		};
		if chain.iter().any(|seen| seen.path() == target.path()) {
			break;
		}
		refs.insert(target.path().to_path_buf());
		chain.push(target);
		current = target;
		current_page = target_page;
	}

	(chain, refs)
}

fn parse_key_filter(filter: &str) -> Option<(u8, u8)> {
	let (row, col) = filter.split_once(',')?;
	Some((row.parse().ok()?, col.parse().ok()?))
}

/// Merge inherited raw options under the entity's own. An inherited indexed
/// sub-option is dropped when the child redefines the whole base option.
pub fn merge_reference_options(own: &OptionMap, inherited: &OptionMap) -> OptionMap {
	let own_map = own.to_btree();
	let mut merged = inherited.to_btree();
	merged.retain(|key, _| match key.split_once('.') {
		Some((base, _)) => !own_map.contains_key(base),
		None => true,
	});
	merged.extend(own_map);
	OptionMap::from_btree(merged)
}

/// Resolve the options of a child entity, following at most one level of
/// entity `ref=` per hop up to the depth cap. `find_target` reports every
/// path the lookup touched (the entity and its owning key), so a change to
/// any of them re-resolves this consumer.
pub fn resolve_child_options(
	model: &DeckModel,
	scope: &VarScope<'_>,
	own_options: &OptionMap,
	refs: &mut HashSet<PathBuf>,
	mut find_target: impl FnMut(&DeckModel, &LayerRef) -> Option<(Vec<PathBuf>, OptionMap)>,
) -> ResolvedOptions {
	let mut options = own_options.clone();
	let mut depth = 0;
	while let Some(raw_ref) = options.get_string("ref") {
		if depth >= MAX_REF_DEPTH {
			debug!("Reference chain deeper than {MAX_REF_DEPTH}, ignoring the tail");
			break;
		}
		depth += 1;
		options.remove("ref");
		let parsed = match LayerRef::parse(&raw_ref) {
			Ok(parsed) => parsed,
			Err(error) => {
				debug!("Ill-formed ref '{raw_ref}': {error}");
				break;
			}
		};
		let Some((target_paths, target_options)) = find_target(model, &parsed) else {
			debug!("Reference target '{raw_ref}' not found");
			break;
		};
		refs.extend(target_paths);
		options = merge_reference_options(&options, &target_options);
	}
	interpolate_options(scope, &options)
}

/// A fully-resolved event attached to its defining path.
pub struct ResolvedEvent {
	pub path: PathBuf,
	pub spec: EventSpec,
	pub used_vars: BTreeSet<String>,
}

/// Resolve the active event of a kind at some scope, walking the key's
/// reference chain for key events.
pub fn resolve_event(model: &DeckModel, scope: EventScope, kind: EventKind) -> Option<ResolvedEvent> {
	let (entity, var_scope) = match scope {
		EventScope::Deck => (
			model.events.get(&kind).and_then(|slot| slot.active()),
			VarScope::deck(model),
		),
		EventScope::Page(number) => (
			model
				.page(number)?
				.events
				.get(&kind)
				.and_then(|slot| slot.active()),
			VarScope::page(model, number),
		),
		EventScope::Key(page, key) => {
			let (chain, _) = key_chain(model, page, key);
			let entity = chain
				.iter()
				.find_map(|key_entity| key_entity.events.get(&kind).and_then(|slot| slot.active()));
			(entity, VarScope::key(model, page, key))
		}
	};
	let entity = entity?;
	if !entity.version.is_valid() {
		return None;
	}

	let mut refs = HashSet::new();
	let resolved = resolve_child_options(
		model,
		&var_scope,
		&entity.version.parsed.options,
		&mut refs,
		|model, event_ref| find_event_target(model, scope, kind, event_ref),
	);
	if let Some(error) = &resolved.error {
		debug!(
			"[EVENT {}] Interpolation failed at '{}': {error}",
			kind.as_str(),
			entity.version.path.display()
		);
		return None;
	}

	match resolve_event_spec(kind, &resolved.options) {
		Ok(spec) => Some(ResolvedEvent {
			path: entity.version.path.clone(),
			spec,
			used_vars: resolved.used_vars,
		}),
		Err(error) => {
			debug!(
				"[EVENT {}] Invalid at '{}': {error}",
				kind.as_str(),
				entity.version.path.display()
			);
			None
		}
	}
}

fn find_event_target(
	model: &DeckModel,
	scope: EventScope,
	kind: EventKind,
	event_ref: &EventRef,
) -> Option<(Vec<PathBuf>, OptionMap)> {
	let (home_page, home_key) = match scope {
		EventScope::Key(page, key) => (Some(page), Some(key)),
		EventScope::Page(page) => (Some(page), None),
		EventScope::Deck => (None, None),
	};
	let page_number = match &event_ref.page {
		Some(filter) => model.find_page(filter)?.number,
		None => home_page?,
	};
	let key_entity = match &event_ref.key {
		Some(filter) => {
			let page_entity = model.page(page_number)?;
			find_by_identifier_or_name(page_entity.keys.iter(), filter, parse_key_filter, |key| {
				key.name()
			})?
		}
		None => model.key(page_number, home_key?)?,
	};
	let target_kind = match &event_ref.target {
		Some(name) => EventKind::parse(&name.to_uppercase()).unwrap_or(kind),
		None => kind,
	};
	let event = key_entity.events.get(&target_kind)?.active()?;
	Some((
		vec![
			event.version.path.clone(),
			key_entity.path().to_path_buf(),
		],
		event.version.parsed.options.clone(),
	))
}

#[cfg(test)]
mod tests {
	use std::fs;
	use std::path::Path;

	use super::*;
	use crate::entity::event::{EventAction, ExecMode};

	fn touch(path: &Path) {
		fs::write(path, "").expect("write");
	}

	fn scanned(root: &Path) -> DeckModel {
		let mut model = DeckModel::new(root.to_path_buf(), "TESTSERIAL01".to_string(), 3, 5);
		model.scan();
		model
	}

	#[test]
	fn interpolation_resolves_variables_in_values() {
		let dir = tempfile::tempdir().expect("tempdir");
		touch(&dir.path().join("VAR_CITY;value=Paris"));
		let model = scanned(dir.path());
		let scope = VarScope::deck(&model);

		let options = crate::config::parse_name("TEXT;text=hello $VAR_CITY;color=red")
			.unwrap()
			.unwrap()
			.options;
		let resolved = interpolate_options(&scope, &options);
		assert!(resolved.error.is_none());
		assert_eq!(resolved.options.get_raw("text"), Some("hello Paris"));
		assert!(resolved.used_vars.contains("CITY"));
	}

	#[test]
	fn key_chains_follow_references() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1;ref=:2,2")).expect("mkdirs");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_2,2")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_2,2/TEXT;text=base"));
		let model = scanned(dir.path());

		let (chain, refs) = key_chain(&model, 1, (1, 1));
		assert_eq!(chain.len(), 2);
		assert_eq!((chain[1].row, chain[1].col), (2, 2));
		assert_eq!(refs.len(), 1);
	}

	#[test]
	fn reference_cycles_stop_at_the_cap() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1;ref=:2,2")).expect("mkdirs");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_2,2;ref=:1,1")).expect("mkdirs");
		let model = scanned(dir.path());

		let (chain, _) = key_chain(&model, 1, (1, 1));
		assert_eq!(chain.len(), 2);
	}

	#[test]
	fn inherited_sub_options_yield_to_redefined_bases() {
		let own = crate::config::parse_name("IMAGE;margin=0,0,0,0")
			.unwrap()
			.unwrap()
			.options;
		let inherited = crate::config::parse_name("IMAGE;margin=9,9,9,9;margin.top=5;opacity=50")
			.unwrap()
			.unwrap()
			.options;
		let merged = merge_reference_options(&own, &inherited);
		assert_eq!(merged.get_raw("margin"), Some("0,0,0,0"));
		assert!(!merged.contains("margin.top"));
		assert_eq!(merged.get_raw("opacity"), Some("50"));
	}

	#[test]
	fn key_events_resolve_through_the_chain() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1;ref=:2,2")).expect("mkdirs");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_2,2")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_2,2/ON_PRESS;command=echo hi"));
		let model = scanned(dir.path());

		let resolved = resolve_event(&model, EventScope::Key(1, (1, 1)), EventKind::Press)
			.expect("inherited event");
		assert_eq!(
			resolved.spec.action,
			EventAction::Exec(ExecMode::Command("echo hi".to_string()))
		);
	}

	#[test]
	fn disabled_events_do_not_resolve() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_1,1/ON_PRESS;command=x;disabled"));
		let model = scanned(dir.path());

		assert!(resolve_event(&model, EventScope::Key(1, (1, 1)), EventKind::Press).is_none());
	}

	#[test]
	fn variables_flow_into_event_commands() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("VAR_TARGET;value=lights"));
		touch(&dir.path().join("PAGE_1/KEY_1,1/ON_PRESS;command=toggle $VAR_TARGET"));
		let model = scanned(dir.path());

		let resolved = resolve_event(&model, EventScope::Key(1, (1, 1)), EventKind::Press)
			.expect("event");
		assert_eq!(
			resolved.spec.action,
			EventAction::Exec(ExecMode::Command("toggle lights".to_string()))
		);
		assert!(resolved.used_vars.contains("TARGET"));
	}
}
