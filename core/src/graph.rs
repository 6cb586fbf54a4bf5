//! The reactive dependency graph
//!
//! Consumers are entities (identified by their path); producers are
//! variables (identified by name) and other entities (`ref=` targets).
//! After every resolve the consumer re-registers exactly what it read, so
//! edges always reflect the last resolution.
//!
//! Invalidation walks the consumer closure. There is no cycle detection —
//! a reference cycle is bounded by the iteration cap and simply leaves the
//! entities involved invalid, never hangs the core.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Hard bound on one invalidation walk. Generous for any sane
/// configuration; only accidental cycles ever approach it.
const CLOSURE_ITERATION_CAP: usize = 10_000;

#[derive(Debug, Default)]
pub struct DependencyGraph {
	/// variable name → entity paths that read it.
	var_consumers: HashMap<String, HashSet<PathBuf>>,
	/// entity path → variable names it read (reverse edges, for cleanup).
	entity_vars: HashMap<PathBuf, BTreeSet<String>>,
	/// producer entity path → entity paths that reference it.
	ref_consumers: HashMap<PathBuf, HashSet<PathBuf>>,
	/// entity path → entity paths it references.
	entity_refs: HashMap<PathBuf, HashSet<PathBuf>>,
}

impl DependencyGraph {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace everything `consumer` depends on with the result of its
	/// latest resolve.
	pub fn set_dependencies(
		&mut self,
		consumer: &Path,
		vars: BTreeSet<String>,
		refs: HashSet<PathBuf>,
	) {
		self.remove_consumer(consumer);
		for name in &vars {
			self.var_consumers
				.entry(name.clone())
				.or_default()
				.insert(consumer.to_path_buf());
		}
		for target in &refs {
			self.ref_consumers
				.entry(target.clone())
				.or_default()
				.insert(consumer.to_path_buf());
		}
		if !vars.is_empty() {
			self.entity_vars.insert(consumer.to_path_buf(), vars);
		}
		if !refs.is_empty() {
			self.entity_refs.insert(consumer.to_path_buf(), refs);
		}
	}

	/// Forget a consumer entirely (the entity was destroyed).
	pub fn remove_consumer(&mut self, consumer: &Path) {
		if let Some(vars) = self.entity_vars.remove(consumer) {
			for name in vars {
				if let Some(consumers) = self.var_consumers.get_mut(&name) {
					consumers.remove(consumer);
					if consumers.is_empty() {
						self.var_consumers.remove(&name);
					}
				}
			}
		}
		if let Some(refs) = self.entity_refs.remove(consumer) {
			for target in refs {
				if let Some(consumers) = self.ref_consumers.get_mut(&target) {
					consumers.remove(consumer);
					if consumers.is_empty() {
						self.ref_consumers.remove(&target);
					}
				}
			}
		}
	}

	/// Every entity that (transitively) consumed any of the given variable
	/// names, in deterministic (path-sorted) order.
	pub fn consumers_of_vars<'a>(
		&self,
		names: impl IntoIterator<Item = &'a str>,
	) -> Vec<PathBuf> {
		let seeds: Vec<PathBuf> = names
			.into_iter()
			.flat_map(|name| self.var_consumers.get(name).into_iter().flatten())
			.cloned()
			.collect();
		self.closure(seeds)
	}

	/// Every entity that (transitively) references any of the given entity
	/// paths, including the seeds themselves, path-sorted.
	pub fn closure(&self, seeds: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
		let mut visited: BTreeSet<PathBuf> = BTreeSet::new();
		let mut queue: Vec<PathBuf> = seeds.into_iter().collect();
		let mut iterations = 0;

		while let Some(path) = queue.pop() {
			iterations += 1;
			if iterations > CLOSURE_ITERATION_CAP {
				warn!(
					"Dependency closure exceeded {CLOSURE_ITERATION_CAP} iterations; \
					 a reference cycle is likely. Truncating the walk."
				);
				break;
			}
			if !visited.insert(path.clone()) {
				continue;
			}
			if let Some(consumers) = self.ref_consumers.get(&path) {
				queue.extend(consumers.iter().cloned());
			}
		}

		visited.into_iter().collect()
	}

	pub fn has_consumers(&self, producer: &Path) -> bool {
		self.ref_consumers
			.get(producer)
			.is_some_and(|consumers| !consumers.is_empty())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn path(name: &str) -> PathBuf {
		PathBuf::from(name)
	}

	#[test]
	fn var_changes_reach_their_consumers() {
		let mut graph = DependencyGraph::new();
		graph.set_dependencies(
			&path("/k1/TEXT"),
			BTreeSet::from(["VAR_A".to_string()]),
			HashSet::new(),
		);
		graph.set_dependencies(
			&path("/k2/TEXT"),
			BTreeSet::from(["VAR_B".to_string()]),
			HashSet::new(),
		);

		let dirty = graph.consumers_of_vars(["VAR_A"]);
		assert_eq!(dirty, vec![path("/k1/TEXT")]);
	}

	#[test]
	fn re_registration_replaces_old_edges() {
		let mut graph = DependencyGraph::new();
		graph.set_dependencies(
			&path("/k/TEXT"),
			BTreeSet::from(["VAR_A".to_string()]),
			HashSet::new(),
		);
		graph.set_dependencies(
			&path("/k/TEXT"),
			BTreeSet::from(["VAR_B".to_string()]),
			HashSet::new(),
		);

		assert!(graph.consumers_of_vars(["VAR_A"]).is_empty());
		assert_eq!(graph.consumers_of_vars(["VAR_B"]).len(), 1);
	}

	#[test]
	fn reference_chains_propagate_transitively() {
		let mut graph = DependencyGraph::new();
		// c references b, b references a.
		graph.set_dependencies(&path("/b"), BTreeSet::new(), HashSet::from([path("/a")]));
		graph.set_dependencies(&path("/c"), BTreeSet::new(), HashSet::from([path("/b")]));

		let dirty = graph.closure([path("/a")]);
		assert_eq!(dirty, vec![path("/a"), path("/b"), path("/c")]);
	}

	#[test]
	fn cycles_terminate_instead_of_hanging() {
		let mut graph = DependencyGraph::new();
		graph.set_dependencies(&path("/a"), BTreeSet::new(), HashSet::from([path("/b")]));
		graph.set_dependencies(&path("/b"), BTreeSet::new(), HashSet::from([path("/a")]));

		let dirty = graph.closure([path("/a")]);
		assert_eq!(dirty.len(), 2);
	}

	#[test]
	fn removal_cleans_up_every_edge() {
		let mut graph = DependencyGraph::new();
		graph.set_dependencies(
			&path("/k/TEXT"),
			BTreeSet::from(["VAR_A".to_string()]),
			HashSet::from([path("/other")]),
		);
		graph.remove_consumer(&path("/k/TEXT"));

		assert!(graph.consumers_of_vars(["VAR_A"]).is_empty());
		assert!(!graph.has_consumers(&path("/other")));
	}
}
