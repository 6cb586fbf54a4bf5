//! Variable entities: `VAR_<NAME>[;opts]`
//!
//! A variable's value is its `value=` option, its file content, or the
//! content of a `file=` target. An `if`/`elif…`/`else` chain turns the
//! definition conditional: conditions are expressions evaluated in order
//! and the first true one selects its `then` value; with no match and no
//! `else`, the variable is undefined.

use super::{Version, Versioned};
use crate::config::{ConfigError, OptionMap};

/// Where the value comes from when the definition is unconditional (or as
/// the fallback content source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarSource {
	/// `value=…` in the filename (escapes already decoded).
	Value(String),
	/// The entity file's content, trimmed.
	SelfContent,
	/// `file=<path>` content, trimmed.
	File(String),
}

/// One `if`/`elif` arm: a raw condition expression and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondBranch {
	pub condition: String,
	pub then: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarSpec {
	pub source: VarSource,
	pub branches: Vec<CondBranch>,
	pub else_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VarEntity {
	pub version: Version,
	pub name: String,
}

impl VarEntity {
	pub fn new(version: Version, name: String) -> Self {
		Self { version, name }
	}
}

impl Versioned for VarEntity {
	fn path(&self) -> &std::path::Path {
		self.version.path()
	}
	fn mtime(&self) -> std::time::SystemTime {
		self.version.mtime()
	}
	fn disabled(&self) -> bool {
		self.version.disabled()
	}
}

/// Build the variable spec from raw options. Conditions stay raw here —
/// they are interpolated and evaluated at lookup time, because they may
/// reference other variables.
pub fn resolve_var_spec(options: &OptionMap) -> Result<VarSpec, ConfigError> {
	options.at_most_one_of(&["value", "file"])?;

	let source = if let Some(value) = options.get_raw("value") {
		VarSource::Value(options.decode(value))
	} else if let Some(file) = options.get_raw("file") {
		VarSource::File(options.decode(file))
	} else {
		VarSource::SelfContent
	};

	// `if`/`then`, then `elif2`/`then2`, `elif3`/`then3`, … in order.
	let mut branches = Vec::new();
	if let Some(condition) = options.get_raw("if") {
		let then = options
			.get_raw("then")
			.ok_or_else(|| ConfigError::Missing("then".to_string()))?;
		branches.push(CondBranch {
			condition: condition.to_string(),
			then: then.to_string(),
		});
		let mut index = 2;
		loop {
			let (elif_key, then_key) = (format!("elif{index}"), format!("then{index}"));
			let elif_key = if options.contains(&elif_key) {
				elif_key
			} else if index == 2 && options.contains("elif") {
				"elif".to_string()
			} else {
				break;
			};
			let condition = options
				.get_raw(&elif_key)
				.expect("presence just checked")
				.to_string();
			let then = options
				.get_raw(&then_key)
				.ok_or_else(|| ConfigError::Missing(then_key.clone()))?
				.to_string();
			branches.push(CondBranch { condition, then });
			index += 1;
		}
	}

	Ok(VarSpec {
		source,
		branches,
		else_value: options.get_string("else"),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::parse_name;

	fn options(name: &str) -> OptionMap {
		parse_name(name).unwrap().unwrap().options
	}

	#[test]
	fn plain_value_resolves() {
		let spec = resolve_var_spec(&options("VAR_COLOR;value=red")).unwrap();
		assert_eq!(spec.source, VarSource::Value("red".to_string()));
		assert!(spec.branches.is_empty());
	}

	#[test]
	fn file_content_is_the_default_source() {
		let spec = resolve_var_spec(&options("VAR_COLOR")).unwrap();
		assert_eq!(spec.source, VarSource::SelfContent);
	}

	#[test]
	fn conditional_chain_parses_in_order() {
		let spec = resolve_var_spec(&options(
			"VAR_STATE;if={$VAR_A==1};then=on;elif={$VAR_A==2};then2=half;else=off",
		))
		.unwrap();
		assert_eq!(spec.branches.len(), 2);
		assert_eq!(spec.branches[0].then, "on");
		assert_eq!(spec.branches[1].then, "half");
		assert_eq!(spec.else_value.as_deref(), Some("off"));
	}

	#[test]
	fn if_without_then_is_invalid() {
		assert!(matches!(
			resolve_var_spec(&options("VAR_X;if={1==1}")),
			Err(ConfigError::Missing(_))
		));
	}

	#[test]
	fn value_and_file_conflict() {
		assert!(resolve_var_spec(&options("VAR_X;value=1;file=y")).is_err());
	}
}
