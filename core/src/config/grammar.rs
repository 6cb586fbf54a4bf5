//! The name grammar
//!
//! `BASENAME` selects the entity kind; `;key=value` pairs configure it. A
//! bare `;flag` equals `flag=true`. Option order is insignificant but
//! preserved for round-tripping. `/` cannot appear in a filename and `;` is
//! the separator, so option values use replacement sequences for both
//! (`\\` → `/` and `^` → `;` by default, both overridable per entity).

use std::collections::BTreeMap;

use crate::entity::EventKind;

use super::options::{ConfigError, OptionMap};

pub const DEFAULT_SLASH_REPL: &str = "\\\\";
pub const DEFAULT_SEMICOLON_REPL: &str = "^";

/// The entity-kind-selecting part of a filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseName {
	Page(u16),
	Key { row: u8, col: u8 },
	Image,
	Text,
	Event(EventKind),
	Var(String),
}

impl BaseName {
	/// Canonical spelling (the legacy `KEY_ROW_r_COL_c` form always
	/// normalizes to `KEY_r,c`).
	pub fn format(&self) -> String {
		match self {
			Self::Page(number) => format!("PAGE_{number}"),
			Self::Key { row, col } => format!("KEY_{row},{col}"),
			Self::Image => "IMAGE".to_string(),
			Self::Text => "TEXT".to_string(),
			Self::Event(kind) => format!("ON_{}", kind.as_str().to_uppercase()),
			Self::Var(name) => format!("VAR_{name}"),
		}
	}
}

/// A parsed filename: the base plus its raw options, order preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
	pub base: BaseName,
	pub options: OptionMap,
}

/// Parse a filename into `(kind, options)`. Returns `None` when the name
/// does not belong to the grammar at all (foreign files are simply ignored);
/// returns an error when the base matches but an option is ill-formed.
pub fn parse_name(name: &str) -> Option<Result<ParsedName, ConfigError>> {
	let mut parts = name.split(';');
	let main = parts.next()?;
	let base = parse_base(main)?;

	let mut options = Vec::new();
	for part in parts {
		if part.is_empty() {
			continue;
		}
		match part.split_once('=') {
			Some((key, value)) => {
				if key.is_empty() {
					return Some(Err(ConfigError::MalformedOption(part.to_string())));
				}
				options.push((key.to_string(), value.to_string()));
			}
			// A bare key is a boolean flag.
			None => options.push((part.to_string(), "true".to_string())),
		}
	}

	Some(Ok(ParsedName {
		base,
		options: OptionMap::new(options),
	}))
}

fn parse_base(main: &str) -> Option<BaseName> {
	if let Some(rest) = main.strip_prefix("PAGE_") {
		return rest.parse().ok().map(BaseName::Page);
	}
	if let Some(rest) = main.strip_prefix("KEY_") {
		return parse_key_coordinates(rest);
	}
	if main == "IMAGE" {
		return Some(BaseName::Image);
	}
	if main == "TEXT" {
		return Some(BaseName::Text);
	}
	if let Some(rest) = main.strip_prefix("ON_") {
		return EventKind::parse(rest).map(BaseName::Event);
	}
	if let Some(rest) = main.strip_prefix("VAR_") {
		if is_valid_var_name(rest) {
			return Some(BaseName::Var(rest.to_string()));
		}
	}
	None
}

/// `<r>,<c>` or the legacy `ROW_<r>_COL_<c>`.
fn parse_key_coordinates(rest: &str) -> Option<BaseName> {
	let (row, col) = if let Some(legacy) = rest.strip_prefix("ROW_") {
		legacy.split_once("_COL_")?
	} else {
		rest.split_once(',')?
	};
	let row: u8 = row.parse().ok()?;
	let col: u8 = col.parse().ok()?;
	if row == 0 || col == 0 {
		return None;
	}
	Some(BaseName::Key { row, col })
}

/// Variable names are uppercase alphanumeric plus underscore; they may not
/// begin with a digit or underscore nor end with an underscore. The `SDFS_`
/// prefix is reserved for system-provided values.
pub fn is_valid_var_name(name: &str) -> bool {
	let mut chars = name.chars();
	let Some(first) = chars.next() else {
		return false;
	};
	if !first.is_ascii_uppercase() {
		return false;
	}
	if name.ends_with('_') {
		return false;
	}
	if name.starts_with("SDFS_") {
		return false;
	}
	chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Compose a filename back from its parts. Flags (`true`-valued options)
/// are emitted bare, which the parser reads back identically.
pub fn format_name(base: &BaseName, options: &OptionMap) -> String {
	let mut out = base.format();
	for (key, value) in options.iter() {
		out.push(';');
		if value == "true" {
			out.push_str(key);
		} else {
			out.push_str(key);
			out.push('=');
			out.push_str(value);
		}
	}
	out
}

/// Apply the escape replacements to an option value, exactly once.
pub fn decode_escapes(value: &str, slash_repl: &str, semicolon_repl: &str) -> String {
	value
		.replace(slash_repl, "/")
		.replace(semicolon_repl, ";")
}

/// Merge indexed sub-options (`margin.top`, `coords.2`, …) into their base
/// option. A sub-option is dropped when its base is absent: a partial
/// override needs something to override.
pub fn merge_indexed(options: &mut BTreeMap<String, String>) {
	let sub_keys: Vec<String> = options
		.keys()
		.filter(|key| key.contains('.'))
		.cloned()
		.collect();

	for sub_key in sub_keys {
		let Some((base_key, selector)) = sub_key.split_once('.') else {
			continue;
		};
		// Only tuple options have indexed forms; a dotted key that is not
		// one of them is left alone (it is simply somebody else's option).
		let Some(index) = selector_index(base_key, selector) else {
			continue;
		};
		let Some(value) = options.remove(&sub_key) else {
			continue;
		};
		if let Some(base_value) = options.get(base_key) {
			let mut parts: Vec<String> = base_value.split(',').map(str::to_string).collect();
			if index < parts.len() {
				parts[index] = value;
				options.insert(base_key.to_string(), parts.join(","));
			}
		}
	}
}

/// Map a sub-option selector to a tuple index. Numeric selectors work for
/// every tuple option; `margin` and `crop` also accept side names and
/// `angles` accepts only 0/1.
fn selector_index(base_key: &str, selector: &str) -> Option<usize> {
	if let Ok(index) = selector.parse::<usize>() {
		return match base_key {
			"margin" | "crop" => (index < 4).then_some(index),
			"angles" => (index < 2).then_some(index),
			"coords" => Some(index),
			_ => None,
		};
	}
	match base_key {
		"margin" => match selector {
			"top" => Some(0),
			"right" => Some(1),
			"bottom" => Some(2),
			"left" => Some(3),
			_ => None,
		},
		"crop" => match selector {
			"left" => Some(0),
			"top" => Some(1),
			"right" => Some(2),
			"bottom" => Some(3),
			_ => None,
		},
		_ => None,
	}
}
