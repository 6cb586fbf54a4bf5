//! Expression evaluation and variable interpolation
//!
//! Option values may embed `$VAR_NAME` substitutions (with an optional
//! `[index]` selecting a zero-based line of a multi-line value, `-1` for the
//! last, `[#]` for the line count) and `{ expr }` arithmetic. Substitution
//! happens first, then each brace group is evaluated and spliced back in.
//!
//! The expression language is small: integers, floats, strings, booleans;
//! `+ - * / %` (true division; `||` is floor division), comparisons,
//! `and/or/not`, `in` as substring test, and the functions `int`, `float`,
//! `str`, `round`, `min`, `max`, `if(cond, a, b)` and
//! `format(value, spec)`.

mod parser;

use std::collections::BTreeSet;

use thiserror::Error;

pub use parser::evaluate;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
	#[error("syntax error: {0}")]
	Syntax(String),

	#[error("unknown identifier '{0}'")]
	UnknownIdentifier(String),

	#[error("unknown variable '{0}'")]
	UnknownVariable(String),

	#[error("division by zero")]
	DivisionByZero,

	#[error("type mismatch: {0}")]
	TypeMismatch(String),

	#[error("line index {index} out of range (value has {count} lines)")]
	IndexOutOfRange { index: i64, count: usize },

	#[error("function '{function}' called with {got} arguments, expected {expected}")]
	WrongArgCount {
		function: String,
		expected: String,
		got: usize,
	},
}

pub type Result<T> = std::result::Result<T, ExprError>;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Int(i64),
	Float(f64),
	Str(String),
	Bool(bool),
}

impl Value {
	pub fn is_truthy(&self) -> bool {
		match self {
			Self::Int(value) => *value != 0,
			Self::Float(value) => *value != 0.0,
			Self::Str(value) => !value.is_empty(),
			Self::Bool(value) => *value,
		}
	}

	fn type_name(&self) -> &'static str {
		match self {
			Self::Int(_) => "int",
			Self::Float(_) => "float",
			Self::Str(_) => "str",
			Self::Bool(_) => "bool",
		}
	}
}

impl std::fmt::Display for Value {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Int(value) => write!(f, "{value}"),
			Self::Float(value) => write!(f, "{value}"),
			Self::Str(value) => write!(f, "{value}"),
			Self::Bool(value) => write!(f, "{value}"),
		}
	}
}

/// Substitute `$VAR`s, then evaluate `{ expr }` groups. Returns the final
/// string plus every variable name that was read (the dependency set).
pub fn interpolate(
	input: &str,
	lookup: &mut dyn FnMut(&str) -> Option<String>,
) -> Result<(String, BTreeSet<String>)> {
	let mut used = BTreeSet::new();
	let substituted = substitute_vars(input, lookup, &mut used)?;
	let evaluated = evaluate_braces(&substituted)?;
	Ok((evaluated, used))
}

fn substitute_vars(
	input: &str,
	lookup: &mut dyn FnMut(&str) -> Option<String>,
	used: &mut BTreeSet<String>,
) -> Result<String> {
	let mut out = String::with_capacity(input.len());
	let bytes = input.as_bytes();
	let mut position = 0;

	while position < bytes.len() {
		if bytes[position] != b'$' {
			let next = input[position..]
				.find('$')
				.map_or(input.len(), |offset| position + offset);
			out.push_str(&input[position..next]);
			position = next;
			continue;
		}

		// Only `$VAR_…` (configured variables) and `$SDFS_…` (environment)
		// are references; any other `$` passes through literally.
		let name_start = position + 1;
		let name_end = input[name_start..]
			.find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
			.map_or(input.len(), |offset| name_start + offset);
		let name = &input[name_start..name_end];
		if !(name.starts_with("VAR_") || name.starts_with("SDFS_")) {
			out.push('$');
			position = name_start;
			continue;
		}

		used.insert(name.to_string());
		let value = lookup(name).ok_or_else(|| ExprError::UnknownVariable(name.to_string()))?;

		// Optional `[index]` / `[#]` line selector.
		let mut position_after = name_end;
		if input[name_end..].starts_with('[') {
			if let Some(close) = input[name_end..].find(']') {
				let selector = &input[name_end + 1..name_end + close];
				if selector == "#" {
					out.push_str(&value.lines().count().to_string());
					position = name_end + close + 1;
					continue;
				}
				if let Ok(index) = selector.parse::<i64>() {
					let lines: Vec<&str> = value.lines().collect();
					let count = lines.len();
					let resolved = if index < 0 {
						count as i64 + index
					} else {
						index
					};
					if resolved < 0 || resolved as usize >= count {
						return Err(ExprError::IndexOutOfRange { index, count });
					}
					out.push_str(lines[resolved as usize]);
					position = name_end + close + 1;
					continue;
				}
				// Not a selector we understand: fall through, keep the
				// brackets as literal text.
				position_after = name_end;
			}
		}

		out.push_str(&value);
		position = position_after;
	}

	Ok(out)
}

fn evaluate_braces(input: &str) -> Result<String> {
	let mut out = String::with_capacity(input.len());
	let mut rest = input;

	while let Some(open) = rest.find('{') {
		out.push_str(&rest[..open]);
		let after = &rest[open + 1..];
		let Some(close) = after.find('}') else {
			return Err(ExprError::Syntax("unclosed '{'".to_string()));
		};
		let value = evaluate(&after[..close])?;
		out.push_str(&value.to_string());
		rest = &after[close + 1..];
	}
	out.push_str(rest);
	Ok(out)
}
