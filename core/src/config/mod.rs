//! Filename configuration parsing
//!
//! Every entity is configured entirely through its file or directory name:
//! `BASENAME[;option=value;…]`. This module owns the grammar (what a name
//! means) and the typed extraction of option values.

mod grammar;
mod options;

pub use grammar::{
	decode_escapes, format_name, is_valid_var_name, merge_indexed, parse_name, BaseName,
	ParsedName, DEFAULT_SEMICOLON_REPL, DEFAULT_SLASH_REPL,
};
pub use options::{ConfigError, OptionMap};
