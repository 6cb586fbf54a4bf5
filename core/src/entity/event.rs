//! Event entities: `ON_<KIND>[;opts]`
//!
//! An event carries one primary action — run a program, switch page, adjust
//! brightness — plus any number of `VAR_…=` assignments, and the timing
//! options that drive the press/repeat state machine.

use std::time::Duration;

use super::{layer::LayerRef, EventKind, Version, Versioned};
use crate::config::{ConfigError, OptionMap};

pub const LONGPRESS_DURATION_MIN: Duration = Duration::from_millis(300);

/// How an Exec event finds its program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecMode {
	/// The entity file itself, run directly (it must be executable).
	SelfPath,
	/// `command=<line>`, run through the shell.
	Command(String),
	/// `command=__inside__`: the entity file's content, run through the
	/// shell.
	Inside,
}

/// Navigation target of a `page=` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTarget {
	Number(u16),
	Name(String),
	First,
	Next,
	Previous,
	Back,
}

impl PageTarget {
	pub fn parse(value: &str) -> Self {
		match value {
			"__first__" => Self::First,
			"__next__" => Self::Next,
			"__previous__" | "__prev__" => Self::Previous,
			"__back__" => Self::Back,
			_ => match value.parse() {
				Ok(number) => Self::Number(number),
				Err(_) => Self::Name(value.to_string()),
			},
		}
	}
}

/// The primary action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
	Exec(ExecMode),
	Page(PageTarget),
	Brightness { operation: char, level: u8 },
	/// Only `VAR_…` assignments, nothing else to run.
	None,
}

/// Destination scope of one `VAR_…=` assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetVarDest {
	/// Default: the key the event lives on (or a named page/key).
	Key {
		page: Option<String>,
		key: Option<String>,
	},
	/// `:VAR_…` — the current page (or `::page:VAR_…` — a named one).
	Page { page: Option<String> },
	/// `::VAR_…` — the deck.
	Deck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetVarSpec {
	pub name: String,
	pub value: String,
	pub dest: SetVarDest,
	/// `<=` writes the value into the file content; `=` encodes it into the
	/// filename.
	pub infile: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTiming {
	pub wait: Option<Duration>,
	pub every: Option<Duration>,
	pub max_runs: Option<u32>,
	pub duration_min: Option<Duration>,
	pub duration_max: Option<Duration>,
	pub detach: bool,
	pub unique: bool,
	pub quiet: bool,
}

/// A fully-resolved event.
#[derive(Debug, Clone)]
pub struct EventSpec {
	pub kind: EventKind,
	pub action: EventAction,
	pub set_vars: Vec<SetVarSpec>,
	pub timing: EventTiming,
}

#[derive(Debug, Clone)]
pub struct EventEntity {
	pub version: Version,
	pub kind: EventKind,
}

impl EventEntity {
	pub fn new(version: Version, kind: EventKind) -> Self {
		Self { version, kind }
	}

	pub fn name(&self) -> Option<&str> {
		self.version.name_option()
	}
}

impl Versioned for EventEntity {
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

/// `ref=PAGE:KEY:EVENT` for key events, `ref=PAGE:EVENT` for page events.
pub type EventRef = LayerRef;

/// Build the event spec from interpolated options.
pub fn resolve_event_spec(kind: EventKind, options: &OptionMap) -> Result<EventSpec, ConfigError> {
	options.at_most_one_of(&["command", "page", "brightness"])?;

	let action = if let Some(command) = options.get_raw("command") {
		if command == "__inside__" {
			EventAction::Exec(ExecMode::Inside)
		} else {
			EventAction::Exec(ExecMode::Command(options.decode(command)))
		}
	} else if let Some(page) = options.get_raw("page") {
		if matches!(kind, EventKind::Start | EventKind::End) {
			return Err(ConfigError::InvalidValue {
				key: "page".to_string(),
				value: page.to_string(),
			});
		}
		EventAction::Page(PageTarget::parse(page))
	} else if let Some(brightness) = options.get_raw("brightness") {
		parse_brightness(brightness)?
	} else if set_var_segments(options).next().is_some() {
		EventAction::None
	} else {
		EventAction::Exec(ExecMode::SelfPath)
	};

	let set_vars = set_var_segments(options)
		.map(|(key, value)| parse_set_var(key, value))
		.collect::<Result<Vec<_>, _>>()?;

	// `start`/`end` default to unique: they drive long-lived processes.
	let default_unique = matches!(kind, EventKind::Start | EventKind::End);

	let timing = EventTiming {
		wait: options.get_u64("wait")?.map(Duration::from_millis),
		every: if matches!(kind, EventKind::Press | EventKind::Start) {
			options.get_u64("every")?.map(Duration::from_millis)
		} else {
			None
		},
		max_runs: options.get_u32("max-runs")?,
		duration_min: match kind {
			EventKind::LongPress => Some(
				options
					.get_u64("duration-min")?
					.map_or(LONGPRESS_DURATION_MIN, Duration::from_millis),
			),
			EventKind::Release => options.get_u64("duration-min")?.map(Duration::from_millis),
			_ => None,
		},
		duration_max: if kind == EventKind::Press {
			options.get_u64("duration-max")?.map(Duration::from_millis)
		} else {
			None
		},
		detach: options.get_bool("detach")?.unwrap_or(false),
		unique: options.get_bool("unique")?.unwrap_or(default_unique),
		quiet: options.get_bool("quiet")?.unwrap_or(false),
	};

	Ok(EventSpec {
		kind,
		action,
		set_vars,
		timing,
	})
}

/// `brightness=[+|-|=]<0-100>`.
fn parse_brightness(value: &str) -> Result<EventAction, ConfigError> {
	let invalid = || ConfigError::InvalidValue {
		key: "brightness".to_string(),
		value: value.to_string(),
	};
	let (operation, level) = match value.chars().next() {
		Some(op @ ('+' | '-' | '=')) => (op, &value[1..]),
		_ => ('=', value),
	};
	let level: u8 = level.parse().map_err(|_| invalid())?;
	if level > 100 {
		return Err(invalid());
	}
	Ok(EventAction::Brightness { operation, level })
}

/// Option keys that are `VAR_…` assignments, with destination prefix and
/// the `<=` in-file marker still attached to key/value.
fn set_var_segments(options: &OptionMap) -> impl Iterator<Item = (&str, &str)> {
	options.iter().filter(|(key, _)| key.contains("VAR_"))
}

fn parse_set_var(raw_key: &str, value: &str) -> Result<SetVarSpec, ConfigError> {
	let invalid = || ConfigError::InvalidValue {
		key: raw_key.to_string(),
		value: value.to_string(),
	};

	// The `<` of a `<=` assignment ends up at the tail of the parsed key.
	let (key, infile) = match raw_key.strip_suffix('<') {
		Some(key) => (key, true),
		None => (raw_key, false),
	};

	let (prefix, name) = key.split_once("VAR_").ok_or_else(invalid)?;
	if !crate::config::is_valid_var_name(name) {
		return Err(invalid());
	}

	// Destination prefixes: `` key, `:` page, `::` deck, `:key:`,
	// `::page:`, `::page:key:`.
	let dest = match prefix {
		"" => SetVarDest::Key {
			page: None,
			key: None,
		},
		":" => SetVarDest::Page { page: None },
		"::" => SetVarDest::Deck,
		_ => {
			let inner = prefix.strip_suffix(':').ok_or_else(invalid)?;
			if let Some(rest) = inner.strip_prefix("::") {
				match rest.split_once(':') {
					Some((page, key)) => SetVarDest::Key {
						page: Some(page.to_string()),
						key: Some(key.to_string()),
					},
					None => SetVarDest::Page {
						page: Some(rest.to_string()),
					},
				}
			} else if let Some(rest) = inner.strip_prefix(':') {
				SetVarDest::Key {
					page: None,
					key: Some(rest.to_string()),
				}
			} else {
				return Err(invalid());
			}
		}
	};

	Ok(SetVarSpec {
		name: name.to_string(),
		value: value.to_string(),
		dest,
		infile,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::parse_name;

	fn options(name: &str) -> OptionMap {
		parse_name(name).unwrap().unwrap().options
	}

	fn spec(name: &str) -> EventSpec {
		let parsed = parse_name(name).unwrap().unwrap();
		let crate::config::BaseName::Event(kind) = parsed.base else {
			panic!("not an event: {name}");
		};
		resolve_event_spec(kind, &parsed.options).unwrap()
	}

	#[test]
	fn bare_event_runs_its_own_file() {
		let spec = spec("ON_PRESS");
		assert_eq!(spec.action, EventAction::Exec(ExecMode::SelfPath));
		assert!(!spec.timing.unique);
	}

	#[test]
	fn command_and_inside_modes() {
		assert_eq!(
			spec("ON_PRESS;command=echo hi").action,
			EventAction::Exec(ExecMode::Command("echo hi".to_string()))
		);
		assert_eq!(
			spec("ON_PRESS;command=__inside__").action,
			EventAction::Exec(ExecMode::Inside)
		);
	}

	#[test]
	fn page_action_parses_pseudo_tokens() {
		assert_eq!(spec("ON_PRESS;page=3").action, EventAction::Page(PageTarget::Number(3)));
		assert_eq!(
			spec("ON_PRESS;page=spotify").action,
			EventAction::Page(PageTarget::Name("spotify".to_string()))
		);
		assert_eq!(spec("ON_PRESS;page=__back__").action, EventAction::Page(PageTarget::Back));
		assert_eq!(spec("ON_PRESS;page=__first__").action, EventAction::Page(PageTarget::First));
		assert_eq!(spec("ON_PRESS;page=__prev__").action, EventAction::Page(PageTarget::Previous));
	}

	#[test]
	fn page_is_rejected_on_start_events() {
		let parsed = parse_name("ON_START;page=2").unwrap().unwrap();
		let crate::config::BaseName::Event(kind) = parsed.base else {
			panic!();
		};
		assert!(resolve_event_spec(kind, &parsed.options).is_err());
	}

	#[test]
	fn brightness_operations_parse() {
		assert_eq!(
			spec("ON_PRESS;brightness=+10").action,
			EventAction::Brightness {
				operation: '+',
				level: 10
			}
		);
		assert_eq!(
			spec("ON_PRESS;brightness=50").action,
			EventAction::Brightness {
				operation: '=',
				level: 50
			}
		);
		let parsed = parse_name("ON_PRESS;brightness=200").unwrap().unwrap();
		let crate::config::BaseName::Event(kind) = parsed.base else {
			panic!();
		};
		assert!(resolve_event_spec(kind, &parsed.options).is_err());
	}

	#[test]
	fn set_var_destinations_parse() {
		let spec = spec("ON_PRESS;VAR_STATE=on;:VAR_P=1;::VAR_D=2;:2,3:VAR_K=3;::music:VAR_M=4;::music:1,1:VAR_X<=5");
		assert_eq!(spec.action, EventAction::None);
		assert_eq!(spec.set_vars.len(), 6);
		assert_eq!(
			spec.set_vars[0].dest,
			SetVarDest::Key {
				page: None,
				key: None
			}
		);
		assert_eq!(spec.set_vars[1].dest, SetVarDest::Page { page: None });
		assert_eq!(spec.set_vars[2].dest, SetVarDest::Deck);
		assert_eq!(
			spec.set_vars[3].dest,
			SetVarDest::Key {
				page: None,
				key: Some("2,3".to_string())
			}
		);
		assert_eq!(
			spec.set_vars[4].dest,
			SetVarDest::Page {
				page: Some("music".to_string())
			}
		);
		assert_eq!(
			spec.set_vars[5].dest,
			SetVarDest::Key {
				page: Some("music".to_string()),
				key: Some("1,1".to_string())
			}
		);
		assert!(spec.set_vars[5].infile);
		assert!(!spec.set_vars[0].infile);
	}

	#[test]
	fn timing_options_resolve() {
		let spec = spec("ON_PRESS;wait=100;every=250;max-runs=3;unique;quiet");
		assert_eq!(spec.timing.wait, Some(Duration::from_millis(100)));
		assert_eq!(spec.timing.every, Some(Duration::from_millis(250)));
		assert_eq!(spec.timing.max_runs, Some(3));
		assert!(spec.timing.unique);
		assert!(spec.timing.quiet);
	}

	#[test]
	fn longpress_gets_a_default_minimum() {
		let spec1 = spec("ON_LONGPRESS;command=x");
		assert_eq!(spec1.timing.duration_min, Some(LONGPRESS_DURATION_MIN));
		let spec2 = spec("ON_LONGPRESS;duration-min=500;command=x");
		assert_eq!(spec2.timing.duration_min, Some(Duration::from_millis(500)));
	}

	#[test]
	fn repeat_only_applies_to_press_and_start() {
		assert_eq!(spec("ON_RELEASE;every=100;command=x").timing.every, None);
		assert!(spec("ON_START;every=100;command=x").timing.every.is_some());
	}

	#[test]
	fn start_events_default_to_unique() {
		assert!(spec("ON_START;command=x").timing.unique);
		assert!(!spec("ON_START;command=x;unique=false").timing.unique);
	}
}
