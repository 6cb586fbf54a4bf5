//! `:name:` emoji expansion
//!
//! Text content may carry `:name:` tokens that are substituted with the
//! corresponding glyph before layout. Unknown names pass through untouched.

use std::collections::HashMap;

use once_cell::sync::Lazy;

static EMOJI_TABLE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
	HashMap::from([
		("smile", "\u{1F604}"),
		("grin", "\u{1F600}"),
		("joy", "\u{1F602}"),
		("wink", "\u{1F609}"),
		("cry", "\u{1F622}"),
		("sob", "\u{1F62D}"),
		("angry", "\u{1F620}"),
		("rage", "\u{1F621}"),
		("thinking", "\u{1F914}"),
		("sunglasses", "\u{1F60E}"),
		("sleeping", "\u{1F634}"),
		("scream", "\u{1F631}"),
		("heart", "\u{2764}\u{FE0F}"),
		("broken_heart", "\u{1F494}"),
		("star", "\u{2B50}"),
		("sparkles", "\u{2728}"),
		("fire", "\u{1F525}"),
		("boom", "\u{1F4A5}"),
		("zap", "\u{26A1}"),
		("snowflake", "\u{2744}\u{FE0F}"),
		("sunny", "\u{2600}\u{FE0F}"),
		("cloud", "\u{2601}\u{FE0F}"),
		("rainbow", "\u{1F308}"),
		("umbrella", "\u{2602}\u{FE0F}"),
		("thumbsup", "\u{1F44D}"),
		("+1", "\u{1F44D}"),
		("thumbsdown", "\u{1F44E}"),
		("-1", "\u{1F44E}"),
		("clap", "\u{1F44F}"),
		("wave", "\u{1F44B}"),
		("ok_hand", "\u{1F44C}"),
		("muscle", "\u{1F4AA}"),
		("point_right", "\u{1F449}"),
		("point_left", "\u{1F448}"),
		("check", "\u{2705}"),
		("white_check_mark", "\u{2705}"),
		("x", "\u{274C}"),
		("cross", "\u{274C}"),
		("warning", "\u{26A0}\u{FE0F}"),
		("no_entry", "\u{26D4}"),
		("question", "\u{2753}"),
		("exclamation", "\u{2757}"),
		("bulb", "\u{1F4A1}"),
		("bell", "\u{1F514}"),
		("lock", "\u{1F512}"),
		("unlock", "\u{1F513}"),
		("key", "\u{1F511}"),
		("gear", "\u{2699}\u{FE0F}"),
		("wrench", "\u{1F527}"),
		("hammer", "\u{1F528}"),
		("rocket", "\u{1F680}"),
		("hourglass", "\u{231B}"),
		("clock", "\u{1F550}"),
		("calendar", "\u{1F4C5}"),
		("email", "\u{2709}\u{FE0F}"),
		("phone", "\u{1F4DE}"),
		("computer", "\u{1F4BB}"),
		("keyboard", "\u{2328}\u{FE0F}"),
		("printer", "\u{1F5A8}\u{FE0F}"),
		("camera", "\u{1F4F7}"),
		("tv", "\u{1F4FA}"),
		("radio", "\u{1F4FB}"),
		("headphones", "\u{1F3A7}"),
		("microphone", "\u{1F3A4}"),
		("mute", "\u{1F507}"),
		("speaker", "\u{1F508}"),
		("sound", "\u{1F509}"),
		("loud_sound", "\u{1F50A}"),
		("musical_note", "\u{1F3B5}"),
		("notes", "\u{1F3B6}"),
		("play", "\u{25B6}\u{FE0F}"),
		("pause", "\u{23F8}\u{FE0F}"),
		("stop", "\u{23F9}\u{FE0F}"),
		("record", "\u{23FA}\u{FE0F}"),
		("next_track", "\u{23ED}\u{FE0F}"),
		("previous_track", "\u{23EE}\u{FE0F}"),
		("fast_forward", "\u{23E9}"),
		("rewind", "\u{23EA}"),
		("repeat", "\u{1F501}"),
		("shuffle", "\u{1F500}"),
		("battery", "\u{1F50B}"),
		("electric_plug", "\u{1F50C}"),
		("mag", "\u{1F50D}"),
		("link", "\u{1F517}"),
		("folder", "\u{1F4C1}"),
		("file", "\u{1F4C4}"),
		("package", "\u{1F4E6}"),
		("inbox", "\u{1F4E5}"),
		("outbox", "\u{1F4E4}"),
		("trash", "\u{1F5D1}\u{FE0F}"),
		("home", "\u{1F3E0}"),
		("office", "\u{1F3E2}"),
		("car", "\u{1F697}"),
		("bus", "\u{1F68C}"),
		("airplane", "\u{2708}\u{FE0F}"),
		("coffee", "\u{2615}"),
		("beer", "\u{1F37A}"),
		("pizza", "\u{1F355}"),
		("cake", "\u{1F370}"),
		("gift", "\u{1F381}"),
		("tada", "\u{1F389}"),
		("game_die", "\u{1F3B2}"),
		("video_game", "\u{1F3AE}"),
		("dart", "\u{1F3AF}"),
		("soccer", "\u{26BD}"),
		("trophy", "\u{1F3C6}"),
		("dog", "\u{1F436}"),
		("cat", "\u{1F431}"),
		("bird", "\u{1F426}"),
		("ghost", "\u{1F47B}"),
		("robot", "\u{1F916}"),
		("skull", "\u{1F480}"),
		("alien", "\u{1F47D}"),
		("moon", "\u{1F319}"),
		("earth", "\u{1F30D}"),
		("100", "\u{1F4AF}"),
		("eyes", "\u{1F440}"),
		("zzz", "\u{1F4A4}"),
	])
});

/// Replace every known `:name:` token with its glyph.
pub fn expand_emojis(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut rest = text;
	while let Some(start) = rest.find(':') {
		out.push_str(&rest[..start]);
		let after = &rest[start + 1..];
		match after.find(':') {
			Some(end) => {
				let name = &after[..end];
				if let Some(glyph) = EMOJI_TABLE.get(name) {
					out.push_str(glyph);
					rest = &after[end + 1..];
				} else {
					// Not a known token: emit the colon and rescan from the
					// next character so `10:30:45` stays intact.
					out.push(':');
					rest = after;
				}
			}
			None => {
				out.push_str(&rest[start..]);
				return out;
			}
		}
	}
	out.push_str(rest);
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn known_tokens_expand() {
		assert_eq!(expand_emojis(":fire:"), "\u{1F525}");
		assert_eq!(expand_emojis("hot :fire: take"), "hot \u{1F525} take");
	}

	#[test]
	fn unknown_tokens_pass_through() {
		assert_eq!(expand_emojis(":nope:"), ":nope:");
		assert_eq!(expand_emojis("10:30:45"), "10:30:45");
	}

	#[test]
	fn adjacent_tokens_expand() {
		assert_eq!(expand_emojis(":play::pause:"), "\u{25B6}\u{FE0F}\u{23F8}\u{FE0F}");
	}

	#[test]
	fn dangling_colon_is_kept() {
		assert_eq!(expand_emojis("time: 10"), "time: 10");
		assert_eq!(expand_emojis(":"), ":");
	}
}
