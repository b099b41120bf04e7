//! Emotion tag extraction
//!
//! Text handed to the pipeline may carry a bracketed tag such as
//! `[happy] Great job!`. The first alphabetic tag selects prosody from the
//! active profile; every alphabetic tag is removed from the spoken text,
//! recognized or not.

use crate::profiles::VoiceProfile;
use regex::Regex;
use std::sync::OnceLock;

/// Speeds below this would produce absurd length scales
const MIN_SPEED: f32 = 0.1;

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[([A-Za-z]+)\]").expect("tag pattern is valid"))
}

/// Text and prosody resolved for one utterance
#[derive(Clone, Debug, PartialEq)]
pub struct Prosody {
    /// Text with emotion tags removed
    pub text: String,

    /// Lowercased tag if the text carried one
    pub tag: Option<String>,

    /// Whether the tag matched the emotion table
    pub recognized: bool,

    /// Speech rate multiplier
    pub speed: f32,

    /// Semitone shift from the emotion table
    pub pitch_shift: i32,
}

impl Prosody {
    /// Piper length scale; higher speed gives a shorter scale
    pub fn length_scale(&self) -> f32 {
        length_scale_for(self.speed)
    }
}

/// Convert a speed multiplier into a Piper length scale
pub fn length_scale_for(speed: f32) -> f32 {
    if !speed.is_finite() {
        return 1.0;
    }
    1.0 / speed.max(MIN_SPEED)
}

/// Strip emotion tags and resolve prosody against `profile`
///
/// Never fails: unknown or missing tags fall back to the profile's `default`
/// entry, and to neutral prosody if that is absent.
pub fn extract_emotion(text: &str, profile: &VoiceProfile) -> Prosody {
    let pattern = tag_pattern();

    let tag = pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase());

    let matched = tag.as_deref().and_then(|tag| profile.emotion(tag));
    let recognized = matched.is_some();
    let modifier = matched.unwrap_or_else(|| profile.default_emotion());

    let clean = match tag {
        Some(_) => pattern.replace_all(text, " ").into_owned(),
        None => text.to_string(),
    };

    Prosody {
        text: collapse_whitespace(&clean),
        tag,
        recognized,
        speed: modifier.speed,
        pitch_shift: modifier.pitch_shift,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
