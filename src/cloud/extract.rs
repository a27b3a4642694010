//! Ordered extraction rules for remote responses whose shape varies between
//! deployments. Each rule names a JSON path; the first rule yielding a
//! non-empty string wins.

use serde_json::Value;

/// A named JSON path into a response body.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRule {
    pub name: &'static str,
    pub path: &'static [&'static str],
}

impl ExtractionRule {
    pub const fn new(name: &'static str, path: &'static [&'static str]) -> Self {
        Self { name, path }
    }

    /// Apply this rule, returning the string at its path if non-empty.
    pub fn apply<'v>(&self, value: &'v Value) -> Option<&'v str> {
        let mut current = value;
        for key in self.path {
            current = current.get(key)?;
        }
        current.as_str().filter(|s| !s.is_empty())
    }
}

pub const STREAMING_TEXT_RULES: &[ExtractionRule] = &[
    ExtractionRule::new("result.text", &["result", "text"]),
    ExtractionRule::new("data.result.text", &["data", "result", "text"]),
];

pub const BATCH_TEXT_RULES: &[ExtractionRule] = &[
    ExtractionRule::new("text", &["text"]),
    ExtractionRule::new("result.text", &["result", "text"]),
    ExtractionRule::new("data.result.text", &["data", "result", "text"]),
];

/// Run rules in order and return the first match.
pub fn extract_text(value: &Value, rules: &[ExtractionRule]) -> Option<String> {
    rules
        .iter()
        .find_map(|rule| rule.apply(value))
        .map(str::to_string)
}

/// What a synthesis response carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesizedAudio {
    /// Directly servable location
    Url(String),
    /// Base64-encoded audio bytes
    Base64(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Url,
    Base64,
}

#[derive(Debug, Clone, Copy)]
pub struct AudioRule {
    rule: ExtractionRule,
    kind: PayloadKind,
}

impl AudioRule {
    pub fn name(&self) -> &'static str {
        self.rule.name
    }

    pub fn apply(&self, value: &Value) -> Option<SynthesizedAudio> {
        let found = self.rule.apply(value)?.to_string();
        Some(match self.kind {
            PayloadKind::Url => SynthesizedAudio::Url(found),
            PayloadKind::Base64 => SynthesizedAudio::Base64(found),
        })
    }
}

pub const TTS_AUDIO_RULES: &[AudioRule] = &[
    AudioRule {
        rule: ExtractionRule::new("url", &["url"]),
        kind: PayloadKind::Url,
    },
    AudioRule {
        rule: ExtractionRule::new("data", &["data"]),
        kind: PayloadKind::Base64,
    },
    AudioRule {
        rule: ExtractionRule::new("audio", &["audio"]),
        kind: PayloadKind::Base64,
    },
    AudioRule {
        rule: ExtractionRule::new("audio.data", &["audio", "data"]),
        kind: PayloadKind::Base64,
    },
];

/// Resolve synthesized audio, reporting which rule matched.
pub fn extract_audio(value: &Value) -> Option<(&'static str, SynthesizedAudio)> {
    TTS_AUDIO_RULES
        .iter()
        .find_map(|rule| rule.apply(value).map(|audio| (rule.name(), audio)))
}
