use crate::error::EtudeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TEMPO_BPM: u16 = 60;
pub const DEFAULT_MEASURES: u8 = 4;

/// Eighth notes are the unit for every duration exchanged with the generator.
pub const UNITS_PER_WHOLE_NOTE: u8 = 8;

const REST_MARKERS: [&str; 4] = ["rest", "r", "p", "pause"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Instrument {
    Trumpet,
    Piano,
    Violin,
    Clarinet,
    Flute,
}

impl Instrument {
    pub const ALL: [Instrument; 5] =
        [Self::Trumpet, Self::Piano, Self::Violin, Self::Clarinet, Self::Flute];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Trumpet => "Trumpet",
            Self::Piano => "Piano",
            Self::Violin => "Violin",
            Self::Clarinet => "Clarinet",
            Self::Flute => "Flute",
        }
    }
}

impl FromStr for Instrument {
    type Err = EtudeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.label().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| EtudeError::InvalidRequest(format!("unknown instrument `{value}`")))
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl SkillLevel {
    pub const ALL: [SkillLevel; 3] = [Self::Beginner, Self::Intermediate, Self::Advanced];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Beginner => "Beginner",
            Self::Intermediate => "Intermediate",
            Self::Advanced => "Advanced",
        }
    }
}

impl FromStr for SkillLevel {
    type Err = EtudeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.label().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| EtudeError::InvalidRequest(format!("unknown skill level `{value}`")))
    }
}

impl fmt::Display for SkillLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MusicalKey {
    #[serde(rename = "C Major")]
    CMajor,
    #[serde(rename = "G Major")]
    GMajor,
    #[serde(rename = "D Major")]
    DMajor,
    #[serde(rename = "F Major")]
    FMajor,
    #[serde(rename = "Bb Major")]
    BbMajor,
    #[serde(rename = "A Minor")]
    AMinor,
    #[serde(rename = "E Minor")]
    EMinor,
}

impl MusicalKey {
    pub const ALL: [MusicalKey; 7] = [
        Self::CMajor,
        Self::GMajor,
        Self::DMajor,
        Self::FMajor,
        Self::BbMajor,
        Self::AMinor,
        Self::EMinor,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::CMajor => "C Major",
            Self::GMajor => "G Major",
            Self::DMajor => "D Major",
            Self::FMajor => "F Major",
            Self::BbMajor => "Bb Major",
            Self::AMinor => "A Minor",
            Self::EMinor => "E Minor",
        }
    }
}

/// Accepts "C Major", "c-major", "bb_major" and similar spellings.
impl FromStr for MusicalKey {
    type Err = EtudeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = compact(value);
        Self::ALL
            .into_iter()
            .find(|candidate| compact(candidate.label()) == wanted)
            .ok_or_else(|| EtudeError::InvalidRequest(format!("unknown key `{value}`")))
    }
}

impl fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn compact(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature { numerator: 4, denominator: 4 };

    pub fn units_per_measure(&self) -> u32 {
        u32::from(self.numerator) * u32::from(UNITS_PER_WHOLE_NOTE / self.denominator)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::COMMON
    }
}

impl FromStr for TimeSignature {
    type Err = EtudeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || EtudeError::InvalidRequest(format!("invalid time signature `{value}`"));
        let (numerator, denominator) = value.trim().split_once('/').ok_or_else(invalid)?;
        let numerator = numerator.trim().parse::<u8>().map_err(|_| invalid())?;
        let denominator = denominator.trim().parse::<u8>().map_err(|_| invalid())?;
        if numerator == 0 || !matches!(denominator, 1 | 2 | 4 | 8) {
            return Err(invalid());
        }
        Ok(Self { numerator, denominator })
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl Serialize for TimeSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GenerationMode {
    #[serde(rename = "Exercise Parameters")]
    Parametric,
    #[serde(rename = "Exercise Prompt")]
    Prompt,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub instrument: Instrument,
    pub level: SkillLevel,
    pub key: MusicalKey,
    pub tempo: u16,
    pub time_signature: TimeSignature,
    pub measures: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    pub mode: GenerationMode,
}

impl GenerationRequest {
    pub fn parametric(
        instrument: Instrument,
        level: SkillLevel,
        key: MusicalKey,
        time_signature: TimeSignature,
        measures: u8,
    ) -> Self {
        Self {
            instrument,
            level,
            key,
            tempo: DEFAULT_TEMPO_BPM,
            time_signature,
            measures,
            custom_prompt: None,
            mode: GenerationMode::Parametric,
        }
    }

    /// A free-text request; the structural fields still travel with it because the generator
    /// uses them to size the exercise.
    pub fn prompt(base: GenerationRequest, prompt: impl Into<String>) -> Self {
        Self { custom_prompt: Some(prompt.into()), mode: GenerationMode::Prompt, ..base }
    }

    pub fn validate(&self) -> Result<(), EtudeError> {
        if self.measures == 0 {
            return Err(EtudeError::InvalidRequest("measures must be at least 1".into()));
        }
        match self.mode {
            GenerationMode::Prompt => {
                let empty = self.custom_prompt.as_deref().map(str::trim).unwrap_or("").is_empty();
                if empty {
                    return Err(EtudeError::InvalidRequest(
                        "prompt mode requires a non-empty prompt".into(),
                    ));
                }
            }
            GenerationMode::Parametric => {
                if self.tempo == 0 {
                    return Err(EtudeError::InvalidRequest("tempo must be positive".into()));
                }
            }
        }
        Ok(())
    }

    /// Total eighth-note units the generator is asked to fill.
    pub fn target_units(&self) -> u32 {
        u32::from(self.measures) * self.time_signature.units_per_measure()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteEvent {
    pub note: String,
    pub duration: u32,
    pub cumulative_duration: u32,
}

impl NoteEvent {
    pub fn is_rest(&self) -> bool {
        let note = self.note.trim();
        REST_MARKERS.iter().any(|marker| marker.eq_ignore_ascii_case(note))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationResult {
    #[serde(default)]
    pub exercise: Vec<NoteEvent>,
    #[serde(deserialize_with = "string_or_number")]
    pub tempo: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub duration: String,
    pub time_signature: String,
    pub total_duration: u32,
    #[serde(default)]
    pub mp3_url: String,
    #[serde(default)]
    pub midi_url: Option<String>,
}

impl GenerationResult {
    /// Checks the running-sum bookkeeping of the exercise against its declared total.
    pub fn validate(&self) -> Result<(), String> {
        let mut running = 0u32;
        for (index, event) in self.exercise.iter().enumerate() {
            running = running.saturating_add(event.duration);
            if event.cumulative_duration != running {
                return Err(format!(
                    "note {index} ({}) has cumulative duration {} but the running sum is {running}",
                    event.note, event.cumulative_duration
                ));
            }
        }
        if running != self.total_duration {
            return Err(format!(
                "exercise sums to {running} units but declares a total of {}",
                self.total_duration
            ));
        }
        Ok(())
    }

    pub fn rest_count(&self) -> usize {
        self.exercise.iter().filter(|event| event.is_rest()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<(String, String)>,
    pub instrument: Instrument,
    pub level: SkillLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    #[serde(default)]
    pub history: Vec<(String, String)>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(note: &str, duration: u32, cumulative_duration: u32) -> NoteEvent {
        NoteEvent { note: note.into(), duration, cumulative_duration }
    }

    fn result(exercise: Vec<NoteEvent>, total_duration: u32) -> GenerationResult {
        GenerationResult {
            exercise,
            tempo: "60".into(),
            duration: "8.00 seconds".into(),
            time_signature: "4/4".into(),
            total_duration,
            mp3_url: "/static/ex.mp3".into(),
            midi_url: Some("/static/ex.mid".into()),
        }
    }

    #[test]
    fn request_serializes_with_backend_field_names() {
        let request = GenerationRequest::parametric(
            Instrument::Trumpet,
            SkillLevel::Intermediate,
            MusicalKey::BbMajor,
            TimeSignature::COMMON,
            4,
        );
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({
                "instrument": "Trumpet",
                "level": "Intermediate",
                "key": "Bb Major",
                "tempo": 60,
                "time_signature": "4/4",
                "measures": 4,
                "mode": "Exercise Parameters"
            })
        );
    }

    #[test]
    fn prompt_mode_requires_text() {
        let base = GenerationRequest::parametric(
            Instrument::Flute,
            SkillLevel::Beginner,
            MusicalKey::CMajor,
            TimeSignature::COMMON,
            8,
        );
        assert!(GenerationRequest::prompt(base.clone(), "   ").validate().is_err());
        let request = GenerationRequest::prompt(base, "long tones on low C");
        assert!(request.validate().is_ok());
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["custom_prompt"], "long tones on low C");
        assert_eq!(value["mode"], "Exercise Prompt");
    }

    #[test]
    fn parametric_mode_rejects_zero_measures_and_tempo() {
        let mut request = GenerationRequest::parametric(
            Instrument::Piano,
            SkillLevel::Advanced,
            MusicalKey::EMinor,
            TimeSignature::COMMON,
            0,
        );
        assert!(request.validate().is_err());
        request.measures = 4;
        request.tempo = 0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn time_signature_units_follow_eighth_note_grid() {
        let three_four: TimeSignature = "3/4".parse().expect("parse");
        assert_eq!(three_four.units_per_measure(), 6);
        assert_eq!(TimeSignature::COMMON.units_per_measure(), 8);
        let six_eight: TimeSignature = " 6 / 8 ".parse().expect("parse");
        assert_eq!(six_eight.units_per_measure(), 6);
        assert!("4/3".parse::<TimeSignature>().is_err());
        assert!("0/4".parse::<TimeSignature>().is_err());
        assert!("four".parse::<TimeSignature>().is_err());
    }

    #[test]
    fn key_parsing_accepts_loose_spellings() {
        assert_eq!("bb-major".parse::<MusicalKey>().expect("parse"), MusicalKey::BbMajor);
        assert_eq!("A Minor".parse::<MusicalKey>().expect("parse"), MusicalKey::AMinor);
        assert!("H major".parse::<MusicalKey>().is_err());
        assert_eq!("violin".parse::<Instrument>().expect("parse"), Instrument::Violin);
        assert_eq!("ADVANCED".parse::<SkillLevel>().expect("parse"), SkillLevel::Advanced);
    }

    #[test]
    fn result_accepts_numeric_or_textual_tempo() {
        let body = json!({
            "exercise": [
                {"note": "C4", "duration": 2, "cumulative_duration": 2},
                {"note": "Rest", "duration": 2, "cumulative_duration": 4}
            ],
            "tempo": 60,
            "duration": "4.00 seconds",
            "time_signature": "4/4",
            "total_duration": 4,
            "mp3_url": "/static/a.mp3",
            "midi_url": null
        });
        let parsed: GenerationResult = serde_json::from_value(body).expect("deserialize");
        assert_eq!(parsed.tempo, "60");
        assert!(parsed.midi_url.is_none());
        assert_eq!(parsed.rest_count(), 1);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn validate_rejects_broken_running_sum() {
        let ok = result(vec![event("C4", 2, 2), event("D4", 1, 3), event("E4", 5, 8)], 8);
        assert!(ok.validate().is_ok());

        let skipped = result(vec![event("C4", 2, 2), event("D4", 1, 4)], 4);
        let message = skipped.validate().expect_err("running sum mismatch");
        assert!(message.contains("note 1"));

        let wrong_total = result(vec![event("C4", 2, 2), event("D4", 2, 4)], 6);
        assert!(wrong_total.validate().is_err());
    }

    #[test]
    fn rest_markers_are_case_insensitive() {
        assert!(event(" pause ", 1, 1).is_rest());
        assert!(event("R", 1, 1).is_rest());
        assert!(!event("Bb4", 1, 1).is_rest());
    }

    #[test]
    fn chat_history_travels_as_pairs() {
        let request = ChatRequest {
            message: "next?".into(),
            history: vec![("hi".into(), "hello".into())],
            instrument: Instrument::Clarinet,
            level: SkillLevel::Beginner,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["history"], json!([["hi", "hello"]]));
        assert_eq!(value["level"], "Beginner");
    }
}
