use crate::error::EtudeError;
use crate::types::{
    GenerationRequest, Instrument, MusicalKey, SkillLevel, TimeSignature, DEFAULT_MEASURES,
    DEFAULT_TEMPO_BPM,
};

pub const HELP: &str = "\
commands:
  generate [instrument=Trumpet] [level=Intermediate] [key=C-Major] [time=4/4] [measures=4] [tempo=60]
  prompt <text>        generate from a free-text description (uses the current parameters for length)
  chat <text>          ask the practice assistant (bare text also chats)
  play | pause | stop  control the current exercise
  midi                 save the notation (MIDI) file of the current exercise
  status               show the playback session
  new                  start over: clear the chat and ignore replies still on their way
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Generate(GenerationRequest),
    Chat(String),
    Play,
    Pause,
    Stop,
    DownloadMidi,
    Status,
    Reset,
    Help,
    Quit,
}

/// Parameters remembered between `generate` lines; every `key=value` updates them.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub instrument: Instrument,
    pub level: SkillLevel,
    pub key: MusicalKey,
    pub time_signature: TimeSignature,
    pub measures: u8,
    pub tempo: u16,
}

impl Parameters {
    pub fn new(instrument: Instrument, level: SkillLevel) -> Self {
        Self {
            instrument,
            level,
            key: MusicalKey::CMajor,
            time_signature: TimeSignature::COMMON,
            measures: DEFAULT_MEASURES,
            tempo: DEFAULT_TEMPO_BPM,
        }
    }

    pub fn request(&self) -> GenerationRequest {
        let mut request = GenerationRequest::parametric(
            self.instrument,
            self.level,
            self.key,
            self.time_signature,
            self.measures,
        );
        request.tempo = self.tempo;
        request
    }

    fn apply(&mut self, assignment: &str) -> Result<(), EtudeError> {
        let (name, value) = assignment.split_once('=').ok_or_else(|| {
            EtudeError::InvalidRequest(format!("expected name=value, got `{assignment}`"))
        })?;
        match name.trim().to_ascii_lowercase().as_str() {
            "instrument" => self.instrument = value.parse()?,
            "level" => self.level = value.parse()?,
            "key" => self.key = value.parse()?,
            "time" | "time_signature" => self.time_signature = value.parse()?,
            "measures" => self.measures = parse_number(name, value)?,
            "tempo" => self.tempo = parse_number(name, value)?,
            other => {
                return Err(EtudeError::InvalidRequest(format!("unknown parameter `{other}`")))
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, EtudeError> {
    value
        .trim()
        .parse()
        .map_err(|_| EtudeError::InvalidRequest(format!("{name} must be a number, got `{value}`")))
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_line(line: &str, params: &mut Parameters) -> Result<Option<Command>, EtudeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "generate" | "gen" => {
            let mut updated = params.clone();
            for assignment in rest.split_whitespace() {
                updated.apply(assignment)?;
            }
            *params = updated;
            Command::Generate(params.request())
        }
        "prompt" => {
            if rest.is_empty() {
                return Err(EtudeError::InvalidRequest("prompt needs a description".into()));
            }
            Command::Generate(GenerationRequest::prompt(params.request(), rest))
        }
        "chat" => Command::Chat(rest.to_string()),
        "play" => Command::Play,
        "pause" => Command::Pause,
        "stop" => Command::Stop,
        "midi" | "download" => Command::DownloadMidi,
        "status" => Command::Status,
        "new" | "clear" | "reset" => Command::Reset,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Chat(line.to_string()),
    };
    Ok(Some(command))
}
