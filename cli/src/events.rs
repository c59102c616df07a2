use crate::conversation::ConversationTurn;
use crate::playback::PlayerState;
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

impl NoticeLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    DownloadAlternate { url: Url },
}

/// A dismissable, user-facing message.
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub recovery: Option<RecoveryAction>,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }

    pub fn with_recovery(mut self, recovery: Option<RecoveryAction>) -> Self {
        self.recovery = recovery;
        self
    }

    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self { level, message: message.into(), recovery: None, at: Utc::now() }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.at.format("%H:%M:%S"), self.level.label(), self.message)
    }
}

#[derive(Debug, Clone)]
pub struct ExerciseSummary {
    pub notes: usize,
    pub rests: usize,
    pub total_units: u32,
    pub tempo: String,
    pub time_signature: String,
    pub audio_duration: String,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Busy(bool),
    PlaybackState { session: u64, state: PlayerState },
    Notice(Notice),
    ExerciseReady(ExerciseSummary),
    Transcript(Vec<ConversationTurn>),
}

/// Emits events; a dropped receiver is not an error for the emitting component.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<AppEvent>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<AppEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    pub fn notice(&self, notice: Notice) {
        self.emit(AppEvent::Notice(notice));
    }
}
