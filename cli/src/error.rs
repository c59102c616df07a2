use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy shared by the resolver, verifier, playback engine, generation
/// orchestrator, and conversation session.
#[derive(Debug, Error)]
pub enum EtudeError {
    #[error("resource reference is empty")]
    EmptyReference,

    #[error("invalid resource reference `{reference}`: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("resource unavailable at {url}: {reason}")]
    ResourceUnavailable { url: String, reason: String },

    #[error("unsupported format at {url}: content type `{content_type}`")]
    UnsupportedFormat { url: String, content_type: String },

    #[error("primary playback failed: {0}")]
    PrimaryPlaybackError(String),

    #[error("fallback playback failed: {0}")]
    FallbackPlaybackError(String),

    #[error("generation request failed: {0}")]
    GenerationRequestFailed(String),

    #[error("chat request failed: {0}")]
    ChatRequestFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("a generation request is already in flight")]
    GenerationInFlight,

    #[error("a chat message is still awaiting its reply")]
    ChatInFlight,

    #[error("response was superseded by a newer request")]
    Superseded,

    #[error("no alternate artifact is available for this exercise")]
    NoAlternateArtifact,

    #[error("failed to write artifact to {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EtudeError {
    /// Whether this failure ends the current playback session and should offer the
    /// alternate artifact as a way out.
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            Self::EmptyReference
                | Self::InvalidReference { .. }
                | Self::ResourceUnavailable { .. }
                | Self::FallbackPlaybackError(_)
        )
    }
}

pub type Result<T, E = EtudeError> = std::result::Result<T, E>;
