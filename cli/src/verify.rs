use crate::api::MediaFetcher;
use crate::error::EtudeError;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

pub const DEFAULT_MIN_AUDIO_BYTES: u64 = 1000;
pub const DEFAULT_MAX_AUDIO_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationWarning {
    UnsupportedFormat { content_type: String },
    SuspiciousSize { bytes: u64 },
}

impl VerificationWarning {
    pub fn describe(&self, url: &Url) -> String {
        match self {
            Self::UnsupportedFormat { content_type } => {
                EtudeError::UnsupportedFormat { url: url.to_string(), content_type: content_type.clone() }
                    .to_string()
            }
            Self::SuspiciousSize { bytes } => {
                format!("audio at {url} is only {bytes} bytes; playback may fail")
            }
        }
    }
}

/// A resource that passed the pre-flight retrieval, with the bytes that came back.
#[derive(Debug, Clone)]
pub struct VerifiedMedia {
    pub url: Url,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub warnings: Vec<VerificationWarning>,
}

#[derive(Clone)]
pub struct AvailabilityVerifier {
    fetcher: Arc<dyn MediaFetcher>,
    timeout: Duration,
    min_plausible_bytes: u64,
    max_bytes: u64,
}

impl AvailabilityVerifier {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, timeout: Duration, min_plausible_bytes: u64) -> Self {
        Self { fetcher, timeout, min_plausible_bytes, max_bytes: DEFAULT_MAX_AUDIO_BYTES }
    }

    /// Bodies above this size are rejected without being buffered.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn fetcher(&self) -> &Arc<dyn MediaFetcher> {
        &self.fetcher
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub async fn verify(&self, url: &Url) -> Result<VerifiedMedia, EtudeError> {
        let unavailable = |reason: String| EtudeError::ResourceUnavailable { url: url.to_string(), reason };

        let media = match timeout(self.timeout, self.fetcher.fetch(url, self.max_bytes)).await {
            Ok(Ok(media)) => media,
            Ok(Err(err)) => return Err(unavailable(format!("{err:#}"))),
            Err(_) => {
                return Err(unavailable(format!("no response within {}s", self.timeout.as_secs_f32())))
            }
        };

        if !media.status.is_success() {
            return Err(unavailable(format!("server responded with status {}", media.status)));
        }
        let size = media.declared_size();
        if size > self.max_bytes {
            return Err(unavailable(format!("{size} bytes is over the {}-byte limit", self.max_bytes)));
        }

        let mut warnings = Vec::new();
        if let Some(content_type) = media.content_type.as_deref() {
            if !is_audio_content_type(content_type) {
                warn!(%url, content_type, "media resource does not declare an audio type");
                warnings.push(VerificationWarning::UnsupportedFormat {
                    content_type: content_type.to_string(),
                });
            }
        }

        if size < self.min_plausible_bytes {
            warn!(%url, size, "media resource is implausibly small");
            warnings.push(VerificationWarning::SuspiciousSize { bytes: size });
        }

        info!(%url, size, warnings = warnings.len(), "media resource verified");
        Ok(VerifiedMedia { url: url.clone(), content_type: media.content_type, body: media.body, warnings })
    }
}

fn is_audio_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence.starts_with("audio/")
        || essence == "application/octet-stream"
        || essence == "application/ogg"
}
