use crate::types::{ChatRequest, ChatResponse, GenerationRequest, GenerationResult};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{header, StatusCode, Url};
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// The two JSON endpoints of the exercise generator.
#[async_trait]
pub trait ExerciseBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult>;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Raw retrieval of a media resource. Non-success statuses are returned, not raised, so the
/// caller can classify them. A body larger than `max_bytes` is an error and is not buffered.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<FetchedMedia>;
}

#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
}

impl FetchedMedia {
    /// Declared size, falling back to what actually arrived.
    pub fn declared_size(&self) -> u64 {
        self.content_length.unwrap_or(self.body.len() as u64)
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
}

impl Client {
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let url = base_url
            .map(Url::parse)
            .unwrap_or_else(|| Url::parse(DEFAULT_BASE_URL))
            .context("invalid generator base URL")?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url: url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let origin = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{origin}/{path}"))
            .with_context(|| format!("failed to build {path} URL"))
    }
}

#[async_trait]
impl ExerciseBackend for Client {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let url = self.endpoint("generate")?;
        info!(%url, instrument = %request.instrument, key = %request.key, "submitting generation request");
        let response =
            self.http.post(url).json(request).send().await.context("generate request failed")?;
        if !response.status().is_success() {
            bail!("generator responded with status {}", response.status());
        }
        response.json().await.context("failed to decode generation response")
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = self.endpoint("chat")?;
        debug!(%url, turns = request.history.len(), "submitting chat message");
        let response =
            self.http.post(url).json(request).send().await.context("chat request failed")?;
        if !response.status().is_success() {
            bail!("chat endpoint responded with status {}", response.status());
        }
        response.json().await.context("failed to decode chat response")
    }
}

#[async_trait]
impl MediaFetcher for Client {
    async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<FetchedMedia> {
        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to retrieve {url}"))?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        if !status.is_success() {
            debug!(%url, %status, "media resource not available");
            return Ok(FetchedMedia { status, content_type, content_length, body: Vec::new() });
        }
        if let Some(declared) = content_length.filter(|declared| *declared > max_bytes) {
            bail!("{url} declares {declared} bytes, over the {max_bytes}-byte limit");
        }

        let mut body = Vec::new();
        while let Some(chunk) =
            response.chunk().await.with_context(|| format!("failed to read body of {url}"))?
        {
            if (body.len() + chunk.len()) as u64 > max_bytes {
                bail!("{url} exceeds the {max_bytes}-byte limit");
            }
            body.extend_from_slice(&chunk);
        }
        debug!(%url, %status, ?content_type, bytes = body.len(), "retrieved media resource");
        Ok(FetchedMedia { status, content_type, content_length, body })
    }
}
