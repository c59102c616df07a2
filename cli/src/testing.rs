//! In-memory stand-ins for the generator, media hosting, and audio output.

use crate::api::{ExerciseBackend, FetchedMedia, MediaFetcher};
use crate::events::AppEvent;
use crate::playback::{Player, PlayerEvent, PlayerFactory, PlayerKind};
use crate::types::{ChatRequest, ChatResponse, GenerationRequest, GenerationResult, NoteEvent};
use crate::verify::VerifiedMedia;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

pub fn drain_events(rx: &mut UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn sample_result(mp3_url: &str, midi_url: Option<&str>) -> GenerationResult {
    let notes = [("C4", 2), ("E4", 2), ("Rest", 1), ("G4", 3)];
    let mut cumulative = 0;
    let exercise = notes
        .iter()
        .map(|(note, duration)| {
            cumulative += duration;
            NoteEvent { note: note.to_string(), duration: *duration, cumulative_duration: cumulative }
        })
        .collect();
    GenerationResult {
        exercise,
        tempo: "60".into(),
        duration: "8.00 seconds".into(),
        time_signature: "4/4".into(),
        total_duration: cumulative,
        mp3_url: mp3_url.into(),
        midi_url: midi_url.map(str::to_string),
    }
}

enum Reply {
    Media(FetchedMedia),
    Hang,
    /// Answers with the media once the gate is notified.
    Gated(Arc<Notify>, FetchedMedia),
}

#[derive(Default)]
pub struct FakeFetcher {
    replies: HashMap<String, Reply>,
    calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(
        mut self,
        url: &str,
        status: StatusCode,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Self {
        let media = FetchedMedia {
            status,
            content_type: content_type.map(str::to_string),
            content_length: Some(body.len() as u64),
            body,
        };
        self.replies.insert(url.to_string(), Reply::Media(media));
        self
    }

    pub fn with_audio(self, url: &str, bytes: usize) -> Self {
        self.with_response(url, StatusCode::OK, Some("audio/mpeg"), vec![0xFF; bytes])
    }

    pub fn with_status(self, url: &str, status: StatusCode) -> Self {
        self.with_response(url, status, Some("text/html"), b"not found".to_vec())
    }

    pub fn with_declared_length(self, url: &str, declared: u64, bytes: usize) -> Self {
        let mut fetcher = self.with_audio(url, bytes);
        if let Some(Reply::Media(media)) = fetcher.replies.get_mut(url) {
            media.content_length = Some(declared);
        }
        fetcher
    }

    pub fn gated_audio(mut self, url: &str, bytes: usize, gate: Arc<Notify>) -> Self {
        let media = FetchedMedia {
            status: StatusCode::OK,
            content_type: Some("audio/mpeg".into()),
            content_length: Some(bytes as u64),
            body: vec![0xFF; bytes],
        };
        self.replies.insert(url.to_string(), Reply::Gated(gate, media));
        self
    }

    pub fn hanging(mut self, url: &str) -> Self {
        self.replies.insert(url.to_string(), Reply::Hang);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<FetchedMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let media = match self.replies.get(url.as_str()) {
            Some(Reply::Media(media)) => media.clone(),
            Some(Reply::Gated(gate, media)) => {
                gate.notified().await;
                media.clone()
            }
            Some(Reply::Hang) => return std::future::pending().await,
            None => return Err(anyhow!("connection refused")),
        };
        if media.body.len() as u64 > max_bytes {
            return Err(anyhow!("{url} exceeds the {max_bytes}-byte limit"));
        }
        Ok(media)
    }
}

#[derive(Default)]
struct BackendState {
    generate_replies: VecDeque<Result<GenerationResult>>,
    chat_replies: VecDeque<Result<ChatResponse>>,
    generate_requests: Vec<GenerationRequest>,
    chat_requests: Vec<ChatRequest>,
}

/// Replies are consumed in order; an exhausted queue never answers.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
    gate: Option<Arc<Notify>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self { gate: Some(gate), ..Self::default() }
    }

    pub fn push_generate(&self, reply: Result<GenerationResult>) {
        self.lock().generate_replies.push_back(reply);
    }

    pub fn push_chat(&self, reply: Result<ChatResponse>) {
        self.lock().chat_replies.push_back(reply);
    }

    pub fn generate_requests(&self) -> Vec<GenerationRequest> {
        self.lock().generate_requests.clone()
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.lock().chat_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExerciseBackend for FakeBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let reply = {
            let mut state = self.lock();
            state.generate_requests.push(request.clone());
            state.generate_replies.pop_front()
        };
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match reply {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let reply = {
            let mut state = self.lock();
            state.chat_requests.push(request.clone());
            state.chat_replies.pop_front()
        };
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match reply {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct PlayerLedger {
    live: AtomicUsize,
    max_live: AtomicUsize,
    loads: Mutex<Vec<PlayerKind>>,
    events: Mutex<VecDeque<PlayerEvent>>,
}

/// Counts live players so tests can check that sessions never overlap.
#[derive(Clone, Default)]
pub struct FakePlayers {
    ledger: Arc<PlayerLedger>,
    primary_load_fails: bool,
    primary_play_fails: bool,
    fallback_load_fails: bool,
}

impl FakePlayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_primary_load(mut self) -> Self {
        self.primary_load_fails = true;
        self
    }

    pub fn failing_primary_play(mut self) -> Self {
        self.primary_play_fails = true;
        self
    }

    pub fn failing_fallback_load(mut self) -> Self {
        self.fallback_load_fails = true;
        self
    }

    pub fn live(&self) -> usize {
        self.ledger.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.ledger.max_live.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> Vec<PlayerKind> {
        self.ledger.loads.lock().map(|loads| loads.clone()).unwrap_or_default()
    }

    /// Queued for whichever player the engine polls next.
    pub fn push_event(&self, event: PlayerEvent) {
        if let Ok(mut events) = self.ledger.events.lock() {
            events.push_back(event);
        }
    }
}

#[async_trait]
impl PlayerFactory for FakePlayers {
    async fn load(&self, kind: PlayerKind, _media: &VerifiedMedia) -> Result<Box<dyn Player>> {
        if let Ok(mut loads) = self.ledger.loads.lock() {
            loads.push(kind);
        }
        let fails = match kind {
            PlayerKind::Primary => self.primary_load_fails,
            PlayerKind::Fallback => self.fallback_load_fails,
        };
        if fails {
            return Err(anyhow!("{kind:?} player could not decode the stream"));
        }
        let live = self.ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.max_live.fetch_max(live, Ordering::SeqCst);
        let play_fails = kind == PlayerKind::Primary && self.primary_play_fails;
        Ok(Box::new(FakePlayer { ledger: self.ledger.clone(), play_fails }))
    }
}

struct FakePlayer {
    ledger: Arc<PlayerLedger>,
    play_fails: bool,
}

impl Player for FakePlayer {
    fn play(&mut self) -> Result<()> {
        if self.play_fails {
            return Err(anyhow!("output device rejected the stream"));
        }
        Ok(())
    }

    fn pause(&mut self) {}

    fn stop(&mut self) {}

    fn poll_event(&mut self) -> Option<PlayerEvent> {
        self.ledger.events.lock().ok().and_then(|mut events| events.pop_front())
    }
}

impl Drop for FakePlayer {
    fn drop(&mut self) {
        self.ledger.live.fetch_sub(1, Ordering::SeqCst);
    }
}
