//! Playback sessions: verify a generated audio resource, hand it to the primary player, and
//! fall back to the secondary player when the primary cannot load or fails mid-playback.

mod device;
mod player;

pub use device::DevicePlayers;
pub use player::{Player, PlayerEvent, PlayerFactory, PlayerKind};

use crate::error::EtudeError;
use crate::events::{AppEvent, EventSink, Notice, RecoveryAction};
use crate::url::UrlResolver;
use crate::verify::{AvailabilityVerifier, VerifiedMedia};
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const DEFAULT_ALTERNATE_NAME: &str = "exercise.mid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    Unverified,
    Verified,
    VerificationFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Verifying,
    VerificationFailed,
    Verified,
    PrimaryLoading,
    PrimaryReady,
    PrimaryLoadError,
    FallbackLoading,
    FallbackPlaying,
    FallbackError,
    Playing,
    Paused,
    Stopped,
}

impl PlayerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::FallbackError | Self::VerificationFailed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Verifying => "verifying",
            Self::VerificationFailed => "verification failed",
            Self::Verified => "verified",
            Self::PrimaryLoading => "loading",
            Self::PrimaryReady => "ready",
            Self::PrimaryLoadError => "primary player failed",
            Self::FallbackLoading => "loading fallback player",
            Self::FallbackPlaying => "playing (fallback)",
            Self::FallbackError => "playback failed",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub artifact_dir: PathBuf,
    pub autoplay: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub id: u64,
    pub resource_url: Option<Url>,
    pub alternate_url: Option<Url>,
    pub verification: VerificationState,
    pub state: PlayerState,
    pub active: Option<PlayerKind>,
}

struct PlaybackSession {
    id: u64,
    resource_url: Option<Url>,
    alternate_url: Option<Url>,
    verification: VerificationState,
    state: PlayerState,
    active: Option<PlayerKind>,
    player: Option<Box<dyn Player>>,
    media: Option<Arc<VerifiedMedia>>,
}

impl PlaybackSession {
    fn new(id: u64, alternate_url: Option<Url>) -> Self {
        Self {
            id,
            resource_url: None,
            alternate_url,
            verification: VerificationState::Unverified,
            state: PlayerState::Idle,
            active: None,
            player: None,
            media: None,
        }
    }
}

/// The pre-flight check of one session, detached from the engine.
pub struct PendingVerification {
    session: u64,
    url: Url,
    verifier: AvailabilityVerifier,
}

impl PendingVerification {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub async fn run(&self) -> Result<VerifiedMedia, EtudeError> {
        self.verifier.verify(&self.url).await
    }
}

/// Owns the single active playback session and its player handle.
pub struct PlaybackEngine {
    resolver: UrlResolver,
    verifier: AvailabilityVerifier,
    players: Arc<dyn PlayerFactory>,
    events: EventSink,
    settings: EngineSettings,
    sessions_started: u64,
    session: Option<PlaybackSession>,
}

impl PlaybackEngine {
    pub fn new(
        resolver: UrlResolver,
        verifier: AvailabilityVerifier,
        players: Arc<dyn PlayerFactory>,
        events: EventSink,
        settings: EngineSettings,
    ) -> Self {
        Self { resolver, verifier, players, events, settings, sessions_started: 0, session: None }
    }

    pub fn state(&self) -> Option<PlayerState> {
        self.session.as_ref().map(|session| session.state)
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|session| SessionStatus {
            id: session.id,
            resource_url: session.resource_url.clone(),
            alternate_url: session.alternate_url.clone(),
            verification: session.verification,
            state: session.state,
            active: session.active,
        })
    }

    /// Replaces whatever session is current with a fresh one for `audio_ref` and runs it to
    /// completion. Hard failures are returned and also surfaced as notices; the session is
    /// left in a terminal state. Holds `&mut self` across verification; callers sharing the
    /// engine should use `begin`/`finish` instead.
    pub async fn start(&mut self, audio_ref: &str, alternate_ref: Option<&str>) -> Result<(), EtudeError> {
        let pending = self.begin(audio_ref, alternate_ref)?;
        let outcome = pending.run().await;
        self.finish(pending, outcome).await
    }

    /// Opens a new session and moves it to `Verifying`. The returned check borrows nothing
    /// from the engine, so it can run while the engine is unlocked.
    pub fn begin(
        &mut self,
        audio_ref: &str,
        alternate_ref: Option<&str>,
    ) -> Result<PendingVerification, EtudeError> {
        self.release_session();

        self.sessions_started += 1;
        let id = self.sessions_started;
        let alternate_url = alternate_ref.and_then(|reference| match self.resolver.resolve(reference) {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(reference, "ignoring unusable alternate artifact reference: {err}");
                None
            }
        });
        info!(session = id, audio_ref, "starting playback session");
        self.session = Some(PlaybackSession::new(id, alternate_url));
        self.announce();

        let url = match self.resolver.resolve(audio_ref) {
            Ok(url) => url,
            Err(err) => return Err(self.fail_verification(err)),
        };
        if let Some(session) = self.session.as_mut() {
            session.resource_url = Some(url.clone());
        }
        self.transition(PlayerState::Verifying);
        Ok(PendingVerification { session: id, url, verifier: self.verifier.clone() })
    }

    /// Applies a verification outcome. If the session was stopped or replaced while the check
    /// ran, the outcome is discarded with `Superseded` and no player is built.
    pub async fn finish(
        &mut self,
        pending: PendingVerification,
        outcome: Result<VerifiedMedia, EtudeError>,
    ) -> Result<(), EtudeError> {
        let current = self.session.as_ref().map(|session| (session.id, session.state));
        if current != Some((pending.session, PlayerState::Verifying)) {
            debug!(session = pending.session, ?current, "discarding verification for an abandoned session");
            return Err(EtudeError::Superseded);
        }

        let media = match outcome {
            Ok(media) => Arc::new(media),
            Err(err) => return Err(self.fail_verification(err)),
        };
        for warning in &media.warnings {
            self.events.notice(Notice::warning(warning.describe(&pending.url)));
        }
        if let Some(session) = self.session.as_mut() {
            session.verification = VerificationState::Verified;
            session.media = Some(media.clone());
        }
        self.transition(PlayerState::Verified);

        self.load_primary(media).await
    }

    /// No-op unless the session is ready or paused.
    pub async fn play(&mut self) -> Result<(), EtudeError> {
        let outcome = match self.session.as_mut() {
            Some(session) if matches!(session.state, PlayerState::PrimaryReady | PlayerState::Paused) => {
                session.player.as_mut().map(|player| player.play())
            }
            Some(session) => {
                debug!(session = session.id, state = ?session.state, "play ignored");
                None
            }
            None => None,
        };
        match outcome {
            Some(Ok(())) => {
                self.transition(PlayerState::Playing);
                Ok(())
            }
            Some(Err(err)) => self.primary_failed(format!("{err:#}")).await,
            None => Ok(()),
        }
    }

    /// No-op unless the session is playing on the primary player.
    pub fn pause(&mut self) {
        let paused = match self.session.as_mut() {
            Some(session) if session.state == PlayerState::Playing => {
                if let Some(player) = session.player.as_mut() {
                    player.pause();
                }
                true
            }
            _ => false,
        };
        if paused {
            self.transition(PlayerState::Paused);
        }
    }

    pub fn stop(&mut self) {
        match self.state() {
            Some(state) if !state.is_terminal() => {
                self.release_player();
                self.transition(PlayerState::Stopped);
            }
            _ => {}
        }
    }

    /// Applies whatever the active player reported since the last call.
    pub async fn poll(&mut self) -> Result<(), EtudeError> {
        let event = match self.session.as_mut() {
            Some(session) if !session.state.is_terminal() => {
                session.player.as_mut().and_then(|player| player.poll_event())
            }
            _ => None,
        };
        let Some(event) = event else {
            return Ok(());
        };

        match event {
            PlayerEvent::Ended => {
                debug!("playback reached the end of the exercise");
                self.release_player();
                self.transition(PlayerState::Stopped);
                Ok(())
            }
            PlayerEvent::Failed(reason) => {
                let active = self.session.as_ref().and_then(|session| session.active);
                match active {
                    Some(PlayerKind::Primary) => self.primary_failed(reason).await,
                    _ => Err(self.fail_fallback(reason)),
                }
            }
        }
    }

    /// Saves the notation artifact of the current session into the artifact directory.
    pub async fn download_alternate(&self) -> Result<PathBuf, EtudeError> {
        let url = self
            .session
            .as_ref()
            .and_then(|session| session.alternate_url.clone())
            .ok_or(EtudeError::NoAlternateArtifact)?;
        let unavailable = |reason: String| EtudeError::ResourceUnavailable { url: url.to_string(), reason };

        let fetch = self.verifier.fetcher().fetch(&url, self.verifier.max_bytes());
        let media = match timeout(self.verifier.timeout(), fetch).await {
            Ok(Ok(media)) => media,
            Ok(Err(err)) => return Err(unavailable(format!("{err:#}"))),
            Err(_) => return Err(unavailable("download timed out".to_string())),
        };
        if !media.status.is_success() {
            return Err(unavailable(format!("server responded with status {}", media.status)));
        }

        let dir = &self.settings.artifact_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| EtudeError::ArtifactWrite { path: dir.clone(), source })?;
        let path = dir.join(artifact_file_name(&url, DEFAULT_ALTERNATE_NAME));
        tokio::fs::write(&path, &media.body)
            .await
            .map_err(|source| EtudeError::ArtifactWrite { path: path.clone(), source })?;

        info!(%url, path = %path.display(), "saved alternate artifact");
        self.events.notice(Notice::info(format!("Saved notation to {}", path.display())));
        Ok(path)
    }

    async fn load_primary(&mut self, media: Arc<VerifiedMedia>) -> Result<(), EtudeError> {
        self.transition(PlayerState::PrimaryLoading);
        match self.players.load(PlayerKind::Primary, &media).await {
            Ok(player) => {
                if let Some(session) = self.session.as_mut() {
                    session.player = Some(player);
                    session.active = Some(PlayerKind::Primary);
                }
                self.transition(PlayerState::PrimaryReady);
                if self.settings.autoplay {
                    self.play().await
                } else {
                    Ok(())
                }
            }
            Err(err) => {
                self.transition(PlayerState::PrimaryLoadError);
                self.engage_fallback(EtudeError::PrimaryPlaybackError(format!("{err:#}"))).await
            }
        }
    }

    async fn primary_failed(&mut self, reason: String) -> Result<(), EtudeError> {
        if self.state() == Some(PlayerState::PrimaryReady) {
            self.transition(PlayerState::PrimaryLoadError);
        }
        self.engage_fallback(EtudeError::PrimaryPlaybackError(reason)).await
    }

    async fn engage_fallback(&mut self, cause: EtudeError) -> Result<(), EtudeError> {
        warn!("{cause}; switching to the fallback player");
        self.events.notice(Notice::warning(format!("{cause}; trying the fallback player")));
        self.release_player();
        self.transition(PlayerState::FallbackLoading);

        let Some(media) = self.session.as_ref().and_then(|session| session.media.clone()) else {
            return Err(self.fail_fallback("no verified media to hand over".to_string()));
        };
        let started = match self.players.load(PlayerKind::Fallback, &media).await {
            Ok(mut player) => player.play().map(|()| player),
            Err(err) => Err(err),
        };
        match started {
            Ok(player) => {
                if let Some(session) = self.session.as_mut() {
                    session.player = Some(player);
                    session.active = Some(PlayerKind::Fallback);
                }
                self.transition(PlayerState::FallbackPlaying);
                Ok(())
            }
            Err(err) => Err(self.fail_fallback(format!("{err:#}"))),
        }
    }

    fn fail_verification(&mut self, err: EtudeError) -> EtudeError {
        warn!("playback verification failed: {err}");
        if let Some(session) = self.session.as_mut() {
            session.verification = VerificationState::VerificationFailed;
        }
        self.transition(PlayerState::VerificationFailed);
        self.events.notice(Notice::error(err.to_string()).with_recovery(self.recovery()));
        err
    }

    fn fail_fallback(&mut self, reason: String) -> EtudeError {
        let err = EtudeError::FallbackPlaybackError(reason);
        warn!("{err}");
        self.release_player();
        self.transition(PlayerState::FallbackError);
        self.events.notice(Notice::error(err.to_string()).with_recovery(self.recovery()));
        err
    }

    fn recovery(&self) -> Option<RecoveryAction> {
        self.session
            .as_ref()
            .and_then(|session| session.alternate_url.clone())
            .map(|url| RecoveryAction::DownloadAlternate { url })
    }

    fn release_player(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Some(mut player) = session.player.take() {
                player.stop();
            }
            session.active = None;
        }
    }

    fn release_session(&mut self) {
        self.stop();
        self.release_player();
        self.session = None;
    }

    fn transition(&mut self, state: PlayerState) {
        if let Some(session) = self.session.as_mut() {
            debug!(session = session.id, from = ?session.state, to = ?state, "playback transition");
            session.state = state;
        }
        self.announce();
    }

    fn announce(&self) {
        if let Some(session) = self.session.as_ref() {
            self.events.emit(AppEvent::PlaybackState { session: session.id, state: session.state });
        }
    }
}

fn artifact_file_name(url: &Url, default: &str) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or(default)
        .to_string()
}
