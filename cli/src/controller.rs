//! Routes parsed commands to the components. The routing loop never waits on the playback
//! engine: playback commands are handled in order by their own task, generation and chat run
//! as spawned tasks, and a monitor polls the active player.

use crate::api::ExerciseBackend;
use crate::cli::Command;
use crate::config::AppConfig;
use crate::conversation::{self, ChatContext, ConversationSession};
use crate::error::EtudeError;
use crate::events::{AppEvent, EventSink, Notice};
use crate::generate::GenerationOrchestrator;
use crate::playback::PlaybackEngine;
use crate::types::GenerationRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

const PLAYBACK_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    backend: Arc<dyn ExerciseBackend>,
    orchestrator: GenerationOrchestrator,
    playback: Arc<Mutex<PlaybackEngine>>,
    conversation: Mutex<ConversationSession>,
    events: EventSink,
    chat_timeout: Duration,
}

impl Controller {
    pub fn new(
        backend: Arc<dyn ExerciseBackend>,
        engine: PlaybackEngine,
        events: EventSink,
        config: &AppConfig,
    ) -> Self {
        let playback = Arc::new(Mutex::new(engine));
        let orchestrator = GenerationOrchestrator::new(
            backend.clone(),
            playback.clone(),
            events.clone(),
            config.request_timeout(),
        );
        let conversation = ConversationSession::new(ChatContext {
            instrument: config.default_instrument(),
            level: config.default_level(),
        });
        let inner = ControllerInner {
            backend,
            orchestrator,
            playback,
            conversation: Mutex::new(conversation),
            events,
            chat_timeout: config.chat_timeout(),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Runs until `command_rx` closes.
    pub fn spawn(self, mut command_rx: UnboundedReceiver<Command>) -> JoinHandle<()> {
        let (playback_tx, playback_rx) = unbounded_channel();
        Controller::spawn_playback_worker(self.inner.clone(), playback_rx);
        Controller::spawn_playback_monitor(self.inner.clone());

        let inner = self.inner;
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                Controller::route(&inner, &playback_tx, command).await;
            }
            let _ = playback_tx.send(Command::Stop);
        })
    }

    async fn route(inner: &Arc<ControllerInner>, playback_tx: &UnboundedSender<Command>, command: Command) {
        match command {
            Command::Generate(request) => {
                inner.conversation.lock().await.set_context(ChatContext {
                    instrument: request.instrument,
                    level: request.level,
                });
                tokio::spawn(Controller::generate(inner.clone(), request));
            }
            Command::Chat(text) => {
                tokio::spawn(Controller::chat(inner.clone(), text));
            }
            Command::Reset => {
                inner.orchestrator.invalidate();
                let _ = playback_tx.send(Command::Stop);
                let mut session = inner.conversation.lock().await;
                session.reset();
                inner.events.emit(AppEvent::Transcript(session.turns().to_vec()));
                info!("started over");
                inner.events.notice(Notice::info("Started over; pending replies will be ignored"));
            }
            command @ (Command::Play
            | Command::Pause
            | Command::Stop
            | Command::DownloadMidi
            | Command::Status) => {
                if playback_tx.send(command).is_err() {
                    error!("playback worker is gone");
                }
            }
            Command::Help | Command::Quit => {}
        }
    }

    async fn generate(inner: Arc<ControllerInner>, request: GenerationRequest) {
        match inner.orchestrator.generate(request).await {
            Ok(_) => {}
            Err(EtudeError::GenerationInFlight) => {
                inner.events.notice(Notice::warning("still working on the previous exercise"))
            }
            Err(err) => debug!("generation ended without an exercise: {err}"),
        }
    }

    async fn chat(inner: Arc<ControllerInner>, text: String) {
        let pending = {
            let mut session = inner.conversation.lock().await;
            match session.begin(&text) {
                Ok(pending) => {
                    inner.events.emit(AppEvent::Transcript(session.turns().to_vec()));
                    pending
                }
                Err(EtudeError::EmptyMessage) => return,
                Err(err) => {
                    inner.events.notice(Notice::warning(err.to_string()));
                    return;
                }
            }
        };

        let outcome =
            conversation::dispatch(inner.backend.as_ref(), pending.request(), inner.chat_timeout).await;

        let mut session = inner.conversation.lock().await;
        match session.complete(pending, outcome) {
            Ok(()) => {}
            Err(EtudeError::Superseded) => return,
            Err(err) => inner.events.notice(Notice::error(err.to_string())),
        }
        inner.events.emit(AppEvent::Transcript(session.turns().to_vec()));
    }

    fn spawn_playback_worker(inner: Arc<ControllerInner>, mut playback_rx: UnboundedReceiver<Command>) {
        tokio::spawn(async move {
            while let Some(command) = playback_rx.recv().await {
                let mut playback = inner.playback.lock().await;
                match command {
                    Command::Play => {
                        if let Err(err) = playback.play().await {
                            debug!("play: {err}");
                        }
                    }
                    Command::Pause => playback.pause(),
                    Command::Stop => playback.stop(),
                    Command::DownloadMidi => {
                        if let Err(err) = playback.download_alternate().await {
                            error!("notation download failed: {err}");
                            inner.events.notice(Notice::error(err.to_string()));
                        }
                    }
                    Command::Status => {
                        let message = match playback.status() {
                            Some(status) => format!(
                                "session #{} {} via {:?} ({})",
                                status.id,
                                status.state.label(),
                                status.active,
                                status
                                    .resource_url
                                    .map(|url| url.to_string())
                                    .unwrap_or_else(|| "-".into())
                            ),
                            None => "no exercise yet".to_string(),
                        };
                        inner.events.notice(Notice::info(message));
                    }
                    other => debug!(?other, "not a playback command"),
                }
            }
        });
    }

    fn spawn_playback_monitor(inner: Arc<ControllerInner>) {
        tokio::spawn(async move {
            let mut ticker = interval(PLAYBACK_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let mut playback = inner.playback.lock().await;
                if let Err(err) = playback.poll().await {
                    debug!("playback poll: {err}");
                }
            }
        });
    }
}
