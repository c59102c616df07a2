use anyhow::{anyhow, Result};
use etude::{
    api::{self, ExerciseBackend},
    cli::{self, Command, Parameters},
    config::AppConfig,
    controller::Controller,
    conversation::TurnStatus,
    events::{AppEvent, EventSink, Notice, RecoveryAction},
    playback::{DevicePlayers, EngineSettings, PlaybackEngine},
    url::UrlResolver,
    verify::AvailabilityVerifier,
};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing()?;
    info!("starting etude");

    let config = AppConfig::load()?;
    let client = Arc::new(api::Client::new(config.base_url())?);

    let (event_tx, event_rx) = unbounded_channel();
    let (command_tx, command_rx) = unbounded_channel();
    let events = EventSink::new(event_tx);

    let verifier = AvailabilityVerifier::new(client.clone(), config.verify_timeout(), config.min_audio_bytes())
        .with_max_bytes(config.max_audio_bytes());
    let players = DevicePlayers::new(config.cache_dir(), config.fallback_player().to_vec());
    let settings = EngineSettings { artifact_dir: config.artifact_dir().clone(), autoplay: config.autoplay() };
    let engine = PlaybackEngine::new(
        UrlResolver::new(client.base_url()),
        verifier,
        Arc::new(players),
        events.clone(),
        settings,
    );

    let backend: Arc<dyn ExerciseBackend> = client;
    Controller::new(backend, engine, events, &config).spawn(command_rx);
    tokio::spawn(print_events(event_rx));

    println!("etude: adaptive exercise generator. Type `help` for commands.");
    read_commands(&config, command_tx).await
}

fn setup_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err: Box<dyn std::error::Error + Send + Sync>| {
            anyhow!("failed to initialise tracing: {err}")
        })?;
    Ok(())
}

async fn read_commands(config: &AppConfig, command_tx: UnboundedSender<Command>) -> Result<()> {
    let mut params = Parameters::new(config.default_instrument(), config.default_level());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match cli::parse_line(&line, &mut params) {
            Ok(None) => {}
            Ok(Some(Command::Help)) => println!("{}", cli::HELP),
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if command_tx.send(command).is_err() {
                    return Err(anyhow!("controller stopped unexpectedly"));
                }
            }
            Err(err) => println!("[error] {err}"),
        }
    }

    let _ = command_tx.send(Command::Stop);
    Ok(())
}

async fn print_events(mut event_rx: UnboundedReceiver<AppEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            AppEvent::Busy(true) => println!("generating…"),
            AppEvent::Busy(false) => {}
            AppEvent::PlaybackState { session, state } => {
                println!("[playback #{session}] {}", state.label())
            }
            AppEvent::Notice(notice) => print_notice(&notice),
            AppEvent::ExerciseReady(summary) => println!(
                "exercise ready: {} notes, {} rests, {} eighth-note units, {} BPM, {} ({})",
                summary.notes,
                summary.rests,
                summary.total_units,
                summary.tempo,
                summary.time_signature,
                summary.audio_duration
            ),
            AppEvent::Transcript(turns) => match turns.last() {
                Some(turn) => {
                    let marker = match turn.status {
                        TurnStatus::Pending => "(waiting)",
                        TurnStatus::Confirmed => "",
                        TurnStatus::Failed => "(failed)",
                    };
                    println!("tutor{marker}: {}", turn.assistant_text);
                }
                None => println!("(conversation cleared)"),
            },
        }
    }
}

fn print_notice(notice: &Notice) {
    println!("{notice}");
    if let Some(RecoveryAction::DownloadAlternate { url }) = &notice.recovery {
        println!("        type `midi` to download the notation instead ({url})");
    }
}
