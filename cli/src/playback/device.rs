use super::player::{Player, PlayerEvent, PlayerFactory, PlayerKind};
use crate::verify::VerifiedMedia;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info};

const CACHE_FILE_FALLBACK: &str = "exercise.mp3";

/// Players backed by the local machine: an in-process decoder as primary and an external
/// player process as fallback.
#[derive(Debug, Clone)]
pub struct DevicePlayers {
    cache_dir: PathBuf,
    fallback_command: Vec<String>,
}

impl DevicePlayers {
    pub fn new(cache_dir: PathBuf, fallback_command: Vec<String>) -> Self {
        Self { cache_dir, fallback_command }
    }

    async fn cache(&self, media: &VerifiedMedia) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .with_context(|| format!("failed to create cache dir {}", self.cache_dir.display()))?;
        let name = media
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or(CACHE_FILE_FALLBACK);
        let path = self.cache_dir.join(name);
        tokio::fs::write(&path, &media.body)
            .await
            .with_context(|| format!("failed to cache audio at {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait]
impl PlayerFactory for DevicePlayers {
    async fn load(&self, kind: PlayerKind, media: &VerifiedMedia) -> Result<Box<dyn Player>> {
        match kind {
            PlayerKind::Primary => load_decoder(media),
            PlayerKind::Fallback => {
                let path = self.cache(media).await?;
                let player = CommandPlayer::new(&self.fallback_command, path)?;
                Ok(Box::new(player))
            }
        }
    }
}

#[cfg(feature = "audio")]
fn load_decoder(media: &VerifiedMedia) -> Result<Box<dyn Player>> {
    Ok(Box::new(decoder::DecoderPlayer::open(media.body.clone())?))
}

#[cfg(not(feature = "audio"))]
fn load_decoder(media: &VerifiedMedia) -> Result<Box<dyn Player>> {
    debug!(url = %media.url, "in-process decoding unavailable");
    Err(anyhow!("built without the `audio` feature; no in-process decoder"))
}

#[cfg(feature = "audio")]
mod decoder {
    use super::{Player, PlayerEvent};
    use anyhow::{Context, Result};
    use rodio::{Decoder, OutputStream, Sink};
    use std::io::Cursor;

    pub(super) struct DecoderPlayer {
        _stream: OutputStream,
        sink: Sink,
        started: bool,
        finished: bool,
    }

    // The output stream is only touched through the engine, which sits behind a mutex.
    unsafe impl Send for DecoderPlayer {}
    unsafe impl Sync for DecoderPlayer {}

    impl DecoderPlayer {
        pub(super) fn open(bytes: Vec<u8>) -> Result<Self> {
            let decoder = Decoder::new(Cursor::new(bytes)).context("failed to decode audio")?;
            let (stream, handle) =
                OutputStream::try_default().context("failed to open audio output")?;
            let sink = Sink::try_new(&handle).context("failed to create audio sink")?;
            sink.pause();
            sink.append(decoder);
            Ok(Self { _stream: stream, sink, started: false, finished: false })
        }
    }

    impl Player for DecoderPlayer {
        fn play(&mut self) -> Result<()> {
            self.sink.play();
            self.started = true;
            Ok(())
        }

        fn pause(&mut self) {
            self.sink.pause();
        }

        fn stop(&mut self) {
            self.sink.stop();
            self.finished = true;
        }

        fn poll_event(&mut self) -> Option<PlayerEvent> {
            if self.started && !self.finished && self.sink.empty() {
                self.finished = true;
                return Some(PlayerEvent::Ended);
            }
            None
        }
    }
}

/// Hands a cached copy of the audio to an external player such as `ffplay`.
struct CommandPlayer {
    program: String,
    args: Vec<String>,
    path: PathBuf,
    child: Option<Child>,
}

impl CommandPlayer {
    fn new(command: &[String], path: PathBuf) -> Result<Self> {
        let (program, args) =
            command.split_first().ok_or_else(|| anyhow!("no fallback player configured"))?;
        Ok(Self { program: program.clone(), args: args.to_vec(), path, child: None })
    }

    fn spawn(&self, path: &Path) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch fallback player `{}`", self.program))
    }
}

impl Player for CommandPlayer {
    fn play(&mut self) -> Result<()> {
        if self.child.is_none() {
            let child = self.spawn(&self.path)?;
            info!(program = %self.program, path = %self.path.display(), "fallback player started");
            self.child = Some(child);
        }
        Ok(())
    }

    fn pause(&mut self) {
        debug!(program = %self.program, "external player does not support pausing");
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn poll_event(&mut self) -> Option<PlayerEvent> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) => {
                self.child = None;
                if status.success() {
                    Some(PlayerEvent::Ended)
                } else {
                    Some(PlayerEvent::Failed(format!("{} exited with {status}", self.program)))
                }
            }
            Err(err) => Some(PlayerEvent::Failed(format!("failed to query {}: {err}", self.program))),
        }
    }
}

impl Drop for CommandPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
