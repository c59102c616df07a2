use crate::api::ExerciseBackend;
use crate::error::EtudeError;
use crate::events::{AppEvent, EventSink, ExerciseSummary, Notice};
use crate::playback::PlaybackEngine;
use crate::types::{GenerationRequest, GenerationResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Submits generation requests and routes the returned audio into the playback engine.
pub struct GenerationOrchestrator {
    backend: Arc<dyn ExerciseBackend>,
    playback: Arc<Mutex<PlaybackEngine>>,
    events: EventSink,
    timeout: Duration,
    busy: BusyFlag,
    latest: AtomicU64,
}

impl GenerationOrchestrator {
    pub fn new(
        backend: Arc<dyn ExerciseBackend>,
        playback: Arc<Mutex<PlaybackEngine>>,
        events: EventSink,
        timeout: Duration,
    ) -> Self {
        let busy = BusyFlag::new(events.clone());
        Self { backend, playback, events, timeout, busy, latest: AtomicU64::new(0) }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_set()
    }

    /// Responses to calls made before this point are dropped when they arrive.
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, EtudeError> {
        if let Err(err) = request.validate() {
            self.events.notice(Notice::error(err.to_string()));
            return Err(err);
        }
        let Some(_busy) = self.busy.try_acquire() else {
            return Err(EtudeError::GenerationInFlight);
        };
        let token = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        info!(token, instrument = %request.instrument, mode = ?request.mode, "generating exercise");

        let result = match timeout(self.timeout, self.backend.generate(&request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => return Err(self.fail(format!("{err:#}"))),
            Err(_) => {
                return Err(self.fail(format!("no response within {}s", self.timeout.as_secs())))
            }
        };
        if let Err(reason) = result.validate() {
            return Err(self.fail(format!("malformed exercise: {reason}")));
        }

        if self.latest.load(Ordering::SeqCst) != token {
            debug!(token, "discarding superseded generation response");
            return Err(EtudeError::Superseded);
        }

        let target = request.target_units();
        if result.total_duration != target {
            warn!(target, actual = result.total_duration, "exercise length differs from request");
            self.events.notice(Notice::warning(format!(
                "Exercise spans {} eighth-note units; {} were requested",
                result.total_duration, target
            )));
        }
        self.events.emit(AppEvent::ExerciseReady(summarize(&result)));

        if let Err(err) = self.hand_off(&result).await {
            debug!("playback did not start: {err}");
        }
        Ok(result)
    }

    /// Starts playback without holding the engine while the audio is verified, so stop and
    /// status requests are served during the check.
    async fn hand_off(&self, result: &GenerationResult) -> Result<(), EtudeError> {
        let pending = self.playback.lock().await.begin(&result.mp3_url, result.midi_url.as_deref())?;
        let outcome = pending.run().await;
        self.playback.lock().await.finish(pending, outcome).await
    }

    fn fail(&self, reason: String) -> EtudeError {
        let err = EtudeError::GenerationRequestFailed(reason);
        warn!("{err}");
        self.events.notice(Notice::error(err.to_string()));
        err
    }
}

fn summarize(result: &GenerationResult) -> ExerciseSummary {
    let rests = result.rest_count();
    ExerciseSummary {
        notes: result.exercise.len() - rests,
        rests,
        total_units: result.total_duration,
        tempo: result.tempo.clone(),
        time_signature: result.time_signature.clone(),
        audio_duration: result.duration.clone(),
    }
}

/// Busy indicator for the generate trigger. Cleared when the guard drops, whichever way the
/// call exits.
#[derive(Debug, Clone)]
pub struct BusyFlag {
    flag: Arc<AtomicBool>,
    events: EventSink,
}

impl BusyFlag {
    pub fn new(events: EventSink) -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), events }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).ok()?;
        self.events.emit(AppEvent::Busy(true));
        Some(BusyGuard { flag: self.flag.clone(), events: self.events.clone() })
    }
}

pub struct BusyGuard {
    flag: Arc<AtomicBool>,
    events: EventSink,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.events.emit(AppEvent::Busy(false));
    }
}
