use crate::api::ExerciseBackend;
use crate::error::EtudeError;
use crate::types::{ChatRequest, ChatResponse, Instrument, SkillLevel};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const PLACEHOLDER_REPLY: &str = "…";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Sent, no reply yet.
    Pending,
    Confirmed,
    /// The request failed; the turn stays visible with an error marker.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub user_text: String,
    pub assistant_text: String,
    pub status: TurnStatus,
}

impl ConversationTurn {
    pub fn confirmed(&self) -> bool {
        self.status == TurnStatus::Confirmed
    }

    fn as_pair(&self) -> (String, String) {
        (self.user_text.clone(), self.assistant_text.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatContext {
    pub instrument: Instrument,
    pub level: SkillLevel,
}

/// A message that has been recorded locally and is waiting for the backend.
#[derive(Debug, Clone)]
pub struct PendingSend {
    token: u64,
    request: ChatRequest,
}

impl PendingSend {
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }
}

#[derive(Debug)]
pub struct ConversationSession {
    turns: Vec<ConversationTurn>,
    context: ChatContext,
    in_flight: Option<u64>,
    issued: u64,
}

impl ConversationSession {
    pub fn new(context: ChatContext) -> Self {
        Self { turns: Vec::new(), context, in_flight: None, issued: 0 }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn context(&self) -> ChatContext {
        self.context
    }

    pub fn is_waiting(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Applies to the next send; the transcript is kept.
    pub fn set_context(&mut self, context: ChatContext) {
        self.context = context;
    }

    /// Clears the transcript. A reply still in flight is dropped when it lands.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.in_flight = None;
    }

    /// Records `text` as a pending turn and builds the request for it.
    pub fn begin(&mut self, text: &str) -> Result<PendingSend, EtudeError> {
        let message = text.trim();
        if message.is_empty() {
            return Err(EtudeError::EmptyMessage);
        }
        if self.in_flight.is_some() {
            return Err(EtudeError::ChatInFlight);
        }

        let history = self.turns.iter().map(ConversationTurn::as_pair).collect();
        self.turns.push(ConversationTurn {
            user_text: message.to_string(),
            assistant_text: PLACEHOLDER_REPLY.to_string(),
            status: TurnStatus::Pending,
        });
        self.issued += 1;
        self.in_flight = Some(self.issued);

        let request = ChatRequest {
            message: message.to_string(),
            history,
            instrument: self.context.instrument,
            level: self.context.level,
        };
        Ok(PendingSend { token: self.issued, request })
    }

    /// Applies the backend's answer to a previously begun send. The server transcript
    /// replaces the local one wholesale.
    pub fn complete(
        &mut self,
        pending: PendingSend,
        outcome: anyhow::Result<ChatResponse>,
    ) -> Result<(), EtudeError> {
        if self.in_flight != Some(pending.token) {
            debug!(token = pending.token, "dropping reply for a superseded chat message");
            return Err(EtudeError::Superseded);
        }
        self.in_flight = None;

        match outcome {
            Ok(response) => {
                self.turns = response
                    .history
                    .into_iter()
                    .map(|(user_text, assistant_text)| ConversationTurn {
                        user_text,
                        assistant_text,
                        status: TurnStatus::Confirmed,
                    })
                    .collect();
                info!(turns = self.turns.len(), "chat transcript confirmed");
                Ok(())
            }
            Err(err) => {
                let err = EtudeError::ChatRequestFailed(format!("{err:#}"));
                warn!("{err}");
                let sent = &pending.request.message;
                if let Some(turn) = self
                    .turns
                    .iter_mut()
                    .rev()
                    .find(|turn| turn.status == TurnStatus::Pending && &turn.user_text == sent)
                {
                    turn.assistant_text = format!("Error: {err}");
                    turn.status = TurnStatus::Failed;
                }
                Err(err)
            }
        }
    }

    pub async fn send(
        &mut self,
        backend: &dyn ExerciseBackend,
        text: &str,
        limit: Duration,
    ) -> Result<(), EtudeError> {
        let pending = self.begin(text)?;
        let outcome = dispatch(backend, pending.request(), limit).await;
        self.complete(pending, outcome)
    }
}

/// The transport half of a send, usable without holding the session.
pub async fn dispatch(
    backend: &dyn ExerciseBackend,
    request: &ChatRequest,
    limit: Duration,
) -> anyhow::Result<ChatResponse> {
    match timeout(limit, backend.chat(request)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(anyhow::anyhow!("no reply within {}s", limit.as_secs())),
    }
}
