use crate::verify::VerifiedMedia;
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerKind {
    Primary,
    Fallback,
}

/// What a player reports back to the engine between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Ended,
    Failed(String),
}

/// A loaded audio output bound to one verified resource. `stop` must be safe to call
/// repeatedly.
pub trait Player: Send + Sync {
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn stop(&mut self);

    fn poll_event(&mut self) -> Option<PlayerEvent>;
}

#[async_trait]
pub trait PlayerFactory: Send + Sync {
    async fn load(&self, kind: PlayerKind, media: &VerifiedMedia) -> Result<Box<dyn Player>>;
}
