//! Transport boundary between session workers and the outside world.
//!
//! A terminal loop and a multiplexed WebSocket server are both valid
//! implementations of this boundary; the worker never knows which one it is
//! talking to. All signals are best-effort: a transport that has gone away
//! simply drops them.

use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers a line of output to the human.
    async fn send(&self, text: &str);

    /// Signals that the session is over and no further output will follow.
    async fn session_ended(&self);

    /// Updates the display title, where the transport has one.
    async fn set_title(&self, _title: &str) {}

    /// Clears a display panel, where the transport has panels.
    async fn clear_panel(&self, _panel: &str) {}

    /// Pushes a progress-indicator update.
    async fn progress(&self, _chapter: usize, _challenge: usize) {}
}
