//! Concurrency bridge between event-driven transports and blocking workers.
//!
//! A session worker wants to sit in a plain prompt-read-evaluate loop, but
//! the transport that feeds it is event-driven, shared with many other
//! sessions, and may disconnect and reconnect mid-challenge. Each session
//! therefore gets a [`SessionEntry`]: a single-slot latest-wins input
//! channel, a swappable transport handle (output degrades to a no-op across
//! transport gaps), and a ready gate that orders resumed output after the new
//! transport has finished subscribing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::transport::Transport;

/// Poll interval for the ready-gate busy-wait.
const READY_GATE_POLL: Duration = Duration::from_millis(25);

/// Bound on the ready-gate busy-wait (~5 seconds).
const READY_GATE_ATTEMPTS: u32 = 200;

/// What a blocked input request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A line of input arrived.
    Input(String),
    /// A new transport re-attached while the worker was waiting. The worker
    /// must pass the ready gate before emitting its resume output.
    Reattached,
    /// Nothing arrived within the timeout. Fatal during identity collection,
    /// a soft re-prompt during normal play.
    TimedOut,
    /// The session was torn down.
    Closed,
}

/// Per-session bridge state shared between the worker and the transports.
pub struct SessionEntry {
    id: String,
    slot: Mutex<Option<String>>,
    input_notify: Notify,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    ready: AtomicBool,
    resumed: Notify,
    closed: AtomicBool,
}

impl SessionEntry {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            slot: Mutex::new(None),
            input_notify: Notify::new(),
            transport: Mutex::new(None),
            ready: AtomicBool::new(false),
            resumed: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queues a line for the worker. Any line still unread is superseded:
    /// the slot keeps only the most recent message.
    pub async fn submit_input(&self, text: String) {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            debug!(session = %self.id, "superseding unread input");
        }
        *slot = Some(text);
        self.input_notify.notify_one();
    }

    /// Blocking-with-timeout read of the pending-input slot.
    pub async fn await_input(&self, timeout: Duration) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return WaitOutcome::Closed;
            }
            if let Some(text) = self.slot.lock().await.take() {
                return WaitOutcome::Input(text);
            }
            tokio::select! {
                _ = self.input_notify.notified() => {}
                _ = self.resumed.notified() => return WaitOutcome::Reattached,
                _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
            }
        }
    }

    /// Attaches a transport handle. Ordering carries the reconnect
    /// guarantee: the handle is set first, a waiting worker is woken, and
    /// the ready flag flips last; the worker busy-waits on that flag before
    /// emitting its resume output, so nothing is sent before the new
    /// transport has finished subscribing.
    pub async fn attach(&self, transport: Arc<dyn Transport>, reconnect: bool) {
        *self.transport.lock().await = Some(transport);
        if reconnect {
            self.resumed.notify_one();
        }
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Drops the transport handle, leaving the worker and its state intact
    /// so a later reconnect can resume the challenge.
    pub async fn detach(&self) {
        self.ready.store(false, Ordering::SeqCst);
        *self.transport.lock().await = None;
    }

    /// Bounded sleep loop on the ready gate. Returns the final gate state;
    /// a worker that sees `false` simply emits into the void (no-op sends).
    pub async fn wait_ready(&self) -> bool {
        for _ in 0..READY_GATE_ATTEMPTS {
            if self.ready.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(READY_GATE_POLL).await;
        }
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the session closed and wakes a blocked worker. Idempotent.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.input_notify.notify_one();
    }

    /// Sleep-polls until the session is closed. Used by drivers (like the
    /// terminal runner) that outlive their worker.
    pub async fn wait_closed(&self) {
        while !self.is_closed() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Whether a transport is currently attached. Workers use this to bound
    /// how long a detached session is retained.
    pub async fn has_transport(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    async fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().await.clone()
    }

    /// Emits a line to whichever transport is attached right now; a no-op
    /// across transport gaps so the worker never blocks or crashes on one.
    pub async fn emit(&self, text: &str) {
        if let Some(transport) = self.current_transport().await {
            transport.send(text).await;
        }
    }

    pub async fn set_title(&self, title: &str) {
        if let Some(transport) = self.current_transport().await {
            transport.set_title(title).await;
        }
    }

    pub async fn clear_panel(&self, panel: &str) {
        if let Some(transport) = self.current_transport().await {
            transport.clear_panel(panel).await;
        }
    }

    pub async fn progress(&self, chapter: usize, challenge: usize) {
        if let Some(transport) = self.current_transport().await {
            transport.progress(chapter, challenge).await;
        }
    }

    pub async fn session_ended(&self) {
        if let Some(transport) = self.current_transport().await {
            transport.session_ended().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::transport::Transport;

    /// Transport that records everything it is handed, for assertions.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub lines: Mutex<Vec<String>>,
        pub progress_updates: Mutex<Vec<(usize, usize)>>,
        pub titles: Mutex<Vec<String>>,
        pub ended: AtomicBool,
    }

    impl RecordingTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub async fn joined_output(&self) -> String {
            self.lines.lock().await.join("\n")
        }

        pub fn has_ended(&self) -> bool {
            self.ended.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, text: &str) {
            self.lines.lock().await.push(text.to_string());
        }

        async fn session_ended(&self) {
            self.ended.store(true, Ordering::SeqCst);
        }

        async fn set_title(&self, title: &str) {
            self.titles.lock().await.push(title.to_string());
        }

        async fn progress(&self, chapter: usize, challenge: usize) {
            self.progress_updates.lock().await.push((chapter, challenge));
        }
    }

    /// Polls `cond` until it holds or a couple of seconds pass.
    pub async fn wait_until<F, Fut>(mut cond: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if cond().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
