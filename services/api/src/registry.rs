//! Session registry: the single shared map from session id to live session.
//!
//! This is the only state touched by more than one thread of control (the
//! transports and the workers), so every lifecycle operation goes through one
//! mutex-guarded map. The invariant the registry maintains is *at most one
//! worker per session id*: registering an id that already has a live worker
//! re-attaches the new transport to it instead of spawning a second worker.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{Instrument, info, warn};

use crate::bridge::SessionEntry;
use crate::transport::Transport;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionEntry>>>,
}

/// How a `register` call resolved.
pub enum Registration {
    /// A new entry was created and its worker spawned.
    Created(Arc<SessionEntry>),
    /// A live worker already owned this id; the transport was re-attached.
    Reattached(Arc<SessionEntry>),
}

impl Registration {
    pub fn entry(&self) -> &Arc<SessionEntry> {
        match self {
            Self::Created(entry) | Self::Reattached(entry) => entry,
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport under a session id. If the id already has a live
    /// worker this is a reconnect: the handle is re-attached and `worker` is
    /// never invoked. Otherwise a fresh entry is created and `worker` is
    /// spawned as the session's single conversational loop.
    pub async fn register<F, Fut>(
        &self,
        id: &str,
        transport: Arc<dyn Transport>,
        worker: F,
    ) -> Registration
    where
        F: FnOnce(Arc<SessionEntry>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get(id) {
            if !entry.is_closed() {
                info!(session = id, "re-attaching transport to live session");
                entry.attach(transport, true).await;
                return Registration::Reattached(entry.clone());
            }
        }

        let entry = Arc::new(SessionEntry::new(id));
        entry.attach(transport, false).await;
        sessions.insert(id.to_string(), entry.clone());

        let span = tracing::info_span!("session_worker", session = id);
        tokio::spawn(worker(entry.clone()).instrument(span));
        info!(session = id, "session created");
        Registration::Created(entry)
    }

    /// Routes a human message to its session's pending-input slot.
    pub async fn submit_input(&self, id: &str, text: String) {
        let entry = self.sessions.lock().await.get(id).cloned();
        match entry {
            Some(entry) => entry.submit_input(text).await,
            None => warn!(session = id, "dropping input for unknown session"),
        }
    }

    /// Clears a session's transport handle on disconnect. The worker and its
    /// state stay alive so a reconnect can resume the challenge.
    pub async fn detach(&self, id: &str) {
        if let Some(entry) = self.sessions.lock().await.get(id).cloned() {
            entry.detach().await;
            info!(session = id, "transport detached");
        }
    }

    /// Removes the session and wakes its worker if blocked. Idempotent.
    pub async fn teardown(&self, id: &str) {
        if let Some(entry) = self.sessions.lock().await.remove(id) {
            entry.close();
            info!(session = id, "session torn down");
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::WaitOutcome;
    use crate::bridge::test_support::{RecordingTransport, wait_until};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// A minimal echo worker: echoes input, greets after a reconnect.
    fn echo_worker(
        entry: Arc<SessionEntry>,
    ) -> impl Future<Output = ()> + Send + 'static {
        async move {
            loop {
                match entry.await_input(Duration::from_secs(5)).await {
                    WaitOutcome::Input(text) => {
                        entry.emit(&format!("echo {text}")).await;
                    }
                    WaitOutcome::Reattached => {
                        entry.wait_ready().await;
                        entry.emit("welcome back").await;
                    }
                    WaitOutcome::TimedOut | WaitOutcome::Closed => break,
                }
            }
        }
    }

    #[tokio::test]
    async fn reconnect_reattaches_and_resume_output_reaches_the_new_handle() {
        let registry = Arc::new(SessionRegistry::new());
        let first = RecordingTransport::new();

        let registration = registry.register("s1", first.clone(), echo_worker).await;
        assert!(matches!(registration, Registration::Created(_)));

        registry.submit_input("s1", "one".to_string()).await;
        assert!(
            wait_until(|| async { first.joined_output().await.contains("echo one") }).await,
            "worker should echo over the first transport"
        );

        // Disconnect mid-session, then reconnect with a fresh handle.
        registry.detach("s1").await;
        let second = RecordingTransport::new();
        let registration = registry.register("s1", second.clone(), echo_worker).await;
        assert!(matches!(registration, Registration::Reattached(_)));

        assert!(
            wait_until(|| async { second.joined_output().await.contains("welcome back") }).await,
            "resume output must land on the new transport"
        );
        assert!(
            !first.joined_output().await.contains("welcome back"),
            "resume output must not leak to the stale transport"
        );

        // The resumed worker still serves the same slot.
        registry.submit_input("s1", "two".to_string()).await;
        assert!(
            wait_until(|| async { second.joined_output().await.contains("echo two") }).await
        );
    }

    #[tokio::test]
    async fn at_most_one_worker_per_session_id() {
        let registry = Arc::new(SessionRegistry::new());
        let spawned = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let spawned = spawned.clone();
            registry
                .register("s1", RecordingTransport::new(), move |entry| async move {
                    spawned.fetch_add(1, Ordering::SeqCst);
                    let _ = entry.await_input(Duration::from_secs(5)).await;
                })
                .await;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_wakes_the_worker() {
        let registry = Arc::new(SessionRegistry::new());
        let transport = RecordingTransport::new();
        let registration = registry
            .register("s1", transport.clone(), echo_worker)
            .await;
        let entry = registration.entry().clone();

        registry.teardown("s1").await;
        registry.teardown("s1").await;

        assert!(entry.is_closed());
        assert!(!registry.contains("s1").await);
    }

    #[tokio::test]
    async fn registering_after_teardown_starts_a_fresh_worker() {
        let registry = Arc::new(SessionRegistry::new());
        let spawned = Arc::new(AtomicUsize::new(0));

        let worker = {
            let spawned = spawned.clone();
            move |entry: Arc<SessionEntry>| {
                let spawned = spawned.clone();
                async move {
                    spawned.fetch_add(1, Ordering::SeqCst);
                    let _ = entry.await_input(Duration::from_secs(5)).await;
                }
            }
        };

        registry
            .register("s1", RecordingTransport::new(), worker.clone())
            .await;
        registry.teardown("s1").await;
        let registration = registry
            .register("s1", RecordingTransport::new(), worker)
            .await;
        assert!(matches!(registration, Registration::Created(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn input_for_unknown_sessions_is_dropped() {
        let registry = SessionRegistry::new();
        // Must not panic or create an entry.
        registry.submit_input("ghost", "boo".to_string()).await;
        assert!(!registry.contains("ghost").await);
    }
}
