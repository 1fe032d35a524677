//! Terminal transport: the same session worker driven by stdin/stdout.
//!
//! This is the second implementation of the transport boundary. The worker
//! code is identical to the networked path; only the delivery of lines
//! differs, which is the point of the bridge.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::registry::SessionRegistry;
use crate::transport::Transport;
use crate::worker::{SessionDeps, run_session};

const TERMINAL_SESSION_ID: &str = "terminal";

struct TerminalTransport;

#[async_trait]
impl Transport for TerminalTransport {
    async fn send(&self, text: &str) {
        println!("{text}");
    }

    async fn session_ended(&self) {
        println!("\n[session ended]");
    }

    async fn set_title(&self, title: &str) {
        // OSC 0 sets the terminal window title.
        print!("\x1b]0;{title}\x07");
    }

    async fn clear_panel(&self, _panel: &str) {
        print!("\x1b[2J\x1b[H");
    }
}

/// Runs a single interactive session against the local terminal, returning
/// when the session ends or stdin closes.
pub async fn run_terminal(registry: Arc<SessionRegistry>, deps: Arc<SessionDeps>) -> Result<()> {
    let registration = {
        let registry = registry.clone();
        let deps = deps.clone();
        registry
            .clone()
            .register(TERMINAL_SESSION_ID, Arc::new(TerminalTransport), move |entry| {
                run_session(entry, registry, deps)
            })
            .await
    };
    let entry = registration.entry().clone();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => registry.submit_input(TERMINAL_SESSION_ID, line).await,
                    None => {
                        info!("stdin closed; tearing down terminal session");
                        registry.teardown(TERMINAL_SESSION_ID).await;
                        break;
                    }
                }
            }
            () = entry.wait_closed() => break,
        }
    }
    Ok(())
}
