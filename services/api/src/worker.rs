//! The per-session conversational loop.
//!
//! One worker owns one session end to end: identity collection, the
//! challenge turn loop, and teardown. It is logically single-threaded: it
//! suspends only while waiting for input or for a collaborator call, and no
//! two collaborator calls for the same session are ever in flight at once.
//! Everything it knows about the outside world goes through its
//! [`SessionEntry`](crate::bridge::SessionEntry).

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{info, warn};

use gauntlet_core::guide::Guide;
use gauntlet_core::llm::LanguageModel;
use gauntlet_core::mentor::{Advancement, Mentor};
use gauntlet_core::progress::{FeedbackLog, ProgressStore};
use gauntlet_core::responder::Responder;
use gauntlet_core::scanner::SecurityScanner;

use crate::bridge::{SessionEntry, WaitOutcome};
use crate::registry::SessionRegistry;

/// In-character apology for a Responder/Evaluator outage; such turns are not
/// counted as attempts.
const APOLOGY: &str = "I apologize, but I ran into a connection problem. Please try again.";

const GOODBYE: &str = "\nProgress saved! Goodbye! Thanks for learning about AI security!";

/// Consecutive input timeouts with no transport attached before a detached
/// session is retired. This bounds how long a disconnected worker lingers
/// waiting for a reconnect.
const ORPHAN_TIMEOUT_LIMIT: u32 = 3;

/// Builds a fresh responder for a new session. Each session needs its own
/// because the responder carries per-session conversation memory.
pub type ResponderFactory = Arc<dyn Fn() -> Arc<dyn Responder> + Send + Sync>;

/// Everything a session worker needs besides its bridge entry. Shared by all
/// sessions; nothing in here is per-session mutable state.
pub struct SessionDeps {
    pub guide: Arc<Guide>,
    pub responder_factory: ResponderFactory,
    pub evaluator: Arc<dyn LanguageModel>,
    pub explainer: Arc<dyn LanguageModel>,
    pub scanner: Arc<dyn SecurityScanner>,
    pub progress: ProgressStore,
    pub feedback: FeedbackLog,
    pub input_timeout: Duration,
    pub start_chapter: usize,
    pub start_challenge: usize,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        // Simple shape check; identity is self-reported and unverified.
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email regex is valid")
    })
}

/// Runs a session to completion. Spawned once per session by the registry.
pub async fn run_session(
    entry: Arc<SessionEntry>,
    registry: Arc<SessionRegistry>,
    deps: Arc<SessionDeps>,
) {
    let responder = (deps.responder_factory)();
    let mut mentor = Mentor::new(
        deps.guide.clone(),
        responder,
        deps.evaluator.clone(),
        deps.explainer.clone(),
        deps.scanner.clone(),
        deps.progress.clone(),
        deps.feedback.clone(),
    );
    mentor
        .restore_cursor(deps.start_chapter, deps.start_challenge)
        .await;

    entry.set_title(&deps.guide.title).await;
    entry.emit("\nWelcome to the AI Security Challenge!").await;
    entry
        .emit("Chat with the AI Professor while your mentor guides you through security challenges.")
        .await;
    entry.emit("Type 'exit' to quit, 'hint' for help.\n").await;

    // Identity collection runs under the fatal timeout policy: an
    // unresponsive session here ends instead of lingering anonymously.
    let Some((name, email)) = collect_identity(&entry, deps.input_timeout).await else {
        info!("session ended during identity collection");
        entry.session_ended().await;
        registry.teardown(entry.id()).await;
        return;
    };

    if let Some(welcome) = mentor.set_identity(&name, &email).await {
        emit_mentor(&entry, &welcome).await;
    }

    let intro = mentor.introduce_current_state().await;
    emit_mentor(&entry, &intro).await;

    loop {
        entry
            .progress(mentor.chapter_index(), mentor.challenge_index())
            .await;

        let Some(line) =
            play_input(&entry, &format!("\n{name}: "), deps.input_timeout).await
        else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        match line.to_lowercase().as_str() {
            "exit" | "quit" | "bye" => {
                if let Err(e) = mentor.save_progress() {
                    warn!(error = %e, "failed to save progress on exit");
                }
                entry.emit(GOODBYE).await;
                break;
            }
            "hint" | "help" => {
                match mentor.next_hint() {
                    Some(hint) => emit_mentor(&entry, &format!("💡 {hint}")).await,
                    None => {
                        emit_mentor(
                            &entry,
                            "This challenge has no hints — trust your instincts!",
                        )
                        .await
                    }
                }
            }
            "skip" => {
                // The confirmation gate lives here, at the transport
                // boundary, so `Mentor::skip` stays unconditional.
                let Some(answer) = play_input(
                    &entry,
                    "\n🧭 Mentor: Skip this challenge? (y/N): ",
                    deps.input_timeout,
                )
                .await
                else {
                    break;
                };
                if answer.trim().eq_ignore_ascii_case("y") {
                    let advancement = mentor.skip().await;
                    if !deliver_advancement(&entry, &mut mentor, advancement, deps.input_timeout)
                        .await
                    {
                        break;
                    }
                } else {
                    emit_mentor(&entry, "Sticking with it — good call.").await;
                }
            }
            "feedback" => {
                match mentor.save_learning_feedback().await {
                    Ok(message) => {
                        emit_mentor(&entry, &message).await;
                        if let Err(e) = mentor.save_progress() {
                            warn!(error = %e, "failed to save progress after feedback");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to record learning feedback");
                        emit_mentor(&entry, "Sorry, I couldn't record that feedback just now.")
                            .await;
                    }
                }
            }
            _ => {
                if !run_turn(&entry, &mut mentor, &line, deps.input_timeout).await {
                    break;
                }
            }
        }

        if entry.is_closed() {
            break;
        }
    }

    entry.session_ended().await;
    registry.teardown(entry.id()).await;
    info!("session worker finished");
}

/// One full challenge turn: respond, evaluate, advance on success.
/// Returns false when the session should end (quit at a chapter boundary).
async fn run_turn(
    entry: &Arc<SessionEntry>,
    mentor: &mut Mentor,
    line: &str,
    timeout: Duration,
) -> bool {
    let reply = match mentor.respond(line).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "responder call failed");
            emit_mentor(entry, APOLOGY).await;
            return true;
        }
    };
    entry.emit(&format!("\n🎓 Professor: {reply}")).await;

    emit_mentor(entry, "🤔  Evaluating interaction... ⏳").await;
    match mentor.evaluate(line, &reply).await {
        Err(e) => {
            warn!(error = %e, "evaluator call failed");
            emit_mentor(entry, APOLOGY).await;
            true
        }
        Ok((success, feedback)) => {
            if !feedback.is_empty() {
                emit_mentor(entry, &feedback).await;
            }
            if success {
                let advancement = mentor.advance_challenge().await;
                return deliver_advancement(entry, mentor, advancement, timeout).await;
            }
            true
        }
    }
}

/// Shows an advancement to the player, pausing at chapter boundaries.
/// Returns false when the session should end.
async fn deliver_advancement(
    entry: &Arc<SessionEntry>,
    mentor: &mut Mentor,
    advancement: Advancement,
    timeout: Duration,
) -> bool {
    if advancement.crossed_chapter && !advancement.finished {
        // Chapter transitions are a deliberate pause point, not an
        // automatic cut.
        let Some(answer) = play_input(
            entry,
            "\n🧭 Mentor: Ready for the next chapter? (Y/quit): ",
            timeout,
        )
        .await
        else {
            return false;
        };
        if matches!(answer.trim().to_lowercase().as_str(), "q" | "quit" | "exit") {
            if let Err(e) = mentor.save_progress() {
                warn!(error = %e, "failed to save progress at chapter boundary");
            }
            entry.emit(GOODBYE).await;
            return false;
        }
        entry.clear_panel("main").await;
    }

    emit_mentor(entry, &advancement.text).await;
    if let Err(e) = mentor.save_progress() {
        warn!(error = %e, "failed to save progress");
    }
    true
}

/// Solicits one line under the normal-play timeout policy: a timeout nudges
/// toward `hint`/`help` and re-prompts, a reconnect waits on the ready gate
/// and greets, and only a closed session returns `None`.
async fn play_input(
    entry: &Arc<SessionEntry>,
    prompt: &str,
    timeout: Duration,
) -> Option<String> {
    let mut orphan_timeouts = 0u32;
    loop {
        entry.emit(prompt).await;
        match entry.await_input(timeout).await {
            WaitOutcome::Input(line) => return Some(line),
            WaitOutcome::TimedOut => {
                if entry.has_transport().await {
                    orphan_timeouts = 0;
                    emit_mentor(
                        entry,
                        "Still there? If you're stuck, try 'hint' or 'help' — or just keep experimenting.",
                    )
                    .await;
                } else {
                    // Detached sessions are kept for a bounded period only.
                    orphan_timeouts += 1;
                    if orphan_timeouts >= ORPHAN_TIMEOUT_LIMIT {
                        info!("no transport re-attached; retiring detached session");
                        return None;
                    }
                }
            }
            WaitOutcome::Reattached => {
                orphan_timeouts = 0;
                entry.wait_ready().await;
                emit_mentor(entry, "Welcome back! Picking up right where we left off.").await;
            }
            WaitOutcome::Closed => return None,
        }
    }
}

/// Identity collection. Timeouts here are fatal: returns `None` and the
/// caller ends the session.
async fn collect_identity(
    entry: &Arc<SessionEntry>,
    timeout: Duration,
) -> Option<(String, String)> {
    entry
        .emit("\nBefore we begin, let me get to know you better!")
        .await;

    let name = loop {
        entry.emit("What's your name? ").await;
        match entry.await_input(timeout).await {
            WaitOutcome::Input(name) => {
                let name = name.trim().to_string();
                if name.len() >= 2 {
                    break name;
                }
                entry
                    .emit("Please enter a valid name (at least 2 characters).")
                    .await;
            }
            WaitOutcome::TimedOut => {
                entry
                    .emit("\nNo response received — closing this session.")
                    .await;
                return None;
            }
            WaitOutcome::Reattached => {
                entry.wait_ready().await;
                entry.emit("Welcome back! Let's pick up the introductions.").await;
            }
            WaitOutcome::Closed => return None,
        }
    };

    let email = loop {
        entry.emit("What's your email? ").await;
        match entry.await_input(timeout).await {
            WaitOutcome::Input(email) => {
                let email = email.trim().to_string();
                if email_regex().is_match(&email) {
                    break email;
                }
                entry.emit("Please enter a valid email address.").await;
            }
            WaitOutcome::TimedOut => {
                entry
                    .emit("\nNo response received — closing this session.")
                    .await;
                return None;
            }
            WaitOutcome::Reattached => {
                entry.wait_ready().await;
                entry.emit("Welcome back! Let's pick up the introductions.").await;
            }
            WaitOutcome::Closed => return None,
        }
    };

    Some((name, email))
}

async fn emit_mentor(entry: &Arc<SessionEntry>, text: &str) {
    entry.emit(&format!("\n🧭 Mentor: {text}")).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::test_support::{RecordingTransport, wait_until};
    use anyhow::Result;
    use async_trait::async_trait;
    use gauntlet_core::guide::Guide;
    use gauntlet_core::retriever::Snippet;
    use gauntlet_core::scanner::NoopScanner;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct ScriptedResponder;

    #[async_trait]
    impl Responder for ScriptedResponder {
        async fn configure(&self, _system_prompt: &str) {}
        async fn respond(&self, _input: &str, _context: &[Snippet]) -> Result<String> {
            Ok("a scripted professor reply".to_string())
        }
    }

    struct ScriptedModel(&'static str);

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn test_guide() -> Arc<Guide> {
        let raw = r#"{
            "title": "Worker Test Guide",
            "chapters": [
                {
                    "title": "Chapter One",
                    "intro": "Intro one.",
                    "challenges": [
                        {
                            "title": "First",
                            "description": "First challenge.",
                            "system_prompt": "persona one",
                            "success_criteria": { "requirements": ["r1"] },
                            "hints": [{ "text": "first hint" }]
                        },
                        {
                            "title": "Second",
                            "description": "Second challenge.",
                            "system_prompt": "persona two",
                            "success_criteria": { "requirements": ["r2"] }
                        }
                    ]
                }
            ]
        }"#;
        Arc::new(Guide::from_json_str(raw).unwrap())
    }

    struct TestEnv {
        registry: Arc<SessionRegistry>,
        deps: Arc<SessionDeps>,
        _progress_dir: TempDir,
        _learnings_dir: TempDir,
    }

    fn env_with_verdict(verdict: &'static str) -> TestEnv {
        let progress_dir = tempfile::tempdir().unwrap();
        let learnings_dir = tempfile::tempdir().unwrap();
        let deps = Arc::new(SessionDeps {
            guide: test_guide(),
            responder_factory: Arc::new(|| Arc::new(ScriptedResponder)),
            evaluator: Arc::new(ScriptedModel(verdict)),
            explainer: Arc::new(ScriptedModel("")),
            scanner: Arc::new(NoopScanner),
            progress: ProgressStore::open(progress_dir.path()).unwrap(),
            feedback: FeedbackLog::open(learnings_dir.path()).unwrap(),
            input_timeout: Duration::from_secs(2),
            start_chapter: 0,
            start_challenge: 0,
        });
        TestEnv {
            registry: Arc::new(SessionRegistry::new()),
            deps,
            _progress_dir: progress_dir,
            _learnings_dir: learnings_dir,
        }
    }

    async fn start_session(env: &TestEnv, id: &str, transport: Arc<RecordingTransport>) {
        let registry = env.registry.clone();
        let deps = env.deps.clone();
        env.registry
            .register(id, transport, move |entry| {
                run_session(entry, registry, deps)
            })
            .await;
    }

    async fn complete_identity(env: &TestEnv, id: &str, transport: &RecordingTransport) {
        assert!(
            wait_until(|| async {
                transport.joined_output().await.contains("What's your name?")
            })
            .await
        );
        env.registry.submit_input(id, "Alice".to_string()).await;
        assert!(
            wait_until(|| async {
                transport.joined_output().await.contains("What's your email?")
            })
            .await
        );
        env.registry
            .submit_input(id, "alice@example.com".to_string())
            .await;
        assert!(
            wait_until(|| async {
                transport.joined_output().await.contains("Current Challenge: First")
            })
            .await
        );
    }

    #[tokio::test]
    async fn full_turn_advances_on_success_and_exit_tears_down() {
        let env = env_with_verdict("SUCCESS: criteria met");
        let transport = RecordingTransport::new();
        start_session(&env, "w1", transport.clone()).await;
        complete_identity(&env, "w1", &transport).await;

        env.registry
            .submit_input("w1", "try this attack".to_string())
            .await;
        assert!(
            wait_until(|| async {
                let out = transport.joined_output().await;
                out.contains("a scripted professor reply")
                    && out.contains("criteria met")
                    && out.contains("Second")
            })
            .await,
            "turn should respond, evaluate, and advance"
        );

        env.registry.submit_input("w1", "exit".to_string()).await;
        assert!(wait_until(|| async { transport.has_ended() }).await);
        assert!(
            wait_until(|| async { !env.registry.contains("w1").await }).await,
            "teardown should remove the registry entry"
        );
    }

    #[tokio::test]
    async fn failed_turn_does_not_advance() {
        let env = env_with_verdict("CONTINUE: not yet");
        let transport = RecordingTransport::new();
        start_session(&env, "w2", transport.clone()).await;
        complete_identity(&env, "w2", &transport).await;

        env.registry.submit_input("w2", "weak attempt".to_string()).await;
        assert!(
            wait_until(|| async { transport.joined_output().await.contains("not yet") }).await
        );
        assert!(!transport.joined_output().await.contains("Second"));
    }

    #[tokio::test]
    async fn hint_command_reveals_hints() {
        let env = env_with_verdict("CONTINUE: no");
        let transport = RecordingTransport::new();
        start_session(&env, "w3", transport.clone()).await;
        complete_identity(&env, "w3", &transport).await;

        env.registry.submit_input("w3", "hint".to_string()).await;
        assert!(
            wait_until(|| async { transport.joined_output().await.contains("first hint") }).await
        );
    }

    #[tokio::test]
    async fn reconnect_keeps_the_cursor_and_greets_the_new_transport() {
        let env = env_with_verdict("CONTINUE: no");
        let first = RecordingTransport::new();
        start_session(&env, "w4", first.clone()).await;
        complete_identity(&env, "w4", &first).await;

        // One failed turn so the session is mid-challenge with progress shown.
        env.registry.submit_input("w4", "attempt".to_string()).await;
        assert!(
            wait_until(|| async { !first.progress_updates.lock().await.is_empty() }).await
        );
        let cursor_before = *first.progress_updates.lock().await.last().unwrap();

        env.registry.detach("w4").await;
        let second = RecordingTransport::new();
        start_session(&env, "w4", second.clone()).await;

        assert!(
            wait_until(|| async {
                second.joined_output().await.contains("Welcome back! Picking up")
            })
            .await,
            "resume greeting must reach the new transport"
        );
        assert!(!first.joined_output().await.contains("Picking up"));

        // The cursor survived the reconnect.
        env.registry.submit_input("w4", "another attempt".to_string()).await;
        assert!(
            wait_until(|| async { !second.progress_updates.lock().await.is_empty() }).await
        );
        let cursor_after = *second.progress_updates.lock().await.first().unwrap();
        assert_eq!(cursor_before, cursor_after);
    }

    #[tokio::test]
    async fn identity_timeout_ends_the_session() {
        let progress_dir = tempfile::tempdir().unwrap();
        let learnings_dir = tempfile::tempdir().unwrap();
        let deps = Arc::new(SessionDeps {
            guide: test_guide(),
            responder_factory: Arc::new(|| Arc::new(ScriptedResponder)),
            evaluator: Arc::new(ScriptedModel("CONTINUE: no")),
            explainer: Arc::new(ScriptedModel("")),
            scanner: Arc::new(NoopScanner),
            progress: ProgressStore::open(progress_dir.path()).unwrap(),
            feedback: FeedbackLog::open(learnings_dir.path()).unwrap(),
            input_timeout: Duration::from_millis(100),
            start_chapter: 0,
            start_challenge: 0,
        });
        let registry = Arc::new(SessionRegistry::new());
        let transport = RecordingTransport::new();
        {
            let registry = registry.clone();
            let deps = deps.clone();
            registry
                .clone()
                .register("w5", transport.clone(), move |entry| {
                    run_session(entry, registry, deps)
                })
                .await;
        }

        assert!(
            wait_until(|| async { transport.has_ended() }).await,
            "identity timeout must end the session and notify the transport"
        );
        assert!(wait_until(|| async { !registry.contains("w5").await }).await);
    }

    #[tokio::test]
    async fn skip_requires_confirmation() {
        let env = env_with_verdict("CONTINUE: no");
        let transport = RecordingTransport::new();
        start_session(&env, "w6", transport.clone()).await;
        complete_identity(&env, "w6", &transport).await;

        env.registry.submit_input("w6", "skip".to_string()).await;
        assert!(
            wait_until(|| async {
                transport.joined_output().await.contains("Skip this challenge?")
            })
            .await
        );
        env.registry.submit_input("w6", "n".to_string()).await;
        assert!(
            wait_until(|| async {
                transport.joined_output().await.contains("Sticking with it")
            })
            .await
        );
        assert!(!transport.joined_output().await.contains("Second"));

        env.registry.submit_input("w6", "skip".to_string()).await;
        assert!(
            wait_until(|| async {
                transport
                    .joined_output()
                    .await
                    .matches("Skip this challenge?")
                    .count()
                    == 2
            })
            .await
        );
        env.registry.submit_input("w6", "y".to_string()).await;
        assert!(
            wait_until(|| async { transport.joined_output().await.contains("Second") }).await,
            "confirmed skip advances to the next challenge"
        );
    }
}
