//! Session progression: the mentor that walks a player through the guide.
//!
//! One `Mentor` exists per session and is owned exclusively by that session's
//! worker, so none of its state needs synchronization. It tracks the
//! chapter/challenge cursor, runs the evaluator over each turn, and decides
//! when the player advances. All collaborator calls go through trait seams so
//! the progression logic is testable without any live service.

use std::sync::Arc;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::guide::{Challenge, Guide};
use crate::llm::LanguageModel;
use crate::outcome::EvaluationOutcome;
use crate::progress::{
    FeedbackLog, FeedbackRecord, ProgressRecord, ProgressStore, feedback_timestamp, today,
};
use crate::responder::Responder;
use crate::retriever::{KnowledgeRetriever, Snippet, SnippetStore};
use crate::scanner::SecurityScanner;

/// Completion message shown when a turn arrives in the terminal state.
const ALL_COMPLETE_PROMPT: &str =
    "🎉 Amazing work! You've completed all challenges in all chapters! Type 'exit' to end the session.";

/// Stable completion text for repeated advancement from the terminal state.
const ALL_COMPLETE: &str = "Congratulations! You've completed all challenges!";

/// Self-reported player identity. Unverified by design.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// The most recent evaluated turn, kept for the one-step learning-feedback
/// correction. Overwritten every turn, never historized.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub input: String,
    pub response: String,
    pub feedback: String,
    pub was_success: bool,
}

/// Result of advancing past a completed challenge.
#[derive(Debug, Clone)]
pub struct Advancement {
    /// Framing text for the player: chapter intro when the chapter changed,
    /// challenge framing otherwise, with any reward appended.
    pub text: String,
    /// True when the cursor moved into a new chapter. Interactive callers use
    /// this as a deliberate pause point before showing `text`.
    pub crossed_chapter: bool,
    /// True when the session reached (or already was in) the terminal state.
    pub finished: bool,
}

pub struct Mentor {
    guide: Arc<Guide>,
    responder: Arc<dyn Responder>,
    evaluator: Arc<dyn LanguageModel>,
    explainer: Arc<dyn LanguageModel>,
    scanner: Arc<dyn SecurityScanner>,
    progress: ProgressStore,
    feedback_log: FeedbackLog,
    chapter: usize,
    challenge: usize,
    hint: usize,
    attempts: u32,
    identity: Option<Identity>,
    last_interaction: Option<Interaction>,
    context: Option<Arc<dyn KnowledgeRetriever>>,
    context_text: Option<String>,
}

impl Mentor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guide: Arc<Guide>,
        responder: Arc<dyn Responder>,
        evaluator: Arc<dyn LanguageModel>,
        explainer: Arc<dyn LanguageModel>,
        scanner: Arc<dyn SecurityScanner>,
        progress: ProgressStore,
        feedback_log: FeedbackLog,
    ) -> Self {
        Self {
            guide,
            responder,
            evaluator,
            explainer,
            scanner,
            progress,
            feedback_log,
            chapter: 0,
            challenge: 0,
            hint: 0,
            attempts: 0,
            identity: None,
            last_interaction: None,
            context: None,
            context_text: None,
        }
    }

    pub fn chapter_index(&self) -> usize {
        self.chapter
    }

    pub fn challenge_index(&self) -> usize {
        self.challenge
    }

    pub fn hint_index(&self) -> usize {
        self.hint
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts
    }

    pub fn guide(&self) -> &Arc<Guide> {
        &self.guide
    }

    /// True once every chapter has been completed.
    pub fn is_complete(&self) -> bool {
        self.chapter >= self.guide.chapters.len()
    }

    /// The challenge the cursor points at, or `None` in the terminal state.
    pub fn current_challenge(&self) -> Option<&Challenge> {
        self.guide.challenge(self.chapter, self.challenge)
    }

    /// Moves the cursor to a specific challenge, clamping out-of-range
    /// coordinates to the nearest valid start, and applies that challenge's
    /// responder/context setup.
    pub async fn restore_cursor(&mut self, chapter: usize, challenge: usize) {
        let (chapter, challenge) = if chapter >= self.guide.chapters.len() {
            warn!(chapter, "starting chapter out of range; starting from the beginning");
            (0, 0)
        } else if challenge >= self.guide.chapters[chapter].challenges.len() {
            warn!(chapter, challenge, "starting challenge out of range; starting chapter over");
            (chapter, 0)
        } else {
            (chapter, challenge)
        };
        self.chapter = chapter;
        self.challenge = challenge;
        self.hint = 0;
        self.apply_challenge_setup().await;
    }

    /// Records the player's identity and restores any saved progress.
    /// Returns a welcome-back line when progress was found.
    pub async fn set_identity(&mut self, name: &str, email: &str) -> Option<String> {
        self.identity = Some(Identity {
            name: name.to_string(),
            email: email.to_string(),
        });
        let record = match self.progress.load(email) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "failed to load saved progress");
                None
            }
        }?;
        self.restore_cursor(record.chapter, record.challenge).await;
        self.hint = record.hint;
        self.attempts = record.attempts;
        info!(
            chapter = record.chapter,
            challenge = record.challenge,
            "restored saved progress"
        );
        Some(format!(
            "Welcome back {name}! I've restored your previous progress."
        ))
    }

    /// Daily scanner session key: a short stable hash of email + date, or a
    /// fixed key for anonymous sessions.
    pub fn session_key(&self) -> String {
        let Some(identity) = &self.identity else {
            return "default-session".to_string();
        };
        let seed = format!("{}-{}", identity.email, today());
        let digest = Sha256::digest(seed.as_bytes());
        digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
    }

    /// Framing text for the current position. A session sitting in the
    /// terminal state starts over from the beginning.
    pub async fn introduce_current_state(&mut self) -> String {
        if self.is_complete() {
            self.chapter = 0;
            self.challenge = 0;
            self.hint = 0;
            self.attempts = 0;
            self.apply_challenge_setup().await;
            return format!(
                "Welcome back! Starting fresh with Chapter 1.\n\n{}",
                self.current_intro()
            );
        }
        self.current_intro()
    }

    fn current_intro(&self) -> String {
        let (Some(chapter), Some(challenge)) =
            (self.guide.chapter(self.chapter), self.current_challenge())
        else {
            return ALL_COMPLETE.to_string();
        };
        format!(
            "🚀  Welcome to {}\n\n📚  {}\n\n🎯  Current Challenge: {}\n{}\n\n💡  Let's begin! Ask for a hint if you need help.",
            chapter.title, chapter.intro, challenge.title, challenge.description
        )
    }

    /// Produces the in-character reply for one player message, routing any
    /// supplementary-context snippets into the responder.
    pub async fn respond(&self, input: &str) -> Result<String> {
        let snippets = self.context_snippets(input).await;
        self.responder.respond(input, &snippets).await
    }

    /// Snippets for the current turn; empty when the feature is off or the
    /// retriever fails (retrieval is never fatal).
    pub async fn context_snippets(&self, input: &str) -> Vec<Snippet> {
        let Some(retriever) = &self.context else {
            return Vec::new();
        };
        match retriever.query(input).await {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(error = %e, "context retrieval failed; responding without it");
                Vec::new()
            }
        }
    }

    /// Evaluates one full turn against the current challenge's criteria.
    ///
    /// Returns `(success, feedback)`. The terminal state short-circuits to a
    /// success with a completion message. An `Err` means the evaluator
    /// collaborator itself failed; in that case the turn is not counted as an
    /// attempt and `last_interaction` is untouched.
    pub async fn evaluate(&mut self, input: &str, response: &str) -> Result<(bool, String)> {
        let Some(challenge) = self.current_challenge().cloned() else {
            return Ok((true, ALL_COMPLETE_PROMPT.to_string()));
        };

        let warning = self.scan_turn(input, response, &challenge).await;

        let prompt = evaluation_prompt(input, response, &challenge)?;
        let verdict = self.evaluator.complete(&prompt).await?;
        let outcome = EvaluationOutcome::parse(verdict.trim());

        let success = outcome.is_success();
        if success {
            self.attempts = 0;
        } else {
            self.attempts += 1;
        }

        let mut feedback = outcome.reason().to_string();
        self.last_interaction = Some(Interaction {
            input: input.to_string(),
            response: response.to_string(),
            feedback: feedback.clone(),
            was_success: success,
        });

        if let Some(warning) = warning {
            feedback = format!("{warning}\n\n{feedback}");
        }
        Ok((success, feedback))
    }

    /// Runs the security scanner over the turn and, when anything scored,
    /// asks the explainer for an educational write-up. Every failure path
    /// here returns `None`: a scanner outage must never block evaluation.
    async fn scan_turn(
        &self,
        input: &str,
        response: &str,
        challenge: &Challenge,
    ) -> Option<String> {
        let context = self
            .context_text
            .clone()
            .unwrap_or_else(|| challenge.system_prompt.clone());

        let report = match self
            .scanner
            .detect(input, response, &self.session_key(), &context)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "security scan failed; skipping this turn");
                return None;
            }
        };

        if report.combined_score() <= 0.0 {
            return None;
        }
        let flagged = report.flagged_checks();
        if flagged.is_empty() {
            return None;
        }

        let listing = flagged
            .iter()
            .map(|(check, score)| format!("- {check} (score: {score})"))
            .collect::<Vec<_>>()
            .join("\n");
        let lesson_prompt = format!(
            "As an AI security educator, provide a brief security lesson for each detected \
             issue below:\n\n{listing}\n\nFor each detection explain, in a single fun and \
             educational paragraph, why it is a security concern and how it could be \
             exploited. Keep each lesson concise."
        );

        match self.explainer.complete(&lesson_prompt).await {
            Ok(lessons) if !lessons.trim().is_empty() => Some(format!(
                "🚨  Security Alert 🚨\n{listing}\n\n🎓 Security Lessons:\n{lessons}"
            )),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "security lesson generation failed");
                None
            }
        }
    }

    /// Moves past the current challenge. Chapter indices only ever grow here;
    /// the sole path that lowers the cursor is [`Mentor::save_learning_feedback`].
    pub async fn advance_challenge(&mut self) -> Advancement {
        if self.is_complete() {
            return Advancement {
                text: ALL_COMPLETE.to_string(),
                crossed_chapter: false,
                finished: true,
            };
        }

        let reward = self
            .current_challenge()
            .and_then(Challenge::reward_text)
            .unwrap_or_default();

        let prev_chapter = self.chapter;
        self.challenge += 1;
        self.hint = 0;
        if self.challenge >= self.guide.chapters[self.chapter].challenges.len() {
            self.challenge = 0;
            self.chapter += 1;
        }

        if self.is_complete() {
            return Advancement {
                text: format!("{ALL_COMPLETE_PROMPT}{reward}"),
                crossed_chapter: true,
                finished: true,
            };
        }

        self.apply_challenge_setup().await;
        let crossed_chapter = self.chapter != prev_chapter;
        let text = if crossed_chapter {
            format!("{}{reward}", self.current_intro())
        } else {
            match self.current_challenge() {
                Some(challenge) => format!(
                    "Great work! Moving on to the next challenge:{reward}\n\n{}\n{}",
                    challenge.title, challenge.description
                ),
                None => format!("{ALL_COMPLETE}{reward}"),
            }
        };
        Advancement {
            text,
            crossed_chapter,
            finished: false,
        }
    }

    /// Player-requested forced advancement; confirmation happens at the
    /// transport boundary before this is called.
    pub async fn skip(&mut self) -> Advancement {
        info!(
            chapter = self.chapter,
            challenge = self.challenge,
            "player skipped the current challenge"
        );
        self.advance_challenge().await
    }

    /// Reveals the next hint. Exhausted hints repeat the last one rather than
    /// going silent; `None` only when the challenge defines no hints at all.
    pub fn next_hint(&mut self) -> Option<String> {
        let hints: Vec<String> = self
            .current_challenge()?
            .hints
            .iter()
            .map(|h| h.text.clone())
            .collect();
        if hints.is_empty() {
            return None;
        }
        if self.hint >= hints.len() {
            let last = &hints[hints.len() - 1];
            return Some(format!(
                "Sorry, no more hints are available for this challenge! The previous hint was: {last}  Please try again."
            ));
        }
        let text = hints[self.hint].clone();
        self.hint += 1;
        Some(text)
    }

    /// Handles a dispute of the previous verdict: a disputed success rewinds
    /// one challenge, a disputed failure advances. Every call appends an
    /// immutable audit record first.
    pub async fn save_learning_feedback(&mut self) -> Result<String> {
        let Some(interaction) = self.last_interaction.clone() else {
            return Ok("No recent interaction to learn from.".to_string());
        };

        let (challenge_title, system_prompt) = match self.current_challenge() {
            Some(challenge) => (challenge.title.clone(), challenge.system_prompt.clone()),
            None => ("Unknown".to_string(), String::new()),
        };
        let record = FeedbackRecord {
            timestamp: feedback_timestamp(),
            chapter: self.chapter,
            challenge: self.challenge,
            challenge_title,
            system_prompt,
            user_input: interaction.input.clone(),
            bot_response: interaction.response.clone(),
            evaluation_feedback: interaction.feedback.clone(),
            was_success: interaction.was_success,
            user_email: self
                .identity
                .as_ref()
                .map(|i| i.email.clone())
                .unwrap_or_default(),
        };
        self.feedback_log.append(&record)?;

        if interaction.was_success {
            // Disputed success: pure cursor rewind. Already at the very first
            // challenge means there is nothing to rewind to; hold position.
            if self.challenge > 0 {
                let target = self.challenge - 1;
                self.restore_cursor(self.chapter, target).await;
            } else if self.chapter > 0 {
                let prev = self.chapter - 1;
                let last = self.guide.chapters[prev].challenges.len() - 1;
                self.restore_cursor(prev, last).await;
            }
            Ok(
                "Thank you for the feedback! I've moved you back to retry the previous challenge."
                    .to_string(),
            )
        } else {
            let advancement = self.advance_challenge().await;
            Ok(format!(
                "Thank you for the feedback! Moving you to the next challenge.\n\n{}",
                advancement.text
            ))
        }
    }

    /// Persists the current position, or deletes the record once the guide is
    /// finished. Anonymous sessions are never persisted.
    pub fn save_progress(&self) -> Result<()> {
        let Some(identity) = &self.identity else {
            return Ok(());
        };
        if self.is_complete() {
            return self.progress.delete(&identity.email);
        }
        self.progress.save(&ProgressRecord {
            email: identity.email.clone(),
            name: identity.name.clone(),
            chapter: self.chapter,
            challenge: self.challenge,
            hint: self.hint,
            attempts: self.attempts,
            last_updated: today(),
        })
    }

    /// Reconfigures the responder and supplementary context for the challenge
    /// the cursor points at. A context load failure disables the feature for
    /// this challenge instead of failing advancement.
    async fn apply_challenge_setup(&mut self) {
        let setup = self
            .current_challenge()
            .map(|c| (c.system_prompt.clone(), c.context.clone()));
        let Some((system_prompt, context_source)) = setup else {
            self.context = None;
            self.context_text = None;
            return;
        };

        self.responder.configure(&system_prompt).await;

        match context_source.as_deref() {
            Some(source) if !source.is_empty() => match SnippetStore::load(source) {
                Ok(store) => {
                    self.context_text = Some(store.source_text().to_string());
                    self.context = Some(Arc::new(store));
                }
                Err(e) => {
                    warn!(error = %e, "supplementary context unavailable for this challenge");
                    self.context = None;
                    self.context_text = None;
                }
            },
            _ => {
                self.context = None;
                self.context_text = None;
            }
        }
    }
}

/// Builds the evaluator prompt: the raw turn, the ordered success criteria,
/// and the short-circuiting chain instructions.
fn evaluation_prompt(input: &str, response: &str, challenge: &Challenge) -> Result<String> {
    let criteria = serde_json::to_string_pretty(&challenge.success_criteria.requirements)?;
    Ok(format!(
        "### Instruction: AI Response Evaluator\n\
         You are an AI response evaluator. Your ONLY job is to analyze whether the AI \
         Assistant followed its instructions. Do NOT ask for additional input; answer \
         immediately based on the given interaction.\n\n\
         ### Interaction\n\
         User Prompt: {input}\n\
         AI Assistant Response: {response}\n\n\
         ### Success Criteria In Order Of Priority\n\
         {criteria}\n\n\
         The criteria are hard stop conditions checked as an ordered chain: check the \
         first criterion and, if it is not met, STOP and FAIL without reading further \
         criteria. Only when a criterion passes may you check the next one. Do not let \
         general question answering override a failed condition.\n\n\
         ### Final Decision\n\
         - If ALL success criteria are satisfied, start your response with: SUCCESS: <reason>\n\
         - If any criterion failed, start your response with: CONTINUE: <reason>\n\
         - If you are unsure, start your response with: HINT: <guidance>\n"
    ))
}
