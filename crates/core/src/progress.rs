//! Player progress persistence and the learning-feedback audit log.
//!
//! One progress record exists per player, keyed by a stable hash of their
//! email so the on-disk name carries no PII. The record is rewritten after
//! every successful turn and explicit skip, and deleted once the player
//! finishes the whole guide so their next visit starts fresh.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A player's saved position in the guide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub email: String,
    pub name: String,
    pub chapter: usize,
    pub challenge: usize,
    pub hint: usize,
    pub attempts: u32,
    pub last_updated: NaiveDate,
}

/// Stable hex key for an email address.
pub fn email_key(email: &str) -> String {
    let digest = Sha256::digest(email.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Directory-backed store of JSON progress records.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    dir: PathBuf,
}

impl ProgressStore {
    /// Opens (creating if needed) a progress directory.
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, email: &str) -> PathBuf {
        self.dir.join(format!("{}.json", email_key(email)))
    }

    pub fn save(&self, record: &ProgressRecord) -> Result<()> {
        let path = self.record_path(&record.email);
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write progress record {}", path.display()))?;
        Ok(())
    }

    pub fn load(&self, email: &str) -> Result<Option<ProgressRecord>> {
        let path = self.record_path(email);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read progress record {}", path.display()))?;
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt progress record {}", path.display()))?;
        Ok(Some(record))
    }

    /// Removes a player's record. Idempotent: a missing record is fine.
    pub fn delete(&self, email: &str) -> Result<()> {
        let path = self.record_path(email);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to delete progress record {}", path.display()))
            }
        }
    }
}

/// One immutable learning-feedback record: the full disputed turn plus where
/// the player was when they disputed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub timestamp: String,
    pub chapter: usize,
    pub challenge: usize,
    pub challenge_title: String,
    pub system_prompt: String,
    pub user_input: String,
    pub bot_response: String,
    pub evaluation_feedback: String,
    pub was_success: bool,
    pub user_email: String,
}

/// Append-only log of learning-feedback records, one JSON file per record.
#[derive(Debug, Clone)]
pub struct FeedbackLog {
    dir: PathBuf,
}

impl FeedbackLog {
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Writes the record under a timestamped file name and returns its path.
    pub fn append(&self, record: &FeedbackRecord) -> Result<PathBuf> {
        let email = if record.user_email.is_empty() {
            "anonymous"
        } else {
            record.user_email.as_str()
        };
        let path = self
            .dir
            .join(format!("learning_{}_{}.json", record.timestamp, email));
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to append feedback record {}", path.display()))?;
        Ok(path)
    }
}

/// Timestamp format shared by feedback file names and record bodies.
pub fn feedback_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Today's date for progress records.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
