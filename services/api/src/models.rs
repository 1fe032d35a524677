//! API Models
//!
//! Wire shapes for the small REST surface: the guide outline that backs the
//! progress sidebar, and the shared error envelope. Annotated with `utoipa`
//! for OpenAPI documentation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use gauntlet_core::guide::Guide;

/// Outline of the loaded guide: titles only, no prompts or criteria. The
/// full guide content would hand players the answers.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct GuideOutline {
    #[schema(example = "AI Security Challenge")]
    pub title: String,
    pub chapters: Vec<ChapterOutline>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ChapterOutline {
    pub title: String,
    pub challenges: Vec<String>,
}

impl GuideOutline {
    pub fn from_guide(guide: &Guide) -> Self {
        Self {
            title: guide.title.clone(),
            chapters: guide
                .chapters
                .iter()
                .map(|chapter| ChapterOutline {
                    title: chapter.title.clone(),
                    challenges: chapter
                        .challenges
                        .iter()
                        .map(|challenge| challenge.title.clone())
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}
