//! ============================================================================
//! Core Types for Story Recall
//! ============================================================================
//! Profiles, stories, ranked results and the error taxonomy surfaced to
//! callers. These types are serialized to JSON by the CLI.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Stable identifier of a profile (assigned by the store, increasing)
pub type ProfileId = u64;

/// Stable identifier of a story (assigned by the store, increasing)
pub type StoryId = u64;

/// A narrator identity that owns a set of stories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    /// Free-text role relative to the asker, e.g. "grandfather"
    pub relation: String,
    pub avatar_url: Option<String>,
    /// Unix timestamp
    pub created_at: i64,
}

/// Input for creating a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfile {
    pub name: String,
    pub relation: String,
    pub avatar_url: Option<String>,
}

impl NewProfile {
    pub fn new(name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: relation.into(),
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

/// A single narrative record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub profile_id: ProfileId,
    pub transcript: String,
    /// File name of an attached audio recording
    pub audio_ref: Option<String>,
    /// Embedding of the transcript (never sent to the frontend)
    #[serde(skip)]
    pub embedding: Vec<f32>,
    /// Year the story took place, used for display ordering only
    pub event_year: Option<i32>,
    /// Unix timestamp
    pub created_at: i64,
}

/// A fully prepared story row, ready for an atomic insert.
/// The store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct StoryDraft {
    pub profile_id: ProfileId,
    pub transcript: String,
    pub embedding: Vec<f32>,
    pub event_year: Option<i32>,
    pub audio_ref: Option<String>,
}

/// Request to add a story. At least one of `transcript` / `audio_ref`
/// must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewStory {
    pub profile_id: ProfileId,
    pub transcript: Option<String>,
    pub event_year: Option<i32>,
    pub audio_ref: Option<String>,
}

impl NewStory {
    pub fn text(profile_id: ProfileId, transcript: impl Into<String>) -> Self {
        Self {
            profile_id,
            transcript: Some(transcript.into()),
            ..Default::default()
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.event_year = Some(year);
        self
    }

    pub fn with_audio(mut self, audio_ref: impl Into<String>) -> Self {
        self.audio_ref = Some(audio_ref.into());
        self
    }
}

/// A story paired with its similarity to a query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredStory {
    #[serde(flatten)]
    pub story: Story,
    /// Cosine similarity, roughly in [-1, 1]
    pub similarity_score: f32,
}

/// Result of asking a profile a question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    /// Conversational reply
    pub message: String,
    /// Ranked supporting stories, best first
    pub stories: Vec<ScoredStory>,
    pub profile: Profile,
}

/// Row counts for the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub profiles: usize,
    pub stories: usize,
}

/// Errors surfaced by the recall pipeline and its store
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error("Profile not found: {0}")]
    ProfileNotFound(ProfileId),

    #[error("Story transcript is empty")]
    EmptyTranscript,

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding has a non-finite component at index {index}")]
    NonFiniteEmbedding { index: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl RecallError {
    /// Whether the error rejects a single record instead of signalling a
    /// missing entity or broken infrastructure.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            RecallError::EmptyTranscript
                | RecallError::DimensionMismatch { .. }
                | RecallError::NonFiniteEmbedding { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RecallError>;
