// ============================================================================
// Story Store — persistence boundary for profiles and stories
// ============================================================================
// `StoryStore` is what the recall pipeline consumes. Two implementations:
// `RecallDb` (embedded redb file, default) and `InMemoryStore` (tests,
// ephemeral sessions). Ranking defaults to an exact scan over a profile's
// stories; a store backed by a vector index can override `top_k`.
// ============================================================================

mod memory;
mod recall_db;
pub mod types;

pub use memory::InMemoryStore;
pub use recall_db::{default_db_path, RecallDb};

use crate::recall::ranker::{self, RankQuery};
use crate::types::{
    NewProfile, Profile, ProfileId, RecallError, Result, ScoredStory, StoreStats, Story,
    StoryDraft,
};

/// Persistence boundary consumed by the recall pipeline
pub trait StoryStore: Send + Sync {
    /// Vector dimensionality every stored story must have
    fn dimension(&self) -> usize;

    fn create_profile(&self, profile: NewProfile) -> Result<Profile>;

    fn get_profile(&self, id: ProfileId) -> Result<Option<Profile>>;

    fn list_profiles(&self) -> Result<Vec<Profile>>;

    /// Stories of one profile in insertion order
    fn list_stories(&self, profile_id: ProfileId) -> Result<Vec<Story>>;

    /// Persist a story atomically: the row becomes visible with its
    /// transcript and vector together, or not at all.
    fn insert_story(&self, draft: StoryDraft) -> Result<Story>;

    fn count_profiles(&self) -> Result<usize>;

    fn count_stories(&self) -> Result<usize>;

    /// Remove every profile and story (ingestion reload)
    fn clear(&self) -> Result<()>;

    /// Top-k stories of `query.profile_id` closest to `vector`
    fn top_k(&self, query: &RankQuery, vector: &[f32]) -> Result<Vec<ScoredStory>> {
        if vector.len() != self.dimension() {
            return Err(RecallError::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }
        let candidates = self.list_stories(query.profile_id)?;
        ranker::rank(query, vector, candidates)
    }

    fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            profiles: self.count_profiles()?,
            stories: self.count_stories()?,
        })
    }
}

/// Reject drafts that would break the story invariants
pub(crate) fn validate_draft(draft: &StoryDraft, dimension: usize) -> Result<()> {
    if draft.transcript.trim().is_empty() {
        return Err(RecallError::EmptyTranscript);
    }
    if draft.embedding.len() != dimension {
        return Err(RecallError::DimensionMismatch {
            expected: dimension,
            actual: draft.embedding.len(),
        });
    }
    if let Some(index) = draft.embedding.iter().position(|x| !x.is_finite()) {
        return Err(RecallError::NonFiniteEmbedding { index });
    }
    Ok(())
}

pub(crate) fn storage_err(context: &str, e: impl std::fmt::Display) -> RecallError {
    RecallError::Storage(format!("Failed to {}: {}", context, e))
}
