//! ============================================================================
//! Recall Manager - Orchestrates story storage, retrieval and replies
//! ============================================================================
//! High-level API used by the CLI and ingestion: add stories, ask a profile
//! a question, browse profiles. Every dependency is injected; nothing here
//! holds global state.
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, info};

use super::embeddings::Embedder;
use super::ranker::{RankQuery, DEFAULT_TOP_K};
use super::synthesizer::Synthesizer;
use crate::config::RecallConfig;
use crate::db::StoryStore;
use crate::types::{
    AskResponse, NewProfile, NewStory, Profile, ProfileId, RecallError, Result, StoreStats,
    Story, StoryDraft,
};

/// Recall manager combining store, embedder and synthesizer
pub struct RecallManager {
    store: Arc<dyn StoryStore>,
    embedder: Embedder,
    synthesizer: Synthesizer,
}

impl RecallManager {
    /// Create a manager. The embedder and the store must agree on the
    /// vector dimension.
    pub fn new(store: Arc<dyn StoryStore>, embedder: Embedder, synthesizer: Synthesizer) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(RecallError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimension(),
            });
        }

        Ok(Self {
            store,
            embedder,
            synthesizer,
        })
    }

    /// Build providers from configuration around an opened store
    pub fn from_config(config: &RecallConfig, store: Arc<dyn StoryStore>) -> Result<Self> {
        Self::new(
            store,
            Embedder::from_config(config)?,
            Synthesizer::from_config(config)?,
        )
    }

    /// Ask a profile a question.
    ///
    /// Fails only when the profile does not exist (or the store is broken);
    /// provider outages degrade to the fallback embedding / templated reply.
    pub async fn ask(&self, profile_id: ProfileId, query: &str) -> Result<AskResponse> {
        let profile = self.require_profile(profile_id)?;

        debug!("Answering query for profile {}: {}", profile.id, query);

        let query_vector = self.embedder.embed(query).await?;
        let stories = self
            .store
            .top_k(&RankQuery::for_profile(profile.id, DEFAULT_TOP_K), &query_vector)?;

        let message = self.synthesizer.synthesize(query, &stories, &profile).await;

        info!(
            "Answered query for profile {} with {} stories",
            profile.id,
            stories.len()
        );

        Ok(AskResponse {
            message,
            stories,
            profile,
        })
    }

    /// Store a new story with an embedding computed from its transcript
    pub async fn add_story(&self, story: NewStory) -> Result<Story> {
        let transcript = resolve_transcript(&story)?;

        // No provider call for a profile that does not exist
        self.require_profile(story.profile_id)?;

        let embedding = self.embedder.embed(&transcript).await?;
        let stored = self.store.insert_story(StoryDraft {
            profile_id: story.profile_id,
            transcript,
            embedding,
            event_year: story.event_year,
            audio_ref: story.audio_ref,
        })?;

        info!(
            "Stored story {} for profile {} (year: {:?})",
            stored.id, stored.profile_id, stored.event_year
        );
        Ok(stored)
    }

    pub fn create_profile(&self, profile: NewProfile) -> Result<Profile> {
        let created = self.store.create_profile(profile)?;
        info!("Created profile {}: {} ({})", created.id, created.name, created.relation);
        Ok(created)
    }

    pub fn get_profile(&self, profile_id: ProfileId) -> Result<Profile> {
        self.require_profile(profile_id)
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.store.list_profiles()
    }

    /// A profile's stories for display: by event year, undated last
    pub fn profile_stories(&self, profile_id: ProfileId) -> Result<Vec<Story>> {
        self.require_profile(profile_id)?;
        let mut stories = self.store.list_stories(profile_id)?;
        // Stable sort keeps insertion order within a year
        stories.sort_by_key(|s| (s.event_year.is_none(), s.event_year));
        Ok(stories)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    /// Get reference to the store (for ingestion)
    pub fn store(&self) -> &Arc<dyn StoryStore> {
        &self.store
    }

    fn require_profile(&self, profile_id: ProfileId) -> Result<Profile> {
        self.store
            .get_profile(profile_id)?
            .ok_or(RecallError::ProfileNotFound(profile_id))
    }
}

/// Transcript to embed: the given text, or a placeholder naming the audio
fn resolve_transcript(story: &NewStory) -> Result<String> {
    if let Some(text) = story.transcript.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(text.to_string());
    }

    match story.audio_ref.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        Some(audio) => Ok(format!("Audio file: {}", audio)),
        None => Err(RecallError::EmptyTranscript),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::recall::embeddings::fallback_embedding;
    use crate::recall::provider::{EmbeddingProvider, ProviderUnavailable};
    use crate::recall::synthesizer::fallback_reply;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 32;

    /// Counts calls, then fails like an unreachable provider
    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderUnavailable::new(
                crate::recall::provider::ProviderFailure::Transport,
                "unreachable",
            ))
        }
    }

    /// Returns a vector that overflows f32 for texts mentioning "overflow"
    struct OverflowProvider;

    #[async_trait]
    impl EmbeddingProvider for OverflowProvider {
        fn name(&self) -> &str {
            "overflow"
        }

        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderUnavailable> {
            let raw = if text.contains("overflow") {
                "[1e39, 1.0, 1.0, 1.0]"
            } else {
                "[1.0, 1.0, 1.0, 1.0]"
            };
            serde_json::from_str(raw).map_err(|e| ProviderUnavailable::malformed(e.to_string()))
        }
    }

    fn offline_manager() -> (RecallManager, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new(DIM));
        let manager =
            RecallManager::new(store.clone(), Embedder::offline(DIM), Synthesizer::offline()).unwrap();
        (manager, store)
    }

    #[test]
    fn test_dimension_disagreement_rejected() {
        let store = Arc::new(InMemoryStore::new(DIM));
        let result = RecallManager::new(store, Embedder::offline(DIM + 1), Synthesizer::offline());
        assert!(matches!(result, Err(RecallError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_ask_unknown_profile() {
        let store = Arc::new(InMemoryStore::new(DIM));
        let provider = Arc::new(CountingProvider::default());
        let manager = RecallManager::new(
            store.clone(),
            Embedder::new(Some(provider.clone()), DIM),
            Synthesizer::offline(),
        )
        .unwrap();

        let err = manager.ask(404, "hello?").await.unwrap_err();
        assert!(matches!(err, RecallError::ProfileNotFound(404)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.count_profiles().unwrap(), 0);
        assert_eq!(store.count_stories().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ask_empty_profile_gets_generic_reply() {
        let (manager, _) = offline_manager();
        let profile = manager.create_profile(NewProfile::new("Nana", "grandmother")).unwrap();

        let response = manager.ask(profile.id, "What was school like?").await.unwrap();
        assert!(response.stories.is_empty());
        assert_eq!(response.message, fallback_reply(0, &profile));
        assert_eq!(response.profile, profile);
    }

    #[tokio::test]
    async fn test_grandpa_scenario_with_provider_down() {
        let store = Arc::new(InMemoryStore::new(DIM));
        let manager = RecallManager::new(
            store,
            Embedder::new(Some(Arc::new(CountingProvider::default())), DIM),
            Synthesizer::offline(),
        )
        .unwrap();

        let grandpa = manager
            .create_profile(NewProfile::new("Grandpa", "grandfather"))
            .unwrap();
        manager
            .add_story(NewStory::text(grandpa.id, "I started the company in a garage in 1976").with_year(1976))
            .await
            .unwrap();
        manager
            .add_story(NewStory::text(grandpa.id, "I was diagnosed with cancer in 2003").with_year(2003))
            .await
            .unwrap();

        let first = manager.ask(grandpa.id, "Tell me about your illness").await.unwrap();
        let second = manager.ask(grandpa.id, "Tell me about your illness").await.unwrap();

        assert_eq!(first.stories.len(), 2);
        assert!(first.message.contains("Grandpa"));
        assert!(first.message.contains('2'));

        let order = |r: &AskResponse| r.stories.iter().map(|s| s.story.id).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
        assert!(first.stories[0].similarity_score >= first.stories[1].similarity_score);
    }

    #[tokio::test]
    async fn test_overflowing_provider_vectors_never_outrank_real_matches() {
        let store = Arc::new(InMemoryStore::new(4));
        let manager = RecallManager::new(
            store.clone(),
            Embedder::new(Some(Arc::new(OverflowProvider)), 4),
            Synthesizer::offline(),
        )
        .unwrap();
        let p = manager.create_profile(NewProfile::new("Grandpa", "grandfather")).unwrap();

        for i in 0..30 {
            let text = if i % 3 == 0 {
                format!("overflow story {}", i)
            } else {
                format!("story {}", i)
            };
            manager.add_story(NewStory::text(p.id, text)).await.unwrap();
        }

        // Overflowing vectors were replaced by the fallback before storage
        assert!(store
            .list_stories(p.id)
            .unwrap()
            .iter()
            .all(|s| s.embedding.iter().all(|x| x.is_finite())));

        let response = manager.ask(p.id, "what happened?").await.unwrap();
        assert_eq!(response.stories.len(), DEFAULT_TOP_K);
        for scored in &response.stories {
            assert!((scored.similarity_score - 1.0).abs() < 1e-6);
            assert!(!scored.story.transcript.contains("overflow"));
        }
    }

    #[tokio::test]
    async fn test_own_transcript_ranks_first() {
        let (manager, store) = offline_manager();
        let p = manager.create_profile(NewProfile::new("Mom", "mother")).unwrap();
        let texts = [
            "We moved to Ohio when I was nine",
            "My first job was at a bakery",
            "I met your father at a dance",
            "The winter of 1978 buried the car",
        ];
        for text in texts {
            manager.add_story(NewStory::text(p.id, text)).await.unwrap();
        }

        for text in texts {
            let vector = fallback_embedding(text, DIM);
            let ranked = store.top_k(&RankQuery::for_profile(p.id, 5), &vector).unwrap();
            assert_eq!(ranked[0].story.transcript, text);
            assert!((ranked[0].similarity_score - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_add_story_validation() {
        let (manager, store) = offline_manager();
        let p = manager.create_profile(NewProfile::new("Dad", "father")).unwrap();

        let err = manager
            .add_story(NewStory::text(p.id, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, RecallError::EmptyTranscript));

        let err = manager
            .add_story(NewStory::text(p.id + 1, "orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, RecallError::ProfileNotFound(_)));
        assert_eq!(store.count_stories().unwrap(), 0);

        let audio_only = NewStory {
            profile_id: p.id,
            audio_ref: Some("fishing_trip.m4a".to_string()),
            ..Default::default()
        };
        let story = manager.add_story(audio_only).await.unwrap();
        assert_eq!(story.transcript, "Audio file: fishing_trip.m4a");
        assert_eq!(story.embedding.len(), DIM);
    }

    #[tokio::test]
    async fn test_profile_stories_sorted_by_year() {
        let (manager, _) = offline_manager();
        let p = manager.create_profile(NewProfile::new("Grandpa", "grandfather")).unwrap();
        manager.add_story(NewStory::text(p.id, "undated")).await.unwrap();
        manager.add_story(NewStory::text(p.id, "late").with_year(2003)).await.unwrap();
        manager.add_story(NewStory::text(p.id, "early").with_year(1976)).await.unwrap();
        manager.add_story(NewStory::text(p.id, "ancient").with_year(-44)).await.unwrap();

        let transcripts: Vec<String> = manager
            .profile_stories(p.id)
            .unwrap()
            .into_iter()
            .map(|s| s.transcript)
            .collect();
        assert_eq!(transcripts, vec!["ancient", "early", "late", "undated"]);

        assert!(matches!(
            manager.profile_stories(p.id + 10),
            Err(RecallError::ProfileNotFound(_))
        ));
    }
}
