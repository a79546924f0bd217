//! ============================================================================
//! Recall Module - Semantic retrieval and first-person replies
//! ============================================================================
//! Embeds questions, ranks a profile's stories by cosine similarity and
//! turns the best matches into a reply in that profile's voice.
//!
//! ## Architecture
//! ```text
//! Question → Embedder → Vector → Ranker (profile filter, k=5)
//!                                      ↓
//!                [Persona] + [Story context] + [Question]
//!                                      ↓
//!                              Completion provider
//!                                      ↓
//!                 { message, ranked stories, profile }
//! ```
//! Both provider calls have deterministic fallbacks, so a question about an
//! existing profile always gets an answer.
//!
//! ## Usage
//! ```rust,ignore
//! use recall_core::{RecallConfig, RecallDb, RecallManager};
//!
//! let config = RecallConfig::from_env()?;
//! let store = Arc::new(RecallDb::open(config.db_path.as_deref(), config.embedding_dim)?);
//! let manager = RecallManager::from_config(&config, store)?;
//!
//! let answer = manager.ask(profile_id, "Tell me about your illness").await?;
//! ```
//! ============================================================================

pub mod embeddings;
pub mod manager;
pub mod provider;
pub mod ranker;
pub mod synthesizer;

// Re-export public types
pub use embeddings::{fallback_embedding, Embedder, OpenAiEmbeddings, EMBEDDING_DIM};
pub use manager::RecallManager;
pub use provider::{
    CompletionProvider, CompletionRequest, EmbeddingProvider, ProviderFailure, ProviderUnavailable,
};
pub use ranker::{cosine_similarity, Metric, RankQuery, DEFAULT_TOP_K};
pub use synthesizer::{OpenAiChat, Synthesizer};
