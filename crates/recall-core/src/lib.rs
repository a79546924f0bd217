//! ============================================================================
//! RECALL-CORE: Story memory for loved ones
//! ============================================================================
//! This crate holds all backend logic for Story Recall:
//! - Profiles and their recorded life stories, persisted in redb
//! - Embeddings via an OpenAI-compatible API, with a deterministic fallback
//! - Cosine-similarity retrieval scoped to one profile
//! - First-person replies synthesized from the retrieved stories
//! - Bulk loading from CSV / Markdown story sources
//! ============================================================================

pub mod config;
pub mod db;
pub mod ingest;
pub mod recall;
pub mod types;

// Re-export main types for convenience
pub use config::RecallConfig;
pub use db::{InMemoryStore, RecallDb, StoryStore};
pub use recall::{Embedder, RecallManager, Synthesizer};
pub use types::*;
