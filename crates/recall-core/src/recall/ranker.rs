//! ============================================================================
//! Ranker - Profile-scoped nearest-neighbour search over story vectors
//! ============================================================================
//! Exact cosine scan. Stores hand candidates to `rank` through a typed
//! `RankQuery`; a store with a real index can answer the same query itself.
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{ProfileId, RecallError, Result, ScoredStory, Story};

/// Number of stories retrieved for a question
pub const DEFAULT_TOP_K: usize = 5;

/// Similarity metric used for ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// 1 - cosine distance
    Cosine,
}

/// Typed ranking request: metric, profile filter, result limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankQuery {
    pub metric: Metric,
    pub profile_id: ProfileId,
    pub limit: usize,
}

impl RankQuery {
    pub fn for_profile(profile_id: ProfileId, limit: usize) -> Self {
        Self {
            metric: Metric::Cosine,
            profile_id,
            limit,
        }
    }

    /// Score a single candidate vector under this query's metric
    pub fn score(&self, query_vector: &[f32], candidate: &[f32]) -> Result<f32> {
        match self.metric {
            Metric::Cosine => cosine_similarity(query_vector, candidate),
        }
    }
}

/// Cosine similarity of two equal-length vectors.
///
/// Accumulates in f64. Returns 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RecallError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

/// Rank `candidates` against `query_vector`.
///
/// Only stories owned by `query.profile_id` are scored. Output is ordered by
/// descending score; equal scores keep insertion order (lower story id first).
pub fn rank<I>(query: &RankQuery, query_vector: &[f32], candidates: I) -> Result<Vec<ScoredStory>>
where
    I: IntoIterator<Item = Story>,
{
    if query.limit == 0 {
        return Ok(Vec::new());
    }

    let mut scored = Vec::new();
    for story in candidates {
        if story.profile_id != query.profile_id || story.embedding.is_empty() {
            continue;
        }
        let similarity_score = query.score(query_vector, &story.embedding)?;
        scored.push(ScoredStory {
            story,
            similarity_score,
        });
    }

    // NaN scores sink below every real score
    scored.sort_by(|a, b| {
        a.similarity_score
            .is_nan()
            .cmp(&b.similarity_score.is_nan())
            .then_with(|| b.similarity_score.total_cmp(&a.similarity_score))
            .then_with(|| a.story.id.cmp(&b.story.id))
    });
    scored.truncate(query.limit);

    Ok(scored)
}
