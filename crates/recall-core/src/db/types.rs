//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Profile, Story};

/// Profile row as stored in the `profiles` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: u64,
    pub name: String,
    pub relation: String,
    pub avatar_url: Option<String>,
    pub created_at: i64,
}

/// Story row as stored in the `stories` table, vector included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryRow {
    pub id: u64,
    pub profile_id: u64,
    pub transcript: String,
    pub audio_ref: Option<String>,
    pub embedding: Vec<f32>,
    pub event_year: Option<i32>,
    pub created_at: i64,
}

impl From<&Profile> for ProfileRow {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            relation: p.relation.clone(),
            avatar_url: p.avatar_url.clone(),
            created_at: p.created_at,
        }
    }
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            relation: row.relation,
            avatar_url: row.avatar_url,
            created_at: row.created_at,
        }
    }
}

impl From<&Story> for StoryRow {
    fn from(s: &Story) -> Self {
        Self {
            id: s.id,
            profile_id: s.profile_id,
            transcript: s.transcript.clone(),
            audio_ref: s.audio_ref.clone(),
            embedding: s.embedding.clone(),
            event_year: s.event_year,
            created_at: s.created_at,
        }
    }
}

impl From<StoryRow> for Story {
    fn from(row: StoryRow) -> Self {
        Self {
            id: row.id,
            profile_id: row.profile_id,
            transcript: row.transcript,
            audio_ref: row.audio_ref,
            embedding: row.embedding,
            event_year: row.event_year,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_row_keeps_vector_through_bincode() {
        let row = StoryRow {
            id: 4,
            profile_id: 1,
            transcript: "I was diagnosed with cancer in 2003".to_string(),
            audio_ref: Some("cancer_story.mp3".to_string()),
            embedding: vec![0.25, 0.5, 0.75],
            event_year: Some(2003),
            created_at: 1_700_000_000,
        };

        let bytes = bincode::serialize(&row).unwrap();
        let story: Story = bincode::deserialize::<StoryRow>(&bytes).unwrap().into();
        assert_eq!(story.embedding, vec![0.25, 0.5, 0.75]);
        assert_eq!(story.audio_ref.as_deref(), Some("cancer_story.mp3"));
    }
}
