//! ============================================================================
//! In-Memory Store - Ephemeral story store
//! ============================================================================
//! Same contract as `RecallDb`, held behind a single `RwLock`. Inserts
//! validate and append under one write guard, so readers never see a story
//! without its vector.
//! ============================================================================

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{validate_draft, StoryStore};
use crate::types::{
    NewProfile, Profile, ProfileId, RecallError, Result, Story, StoryDraft,
};

#[derive(Default)]
struct State {
    profiles: Vec<Profile>,
    stories: Vec<Story>,
    next_profile_id: u64,
    next_story_id: u64,
}

/// Story store kept entirely in memory
pub struct InMemoryStore {
    dimension: usize,
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(State {
                next_profile_id: 1,
                next_story_id: 1,
                ..Default::default()
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| RecallError::Storage("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| RecallError::Storage("in-memory store lock poisoned".to_string()))
    }
}

impl StoryStore for InMemoryStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn create_profile(&self, profile: NewProfile) -> Result<Profile> {
        let mut state = self.write()?;
        let created = Profile {
            id: state.next_profile_id,
            name: profile.name,
            relation: profile.relation,
            avatar_url: profile.avatar_url,
            created_at: chrono::Utc::now().timestamp(),
        };
        state.next_profile_id += 1;
        state.profiles.push(created.clone());
        Ok(created)
    }

    fn get_profile(&self, id: ProfileId) -> Result<Option<Profile>> {
        Ok(self.read()?.profiles.iter().find(|p| p.id == id).cloned())
    }

    fn list_profiles(&self) -> Result<Vec<Profile>> {
        Ok(self.read()?.profiles.clone())
    }

    fn list_stories(&self, profile_id: ProfileId) -> Result<Vec<Story>> {
        Ok(self
            .read()?
            .stories
            .iter()
            .filter(|s| s.profile_id == profile_id)
            .cloned()
            .collect())
    }

    fn insert_story(&self, draft: StoryDraft) -> Result<Story> {
        validate_draft(&draft, self.dimension)?;

        let mut state = self.write()?;
        if !state.profiles.iter().any(|p| p.id == draft.profile_id) {
            return Err(RecallError::ProfileNotFound(draft.profile_id));
        }

        let story = Story {
            id: state.next_story_id,
            profile_id: draft.profile_id,
            transcript: draft.transcript,
            audio_ref: draft.audio_ref,
            embedding: draft.embedding,
            event_year: draft.event_year,
            created_at: chrono::Utc::now().timestamp(),
        };
        state.next_story_id += 1;
        state.stories.push(story.clone());
        Ok(story)
    }

    fn count_profiles(&self) -> Result<usize> {
        Ok(self.read()?.profiles.len())
    }

    fn count_stories(&self) -> Result<usize> {
        Ok(self.read()?.stories.len())
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.write()?;
        *state = State {
            next_profile_id: 1,
            next_story_id: 1,
            ..Default::default()
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_requires_profile() {
        let store = InMemoryStore::new(2);
        let err = store
            .insert_story(StoryDraft {
                profile_id: 7,
                transcript: "lost".to_string(),
                embedding: vec![1.0, 0.0],
                event_year: None,
                audio_ref: None,
            })
            .unwrap_err();
        assert!(matches!(err, RecallError::ProfileNotFound(7)));
        assert_eq!(store.count_stories().unwrap(), 0);
    }

    #[test]
    fn test_ids_increase_and_clear_resets() {
        let store = InMemoryStore::new(2);
        let a = store.create_profile(NewProfile::new("A", "aunt")).unwrap();
        let b = store.create_profile(NewProfile::new("B", "uncle")).unwrap();
        assert!(b.id > a.id);

        store.clear().unwrap();
        assert_eq!(store.stats().unwrap().profiles, 0);
        assert_eq!(store.create_profile(NewProfile::new("C", "cousin")).unwrap().id, 1);
    }
}
