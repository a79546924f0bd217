// ============================================================================
// RecallDb — Embedded Database (redb)
// ============================================================================
// Persistent local storage for profiles and stories.
// Default path: ~/.story-recall/recall.redb (override via STORY_RECALL_DB_PATH
// or an explicit path). Stories are keyed by (profile_id, story_id) so one
// profile's stories are a contiguous range in insertion order.
// ============================================================================

use redb::{Database, ReadableTable, ReadableTableMetadata, Table, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::{ProfileRow, StoryRow};
use super::{storage_err, validate_draft, StoryStore};
use crate::types::{
    NewProfile, Profile, ProfileId, RecallError, Result, Story, StoryDraft,
};

// Table definitions
const PROFILES: TableDefinition<u64, &[u8]> = TableDefinition::new("profiles");
const STORIES: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("stories");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

// Meta keys
const META_DIMENSION: &str = "embedding_dimension";
const META_NEXT_PROFILE_ID: &str = "next_profile_id";
const META_NEXT_STORY_ID: &str = "next_story_id";

/// Default database location under the home directory
pub fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RecallError::Config("Cannot determine home directory".to_string()))?;
    Ok(home.join(".story-recall").join("recall.redb"))
}

/// redb-backed story store
pub struct RecallDb {
    db: Database,
    path: PathBuf,
    dimension: usize,
}

impl RecallDb {
    /// Open (or create) the database at `path`, or the default location.
    ///
    /// The embedding dimension is recorded on first open; reopening with a
    /// different one fails.
    pub fn open(path: Option<&Path>, dimension: usize) -> Result<Self> {
        let db_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_db_path()?,
        };

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| storage_err("create database directory", e))?;
        }

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path).map_err(|e| storage_err("open database", e))?;

        // Ensure tables exist and pin the dimension
        let write_txn = db.begin_write().map_err(|e| storage_err("begin write", e))?;
        {
            write_txn
                .open_table(PROFILES)
                .map_err(|e| storage_err("create profiles table", e))?;
            write_txn
                .open_table(STORIES)
                .map_err(|e| storage_err("create stories table", e))?;
            let mut meta = write_txn
                .open_table(META)
                .map_err(|e| storage_err("create meta table", e))?;

            let stored = meta
                .get(META_DIMENSION)
                .map_err(|e| storage_err("read dimension", e))?
                .map(|g| g.value());
            match stored {
                Some(existing) if existing as usize != dimension => {
                    return Err(RecallError::DimensionMismatch {
                        expected: existing as usize,
                        actual: dimension,
                    });
                }
                Some(_) => {}
                None => {
                    meta.insert(META_DIMENSION, dimension as u64)
                        .map_err(|e| storage_err("record dimension", e))?;
                }
            }
        }
        write_txn.commit().map_err(|e| storage_err("commit init", e))?;

        info!("Database ready (dimension {})", dimension);

        Ok(Self {
            db,
            path: db_path,
            dimension,
        })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoryStore for RecallDb {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn create_profile(&self, profile: NewProfile) -> Result<Profile> {
        let write_txn = self.db.begin_write().map_err(|e| storage_err("begin write", e))?;
        let created = {
            let mut meta = write_txn
                .open_table(META)
                .map_err(|e| storage_err("open meta table", e))?;
            let id = next_id(&mut meta, META_NEXT_PROFILE_ID)?;

            let created = Profile {
                id,
                name: profile.name,
                relation: profile.relation,
                avatar_url: profile.avatar_url,
                created_at: chrono::Utc::now().timestamp(),
            };
            let value = bincode::serialize(&ProfileRow::from(&created))
                .map_err(|e| storage_err("serialize profile", e))?;

            let mut table = write_txn
                .open_table(PROFILES)
                .map_err(|e| storage_err("open profiles table", e))?;
            table
                .insert(id, value.as_slice())
                .map_err(|e| storage_err("insert profile", e))?;
            created
        };
        write_txn.commit().map_err(|e| storage_err("commit", e))?;

        debug!("Stored profile: {} ({})", created.id, created.name);
        Ok(created)
    }

    fn get_profile(&self, id: ProfileId) -> Result<Option<Profile>> {
        let read_txn = self.db.begin_read().map_err(|e| storage_err("begin read", e))?;
        let table = read_txn
            .open_table(PROFILES)
            .map_err(|e| storage_err("open profiles table", e))?;

        match table.get(id).map_err(|e| storage_err("get profile", e))? {
            Some(value) => {
                let row: ProfileRow = bincode::deserialize(value.value())
                    .map_err(|e| storage_err("deserialize profile", e))?;
                Ok(Some(row.into()))
            }
            None => Ok(None),
        }
    }

    fn list_profiles(&self) -> Result<Vec<Profile>> {
        let read_txn = self.db.begin_read().map_err(|e| storage_err("begin read", e))?;
        let table = read_txn
            .open_table(PROFILES)
            .map_err(|e| storage_err("open profiles table", e))?;

        let mut results = Vec::new();
        let iter = table
            .range::<u64>(..)
            .map_err(|e| storage_err("iterate profiles", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| storage_err("read entry", e))?;
            let row: ProfileRow = bincode::deserialize(value.value())
                .map_err(|e| storage_err("deserialize profile", e))?;
            results.push(row.into());
        }
        Ok(results)
    }

    fn list_stories(&self, profile_id: ProfileId) -> Result<Vec<Story>> {
        let read_txn = self.db.begin_read().map_err(|e| storage_err("begin read", e))?;
        let table = read_txn
            .open_table(STORIES)
            .map_err(|e| storage_err("open stories table", e))?;

        let mut results = Vec::new();
        let iter = table
            .range((profile_id, 0u64)..=(profile_id, u64::MAX))
            .map_err(|e| storage_err("iterate stories", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| storage_err("read entry", e))?;
            let row: StoryRow = bincode::deserialize(value.value())
                .map_err(|e| storage_err("deserialize story", e))?;
            if row.embedding.len() != self.dimension {
                return Err(RecallError::DimensionMismatch {
                    expected: self.dimension,
                    actual: row.embedding.len(),
                });
            }
            results.push(row.into());
        }
        Ok(results)
    }

    fn insert_story(&self, draft: StoryDraft) -> Result<Story> {
        validate_draft(&draft, self.dimension)?;

        // Profile check, id allocation and the row share one transaction
        let write_txn = self.db.begin_write().map_err(|e| storage_err("begin write", e))?;
        let story = {
            let profiles = write_txn
                .open_table(PROFILES)
                .map_err(|e| storage_err("open profiles table", e))?;
            if profiles
                .get(draft.profile_id)
                .map_err(|e| storage_err("get profile", e))?
                .is_none()
            {
                return Err(RecallError::ProfileNotFound(draft.profile_id));
            }

            let mut meta = write_txn
                .open_table(META)
                .map_err(|e| storage_err("open meta table", e))?;
            let id = next_id(&mut meta, META_NEXT_STORY_ID)?;

            let story = Story {
                id,
                profile_id: draft.profile_id,
                transcript: draft.transcript,
                audio_ref: draft.audio_ref,
                embedding: draft.embedding,
                event_year: draft.event_year,
                created_at: chrono::Utc::now().timestamp(),
            };
            let value = bincode::serialize(&StoryRow::from(&story))
                .map_err(|e| storage_err("serialize story", e))?;

            let mut stories = write_txn
                .open_table(STORIES)
                .map_err(|e| storage_err("open stories table", e))?;
            stories
                .insert((story.profile_id, id), value.as_slice())
                .map_err(|e| storage_err("insert story", e))?;
            story
        };
        write_txn.commit().map_err(|e| storage_err("commit", e))?;

        debug!("Stored story {} for profile {}", story.id, story.profile_id);
        Ok(story)
    }

    fn count_profiles(&self) -> Result<usize> {
        let read_txn = self.db.begin_read().map_err(|e| storage_err("begin read", e))?;
        let table = read_txn
            .open_table(PROFILES)
            .map_err(|e| storage_err("open profiles table", e))?;
        let count = table.len().map_err(|e| storage_err("count profiles", e))?;
        Ok(count as usize)
    }

    fn count_stories(&self) -> Result<usize> {
        let read_txn = self.db.begin_read().map_err(|e| storage_err("begin read", e))?;
        let table = read_txn
            .open_table(STORIES)
            .map_err(|e| storage_err("open stories table", e))?;
        let count = table.len().map_err(|e| storage_err("count stories", e))?;
        Ok(count as usize)
    }

    fn clear(&self) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| storage_err("begin write", e))?;
        write_txn
            .delete_table(STORIES)
            .map_err(|e| storage_err("drop stories table", e))?;
        write_txn
            .delete_table(PROFILES)
            .map_err(|e| storage_err("drop profiles table", e))?;
        {
            write_txn
                .open_table(PROFILES)
                .map_err(|e| storage_err("create profiles table", e))?;
            write_txn
                .open_table(STORIES)
                .map_err(|e| storage_err("create stories table", e))?;
            let mut meta = write_txn
                .open_table(META)
                .map_err(|e| storage_err("open meta table", e))?;
            meta.remove(META_NEXT_PROFILE_ID)
                .map_err(|e| storage_err("reset profile ids", e))?;
            meta.remove(META_NEXT_STORY_ID)
                .map_err(|e| storage_err("reset story ids", e))?;
        }
        write_txn.commit().map_err(|e| storage_err("commit clear", e))?;

        info!("Cleared all profiles and stories");
        Ok(())
    }
}

/// Allocate the next id for `key` (ids start at 1)
fn next_id(meta: &mut Table<&'static str, u64>, key: &str) -> Result<u64> {
    let id = meta
        .get(key)
        .map_err(|e| storage_err("read id counter", e))?
        .map(|g| g.value())
        .unwrap_or(1);
    meta.insert(key, id + 1)
        .map_err(|e| storage_err("bump id counter", e))?;
    Ok(id)
}
