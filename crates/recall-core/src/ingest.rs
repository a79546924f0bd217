//! ============================================================================
//! Ingestion - Bulk story loading from CSV and Markdown
//! ============================================================================
//! Parses story sources, optionally copies matching audio clips into the
//! storage directory, and loads everything for one profile through the
//! `RecallManager` so every row goes through the same embedding path as an
//! interactive "add story". Rows are committed one by one.
//! ============================================================================

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::recall::RecallManager;
use crate::types::{NewProfile, NewStory, Profile};

/// File extensions treated as audio clips
const AUDIO_EXTENSIONS: [&str; 3] = ["mp3", "wav", "m4a"];

/// One story read from a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStory {
    pub title: String,
    pub year: Option<i32>,
    pub transcript: String,
}

/// An audio file matched to a story title
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioClip {
    pub title: String,
    /// File name inside the storage directory
    pub file_name: String,
    pub year: Option<i32>,
}

/// What to do when the store already holds data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Leave a populated store untouched
    SkipIfPopulated,
    /// Clear every profile and story first
    Replace,
}

/// Outcome of a batch load
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub profile: Option<Profile>,
    pub stories_loaded: usize,
    pub audio_records: usize,
    pub skipped: bool,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default)]
    title: String,
    #[serde(default)]
    year: String,
    #[serde(default)]
    transcript: String,
}

/// Parse a `title,year,transcript` CSV. Rows with an empty transcript are
/// skipped; an empty year means undated.
pub fn parse_stories_csv<R: Read>(reader: R) -> Result<Vec<SourceStory>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut stories = Vec::new();
    for (index, record) in csv_reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row = record.with_context(|| format!("Failed to read CSV line {}", line))?;

        if row.transcript.is_empty() {
            continue;
        }

        let year = if row.year.is_empty() {
            None
        } else {
            Some(
                row.year
                    .parse::<i32>()
                    .with_context(|| format!("Invalid year '{}' on CSV line {}", row.year, line))?,
            )
        };

        stories.push(SourceStory {
            title: if row.title.is_empty() {
                default_title(year)
            } else {
                row.title
            },
            year,
            transcript: row.transcript,
        });
    }

    Ok(stories)
}

/// Read and parse a CSV file
pub fn read_stories_csv(path: &Path) -> Result<Vec<SourceStory>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    parse_stories_csv(file)
}

/// Parse Markdown stories separated by `---`.
///
/// A block counts when it has a bold segment starting with a four-digit year
/// (`**1976 – Apple in the Garage**`) and a quoted italic transcript
/// (`_"..."_`, may span lines). The first bold segment is the title.
pub fn parse_stories_markdown(content: &str) -> Result<Vec<SourceStory>> {
    let year_re = Regex::new(r"\*\*([0-9]{4})")?;
    let story_re = Regex::new(r#"(?s)_"(.*?)"_"#)?;
    let title_re = Regex::new(r"\*\*(.+?)\*\*")?;

    let mut stories = Vec::new();
    for block in content.split("---").map(str::trim).filter(|b| !b.is_empty()) {
        let (Some(year), Some(story)) = (year_re.captures(block), story_re.captures(block)) else {
            continue;
        };

        let Ok(year) = year[1].parse::<i32>() else {
            continue;
        };
        let transcript = story[1].trim().to_string();
        if transcript.is_empty() {
            continue;
        }

        let title = title_re
            .captures(block)
            .map(|c| c[1].trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| default_title(Some(year)));

        stories.push(SourceStory {
            title,
            year: Some(year),
            transcript,
        });
    }

    Ok(stories)
}

/// Read and parse a Markdown file
pub fn read_stories_markdown(path: &Path) -> Result<Vec<SourceStory>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read Markdown file {}", path.display()))?;
    parse_stories_markdown(&content)
}

/// Copy audio files from `source_dir` into `storage_dir` and match them to
/// stories whose title slug equals the file stem slug
/// (`apple_in_the_garage.mp3` ↔ "Apple in the Garage").
/// Unmatched files are copied but produce no clip.
pub fn collect_audio_clips(
    source_dir: &Path,
    storage_dir: &Path,
    stories: &[SourceStory],
) -> Result<Vec<AudioClip>> {
    if !source_dir.is_dir() {
        warn!("Source audio directory {} not found", source_dir.display());
        return Ok(Vec::new());
    }

    std::fs::create_dir_all(storage_dir)
        .with_context(|| format!("Failed to create storage directory {}", storage_dir.display()))?;

    let mut files: Vec<_> = std::fs::read_dir(source_dir)
        .with_context(|| format!("Failed to list {}", source_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_audio_file(path))
        .collect();
    files.sort();

    let mut clips = Vec::new();
    for path in files {
        let (Some(file_name), Some(stem)) = (
            path.file_name().and_then(|n| n.to_str()),
            path.file_stem().and_then(|s| s.to_str()),
        ) else {
            continue;
        };

        std::fs::copy(&path, storage_dir.join(file_name))
            .with_context(|| format!("Failed to copy {}", path.display()))?;
        info!("Copied audio file: {}", file_name);

        let stem_slug = slugify(stem);
        if let Some(story) = stories.iter().find(|s| slugify(&s.title) == stem_slug) {
            clips.push(AudioClip {
                title: story.title.clone(),
                file_name: file_name.to_string(),
                year: story.year,
            });
        }
    }

    Ok(clips)
}

/// Load one profile with its stories and audio clips.
pub async fn load_stories(
    manager: &RecallManager,
    profile: NewProfile,
    stories: &[SourceStory],
    clips: &[AudioClip],
    mode: LoadMode,
) -> Result<LoadSummary> {
    let stats = manager.stats()?;
    match mode {
        LoadMode::SkipIfPopulated if stats.profiles > 0 => {
            info!(
                "Database already has {} profiles and {} stories, skipping load",
                stats.profiles, stats.stories
            );
            return Ok(LoadSummary {
                skipped: true,
                ..Default::default()
            });
        }
        LoadMode::Replace => {
            manager.store().clear()?;
            info!("Cleared existing database data");
        }
        LoadMode::SkipIfPopulated => {}
    }

    let profile = manager.create_profile(profile)?;

    let mut summary = LoadSummary {
        profile: Some(profile.clone()),
        ..Default::default()
    };

    for story in stories {
        manager
            .add_story(NewStory {
                profile_id: profile.id,
                transcript: Some(story.transcript.clone()),
                event_year: story.year,
                audio_ref: None,
            })
            .await
            .with_context(|| format!("Failed to load story '{}'", story.title))?;
        summary.stories_loaded += 1;
        info!("Loaded text story: {} ({:?})", story.title, story.year);
    }

    for clip in clips {
        manager
            .add_story(NewStory {
                profile_id: profile.id,
                transcript: Some(format!("Audio recording: {}", clip.title)),
                event_year: clip.year,
                audio_ref: Some(clip.file_name.clone()),
            })
            .await
            .with_context(|| format!("Failed to load audio clip '{}'", clip.file_name))?;
        summary.audio_records += 1;
        info!("Loaded audio recording: {} -> {}", clip.title, clip.file_name);
    }

    info!(
        "Loaded {} text stories and {} audio recordings for {}",
        summary.stories_loaded, summary.audio_records, profile.name
    );
    Ok(summary)
}

fn default_title(year: Option<i32>) -> String {
    match year {
        Some(y) => format!("Story from {}", y),
        None => "Untitled story".to_string(),
    }
}

fn is_audio_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}
