// ============================================================================
// story-recall — CLI for profiles, stories and questions
// ============================================================================
// Usage:
//   story-recall profiles add --name NAME --relation REL   Create a profile
//   story-recall profiles list | show ID                   Browse profiles
//   story-recall stories add --profile ID --text TEXT      Record a story
//   story-recall stories list --profile ID                 Stories by year
//   story-recall ask --profile ID "question"               Ask a profile
//   story-recall load | reload FILE.csv --name NAME ...    Bulk CSV import
//   story-recall seed FILE.md --name NAME ...              Markdown import
//   story-recall stats                                     Row counts
//   story-recall export --format json                      Full JSON dump
// ============================================================================

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use recall_core::ingest::{self, LoadMode, SourceStory};
use recall_core::{NewProfile, NewStory, RecallConfig, RecallDb, RecallManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Story Recall command-line tool
#[derive(Parser)]
#[command(name = "story-recall", version, about = "Record family stories and ask questions about them")]
struct Cli {
    /// Path to the database file (default: ~/.story-recall/recall.redb)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage profiles
    Profiles {
        #[command(subcommand)]
        action: ProfileCommand,
    },

    /// Manage stories
    Stories {
        #[command(subcommand)]
        action: StoryCommand,
    },

    /// Ask a profile a question
    Ask {
        #[arg(long)]
        profile: u64,

        /// The question, in plain words
        query: String,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load stories from a CSV file (skipped if the database has data)
    Load(CsvImport),

    /// Clear the database, then load stories from a CSV file
    Reload(CsvImport),

    /// Load stories from a Markdown file (skipped if the database has data)
    Seed {
        /// Markdown file with `---` separated stories
        file: PathBuf,

        #[command(flatten)]
        profile: ProfileArgs,
    },

    /// Show database statistics
    Stats,

    /// Export full database contents as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// Create a profile
    Add(ProfileArgs),

    /// List all profiles
    List,

    /// Show one profile and its stories
    Show { id: u64 },
}

#[derive(Subcommand)]
enum StoryCommand {
    /// Record a story (text, audio reference, or both)
    Add {
        #[arg(long)]
        profile: u64,

        #[arg(long)]
        text: Option<String>,

        /// Audio file name stored alongside the story
        #[arg(long)]
        audio: Option<String>,

        /// Year the story happened
        #[arg(long, allow_hyphen_values = true)]
        year: Option<i32>,
    },

    /// List a profile's stories ordered by year
    List {
        #[arg(long)]
        profile: u64,
    },
}

#[derive(Args)]
struct ProfileArgs {
    #[arg(long)]
    name: String,

    /// How the asker should be addressed, e.g. grandfather
    #[arg(long)]
    relation: String,

    #[arg(long)]
    avatar_url: Option<String>,
}

#[derive(Args)]
struct CsvImport {
    /// CSV file with title,year,transcript columns
    file: PathBuf,

    #[command(flatten)]
    profile: ProfileArgs,

    /// Directory of .mp3/.wav/.m4a clips named after story titles
    #[arg(long)]
    audio_dir: Option<PathBuf>,
}

impl ProfileArgs {
    fn to_new_profile(&self) -> NewProfile {
        let profile = NewProfile::new(&self.name, &self.relation);
        match &self.avatar_url {
            Some(url) => profile.with_avatar(url),
            None => profile,
        }
    }
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn format_year(year: Option<i32>) -> String {
    year.map(|y| y.to_string()).unwrap_or_else(|| "-".into())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("recall_core=info,recall_cli=info"));

    // stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    init_logging();

    let cli = Cli::parse();

    let mut config = RecallConfig::from_env().context("Invalid configuration")?;
    if let Some(path) = cli.db_path {
        config.db_path = Some(path);
    }
    if config.api_key().is_none() {
        warn!("OPENAI_API_KEY not set, using offline embeddings and templated replies");
    }

    let db = Arc::new(RecallDb::open(config.db_path.as_deref(), config.embedding_dim)?);
    let db_path = db.path().to_path_buf();
    let manager = RecallManager::from_config(&config, db)?;

    match cli.command {
        Commands::Profiles { action } => match action {
            ProfileCommand::Add(args) => cmd_profile_add(&manager, &args),
            ProfileCommand::List => cmd_profile_list(&manager),
            ProfileCommand::Show { id } => cmd_profile_show(&manager, id),
        },
        Commands::Stories { action } => match action {
            StoryCommand::Add {
                profile,
                text,
                audio,
                year,
            } => cmd_story_add(&manager, profile, text, audio, year).await,
            StoryCommand::List { profile } => cmd_story_list(&manager, profile),
        },
        Commands::Ask {
            profile,
            query,
            json,
        } => cmd_ask(&manager, profile, &query, json).await,
        Commands::Load(import) => cmd_import_csv(&manager, &config, &import, LoadMode::SkipIfPopulated).await,
        Commands::Reload(import) => cmd_import_csv(&manager, &config, &import, LoadMode::Replace).await,
        Commands::Seed { file, profile } => cmd_seed(&manager, &file, &profile).await,
        Commands::Stats => cmd_stats(&manager, &db_path),
        Commands::Export { format } => cmd_export(&manager, &format),
    }
}

fn cmd_profile_add(manager: &RecallManager, args: &ProfileArgs) -> Result<()> {
    let profile = manager.create_profile(args.to_new_profile())?;
    println!("Created profile {}: {} ({})", profile.id, profile.name, profile.relation);
    Ok(())
}

fn cmd_profile_list(manager: &RecallManager) -> Result<()> {
    let profiles = manager.list_profiles()?;

    if profiles.is_empty() {
        println!("No profiles found.");
        return Ok(());
    }

    println!("{:<6}  {:<24}  {:<16}  {}", "ID", "NAME", "RELATION", "CREATED AT");
    println!("{}", "-".repeat(72));

    for profile in &profiles {
        println!(
            "{:<6}  {:<24}  {:<16}  {}",
            profile.id,
            profile.name,
            profile.relation,
            format_timestamp(profile.created_at)
        );
    }

    println!("\nTotal: {} profiles", profiles.len());
    Ok(())
}

fn cmd_profile_show(manager: &RecallManager, id: u64) -> Result<()> {
    let profile = manager.get_profile(id)?;

    println!("=== {} ===", profile.name);
    println!("Relation: {}", profile.relation);
    if let Some(url) = &profile.avatar_url {
        println!("Avatar:   {}", url);
    }
    println!("Created:  {}", format_timestamp(profile.created_at));
    println!();

    cmd_story_list(manager, id)
}

async fn cmd_story_add(
    manager: &RecallManager,
    profile_id: u64,
    text: Option<String>,
    audio: Option<String>,
    year: Option<i32>,
) -> Result<()> {
    let story = manager
        .add_story(NewStory {
            profile_id,
            transcript: text,
            event_year: year,
            audio_ref: audio,
        })
        .await?;

    println!(
        "Stored story {} for profile {} (year: {})",
        story.id,
        story.profile_id,
        format_year(story.event_year)
    );
    Ok(())
}

fn cmd_story_list(manager: &RecallManager, profile_id: u64) -> Result<()> {
    let stories = manager.profile_stories(profile_id)?;

    if stories.is_empty() {
        println!("No stories found.");
        return Ok(());
    }

    println!("{:<6}  {:<6}  {:<24}  {}", "ID", "YEAR", "AUDIO", "TRANSCRIPT");
    println!("{}", "-".repeat(90));

    for story in &stories {
        let transcript = story.transcript.chars().take(48).collect::<String>();
        println!(
            "{:<6}  {:<6}  {:<24}  {}",
            story.id,
            format_year(story.event_year),
            story.audio_ref.as_deref().unwrap_or("-"),
            transcript
        );
    }

    println!("\nTotal: {} stories", stories.len());
    Ok(())
}

async fn cmd_ask(manager: &RecallManager, profile_id: u64, query: &str, json: bool) -> Result<()> {
    let response = manager.ask(profile_id, query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}: {}", response.profile.name, response.message);

    if !response.stories.is_empty() {
        println!("\nRelated stories:");
        for scored in &response.stories {
            println!(
                "  [{:.3}] ({}) {}",
                scored.similarity_score,
                format_year(scored.story.event_year),
                scored.story.transcript.chars().take(70).collect::<String>()
            );
        }
    }

    Ok(())
}

async fn cmd_import_csv(
    manager: &RecallManager,
    config: &RecallConfig,
    import: &CsvImport,
    mode: LoadMode,
) -> Result<()> {
    let stories = ingest::read_stories_csv(&import.file)?;
    info!("Read {} stories from {}", stories.len(), import.file.display());

    let clips = match &import.audio_dir {
        Some(dir) => ingest::collect_audio_clips(dir, &config.resolved_storage_dir()?, &stories)?,
        None => Vec::new(),
    };

    run_load(manager, &import.profile, &stories, &clips, mode).await
}

async fn cmd_seed(manager: &RecallManager, file: &Path, profile: &ProfileArgs) -> Result<()> {
    let stories = ingest::read_stories_markdown(file)?;
    info!("Parsed {} stories from {}", stories.len(), file.display());

    run_load(manager, profile, &stories, &[], LoadMode::SkipIfPopulated).await
}

async fn run_load(
    manager: &RecallManager,
    profile: &ProfileArgs,
    stories: &[SourceStory],
    clips: &[ingest::AudioClip],
    mode: LoadMode,
) -> Result<()> {
    let summary = ingest::load_stories(manager, profile.to_new_profile(), stories, clips, mode).await?;

    if summary.skipped {
        println!("Database already has data, skipping load (use reload to replace it).");
        return Ok(());
    }

    if let Some(p) = &summary.profile {
        println!("Created profile {}: {} ({})", p.id, p.name, p.relation);
    }
    println!("Loaded {} text stories", summary.stories_loaded);
    println!("Loaded {} audio recordings", summary.audio_records);
    Ok(())
}

fn cmd_stats(manager: &RecallManager, db_path: &Path) -> Result<()> {
    let stats = manager.stats()?;

    println!("=== Story Recall Database Stats ===");
    println!("Database:  {}", db_path.display());
    println!("Dimension: {}", manager.store().dimension());
    println!();
    println!("Profiles:  {}", stats.profiles);
    println!("Stories:   {}", stats.stories);

    Ok(())
}

fn cmd_export(manager: &RecallManager, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let profiles = manager
        .list_profiles()?
        .into_iter()
        .map(|profile| {
            let stories = manager.profile_stories(profile.id)?;
            Ok(serde_json::json!({
                "profile": profile,
                "stories": stories,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": manager.stats()?,
        "profiles": profiles,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}
