//! # Stride - Workout Playlists
//!
//! Builds running playlists whose tempo and energy follow an effort curve,
//! drawing only on a locally cached library.
//!
//! ## Usage
//!
//! ```bash
//! # Load a library export into the cache
//! stride import library.json
//!
//! # Check what the cache holds
//! stride info
//!
//! # Build a 40 minute interval session from rock and punk
//! stride generate --template hiit --minutes 40 --genres rock,punk
//!
//! # Preview without recording usage, as JSON with an evaluation
//! stride generate -t pyramid -m 30 --dry-run --json --evaluate
//!
//! # Compare every template at 20, 30, 45 and 60 minutes
//! stride compare --save
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use log::{debug, info};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use stride::cli::{Args, Command};
use stride::compare::{run_batch, BatchPlan};
use stride::completion;
use stride::config::{get_data_dir, RuntimeConfig};
use stride::db::{LibraryDump, SqliteCache};
use stride::evaluate::evaluate;
use stride::generator::{GenerationOutcome, GenerationRequest, Generator};
use stride::oracle::AlwaysPlayable;
use stride::sink::JsonFileSink;
use stride::taxonomy::KeywordTaxonomy;

/// Main entry point for the Stride binary.
///
/// Logging is controlled through `RUST_LOG`:
/// - `RUST_LOG=debug stride generate ...` - every generation event
/// - `RUST_LOG=stride::queue=trace stride generate ...` - module-specific logging
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let runtime = match args.db {
        Some(path) => RuntimeConfig::with_db_path(path),
        None => RuntimeConfig::new()?,
    };
    debug!("Using library cache at {}", runtime.db_path.display());

    match args.command {
        Command::Generate {
            template,
            minutes,
            genres,
            decades,
            seed,
            dry_run,
            json,
            evaluate: with_evaluation,
            verbose,
        } => {
            let cache = Arc::new(SqliteCache::open(&runtime.db_path)?);
            let generator = Generator::new(cache, Box::new(KeywordTaxonomy), runtime.generator.clone());
            let request = GenerationRequest::new(template, minutes).genres(genres).decades(decades);
            let seed = seed.unwrap_or_else(rand::random);
            let sink = JsonFileSink::new(get_data_dir()?.join("playlists"));

            info!("Generating {template} for {minutes} min (seed {seed})");
            let result = generator
                .run(&request, &AlwaysPlayable, &sink, seed, Utc::now(), dry_run)
                .await?;
            let outcome = &result.outcome;
            let evaluation = with_evaluation.then(|| evaluate(&request, outcome));

            if json {
                let mut doc = serde_json::to_value(outcome.report()).context("Failed to serialize report")?;
                doc["seed"] = serde_json::json!(seed);
                if let Some(evaluation) = &evaluation {
                    doc["evaluation"] = serde_json::to_value(evaluation).context("Failed to serialize evaluation")?;
                }
                if verbose {
                    doc["events"] = serde_json::to_value(&outcome.events).context("Failed to serialize events")?;
                }
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                print_outcome(outcome, seed);
                if verbose {
                    println!();
                    for line in outcome.events.lines() {
                        println!("  {line}");
                    }
                }
                if let Some(evaluation) = &evaluation {
                    println!();
                    print!("{evaluation}");
                }
            }

            match (&result.playlist, dry_run) {
                (Some(playlist), _) => {
                    eprintln!("Saved to {} ({} tracks marked as used)", playlist.location, result.usage_recorded);
                }
                (None, true) => eprintln!("Dry run: nothing saved, usage unchanged"),
                (None, false) => eprintln!("No tracks selected, nothing saved"),
            }
        }
        Command::Import { path } => {
            let cache = SqliteCache::open(&runtime.db_path)?;
            let dump = read_dump(&path)?;
            let counts = cache.import(&dump)?;
            println!(
                "Imported {} tracks, {} audio features, {} artists, {} usage records",
                dump.tracks.len(),
                dump.audio_features.len(),
                dump.artists.len(),
                dump.usage.len()
            );
            println!("Cache now holds {} tracks ({} playable)", counts.tracks, counts.playable_tracks);
        }
        Command::Info => {
            let cache = SqliteCache::open(&runtime.db_path)?;
            let counts = cache.counts()?;
            println!("Library cache: {}", runtime.db_path.display());
            println!("  Tracks:         {}", counts.tracks);
            println!("  Playable:       {}", counts.playable_tracks);
            println!("  Audio features: {}", counts.audio_features);
            println!("  Artists:        {}", counts.artists);
            println!("  Used tracks:    {}", counts.used_tracks);
        }
        Command::Compare { templates, durations, mut genres, runs, seed, json, save } => {
            let cache = Arc::new(SqliteCache::open(&runtime.db_path)?);
            let generator = Generator::new(cache, Box::new(KeywordTaxonomy), runtime.generator.clone());
            genres.retain(|g| !g.trim().is_empty());
            let mut plan = BatchPlan {
                durations,
                runs_per_combo: runs,
                ..BatchPlan::default()
            };
            if !templates.is_empty() {
                plan.templates = templates;
            }
            plan.genre_sets = if genres.is_empty() { vec![Vec::new()] } else { vec![Vec::new(), genres] };
            let seed = seed.unwrap_or_else(rand::random);

            info!("Comparing {} generations (seed {seed})", plan.requests().len());
            let batch = run_batch(&generator, &plan, &AlwaysPlayable, seed, Utc::now()).await;
            let report = batch.compare()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize comparison")?);
            } else {
                print!("{report}");
            }

            if save {
                let dir = get_data_dir()?.join("reports");
                fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
                let path = dir.join(format!("comparison_{}.json", Utc::now().format("%Y%m%d_%H%M%S")));
                let doc = serde_json::to_string_pretty(&report).context("Failed to serialize comparison")?;
                fs::write(&path, doc).with_context(|| format!("Failed to write {}", path.display()))?;
                eprintln!("Report saved to {}", path.display());
            }
        }
        Command::Completion { shell } => {
            let mut cmd = Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        }
        Command::CompleteGenres => {
            completion::write_genre_completions(&mut std::io::stdout().lock())?;
        }
    }

    Ok(())
}

fn read_dump(path: &Path) -> Result<LibraryDump> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read library dump {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid library dump in {}", path.display()))
}

fn format_seconds(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn print_outcome(outcome: &GenerationOutcome, seed: u64) {
    let stats = &outcome.stats;
    println!("{}", outcome.name);
    println!("{}", outcome.description);
    println!();
    for slot in outcome.slot_reports() {
        let tempo = slot.tempo.map_or_else(|| "  ? ".to_string(), |t| format!("{t:>4.0}"));
        let marker = match (slot.relax_step, slot.substituted) {
            (Some(step), _) => format!(" (relaxed {step})"),
            (None, true) => " (substitute)".to_string(),
            (None, false) => String::new(),
        };
        println!(
            "{:>3}. [{:<8}] {:<9} {} bpm  {} - {}  {}{}",
            slot.slot + 1,
            slot.tier.as_str(),
            slot.segment.as_str(),
            tempo,
            slot.artist_name,
            slot.title,
            format_seconds(slot.seconds),
            marker
        );
    }
    println!();
    println!(
        "Total {} (window {}-{}), {} tracks, {} unique artists, {:.0}% rediscovered, seed {seed}",
        format_seconds(stats.total_seconds),
        format_seconds(stats.min_seconds),
        format_seconds(stats.max_seconds),
        stats.slots_filled,
        stats.unique_artists,
        stats.rediscovery_pct
    );
    if stats.slots_skipped > 0 || stats.under_duration {
        println!(
            "Library too thin in places: {} slots skipped{}",
            stats.slots_skipped,
            if stats.under_duration { ", playlist runs short" } else { "" }
        );
    }
}
