//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `stride` binary.
//!
//! ## Commands
//!
//! - `generate`: Build a workout playlist from the library cache
//! - `import`: Bulk-load a JSON library dump into the cache
//! - `info`: Show what the cache holds
//! - `compare`: Batch-generate across templates and durations, then compare
//! - `completion`: Print a shell completion script
//!
//! ## Examples
//!
//! ```bash
//! stride import ~/exports/library.json
//! stride generate --template hiit --minutes 40 --genres rock,punk
//! stride generate --template pyramid --minutes 30 --decades 1990s --dry-run --json
//! stride compare --durations 20,45 --runs 3
//! ```

use crate::curve::Template;
use crate::library::Decade;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "stride")]
#[command(about = "Stride: effort-shaped running playlists from your own library")]
#[command(version)]
pub struct Args {
    /// Library cache to use instead of the one in the data directory
    #[arg(long, global = true, env = "STRIDE_DB")]
    pub db: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a workout playlist
    ///
    /// Builds an effort curve for the template, picks one track per slot
    /// from the cached library and writes the result to the playlists
    /// folder in the data directory. Usage is recorded so the same tracks
    /// rest for the lockout window.
    Generate {
        /// Workout template: light, tempo, hiit, intervals, pyramid, kicker
        #[arg(short, long, value_parser = parse_template)]
        template: Template,

        /// Total run length in minutes
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(8..=240))]
        minutes: u32,

        /// Genre filters, comma separated (e.g. rock,hip-hop)
        #[arg(short, long, value_delimiter = ',')]
        genres: Vec<String>,

        /// Decade filters, comma separated (e.g. 1990s,2000s)
        #[arg(short, long, value_delimiter = ',', value_parser = parse_decade)]
        decades: Vec<Decade>,

        /// Seed for the weighted draw; random when omitted
        #[arg(long)]
        seed: Option<u64>,

        /// Show the playlist without publishing it or recording usage
        #[arg(long)]
        dry_run: bool,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Append the objective quality evaluation
        #[arg(long)]
        evaluate: bool,

        /// Print the generation event log
        #[arg(short, long)]
        verbose: bool,
    },

    /// Import a JSON library dump into the cache
    ///
    /// The dump holds `tracks`, `audioFeatures`, `artists` and optional
    /// `usage` arrays. Rows are upserted, so importing twice is harmless.
    Import {
        /// Path to the JSON dump
        #[arg(value_hint = clap::ValueHint::FilePath)]
        path: PathBuf,
    },

    /// Show library cache statistics
    Info,

    /// Run a batch of dry generations and compare their evaluations
    ///
    /// Every template is tried at every duration, once unfiltered and once
    /// with the genre set, `runs` times each. The report covers scores,
    /// track reuse, recurring issues and what filtering costs. Usage is
    /// never recorded.
    Compare {
        /// Templates to include; all when omitted
        #[arg(short, long, value_delimiter = ',', value_parser = parse_template)]
        templates: Vec<Template>,

        /// Run lengths in minutes
        #[arg(short, long, value_delimiter = ',', default_value = "20,30,45,60",
              value_parser = clap::value_parser!(u32).range(8..=240))]
        durations: Vec<u32>,

        /// Genre set run alongside the unfiltered runs; empty to skip
        #[arg(short, long, value_delimiter = ',', default_value = "rock,pop")]
        genres: Vec<String>,

        /// Runs per template, duration and genre set
        #[arg(short, long, default_value_t = 2)]
        runs: usize,

        /// Seed for the first run; later runs count up from it
        #[arg(long)]
        seed: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to the reports folder in the data directory
        #[arg(long)]
        save: bool,
    },

    /// Generate shell completions
    ///
    /// Usage: stride completion bash > ~/.local/share/bash-completion/completions/stride
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List genre umbrellas for completion (hidden command)
    #[command(hide = true)]
    CompleteGenres,
}

fn parse_template(raw: &str) -> Result<Template, String> {
    raw.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_decade(raw: &str) -> Result<Decade, String> {
    raw.parse().map_err(|e: anyhow::Error| e.to_string())
}
