//! Workout playlists shaped by an effort curve.
//!
//! Core modules:
//! - [`curve`] - Effort curves from a template and duration plan
//! - [`pool`] - Candidate filtering over a library snapshot
//! - [`algorithm`] - Track scoring against a slot
//! - [`relax`] - Fallbacks when a slot has no viable candidate
//! - [`queue`] - The slot-by-slot selection loop
//! - [`generator`] - The end-to-end entrypoint
//!
//! ### Supporting Modules
//!
//! - [`tier`] - Effort tiers and their scoring table
//! - [`library`] - Cached library records and usage history
//! - [`taxonomy`] - Free-text genres to umbrella categories
//! - [`cache`] / [`db`] - Library cache trait, in-memory and SQLite backends
//! - [`oracle`] - Playability checks
//! - [`sink`] - Where finished playlists go
//! - [`fitter`] - Tail trimming to the duration window
//! - [`events`] - Structured record of every decision
//! - [`evaluate`] - Objective quality report
//! - [`compare`] - Batch runs and cross-run comparison
//! - [`config`] - Data directory and tunables
//! - [`cli`] / [`completion`] - Command-line front-end
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use stride::cache::MemoryCache;
//! use stride::config::GeneratorConfig;
//! use stride::curve::Template;
//! use stride::generator::{GenerationRequest, Generator};
//! use stride::oracle::AlwaysPlayable;
//! use stride::taxonomy::KeywordTaxonomy;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = Arc::new(MemoryCache::default());
//! let generator = Generator::new(cache, Box::new(KeywordTaxonomy), GeneratorConfig::default());
//!
//! let request = GenerationRequest::new(Template::StrictAlternation, 40)
//!     .genres(vec!["rock".to_string()]);
//! let outcome = generator.generate(&request, &AlwaysPlayable, 42, Utc::now()).await?;
//!
//! println!("{}: {} tracks", outcome.name, outcome.picks.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## How a Playlist Is Built
//!
//! ### Effort Curve
//! - Warm-up and cool-down slots are always Easy
//! - The core follows the template: steady, alternating, pyramid or ramp
//! - One slot per four minutes of plan, at least one slot per section
//!
//! ### Candidate Pool
//! - Only playable tracks between 90 s and 6 min
//! - Tracks used in the last 10 days are locked out
//! - Genre and decade filters; a thin genre pool is widened to neighbor genres
//!
//! ### Scoring
//! - `tempoFit` compares BPM against the tier window, accepting half/double time
//! - `slotFit` measures how close the track's effort is to the slot's target
//! - Bounded bonuses reward recency, artist spacing, diversity and rediscovery
//!
//! ### Selection
//! - Weighted draw from the top candidates of each slot
//! - No artist twice in a row and at most two per playlist
//! - Unplayable tracks are swapped for alternates or dropped
//! - The tail is extended or trimmed to land within two minutes of the plan
//!
//! ## Error Handling
//!
//! Library-level I/O returns `anyhow::Result`. Generation itself only fails
//! hard with [`error::GenerationError`]: an empty candidate pool or an
//! unreadable cache. Thin libraries produce shorter playlists, with the gaps
//! counted in [`generator::GenerationStats`] and the [`events::EventLog`].
//!
//! ## Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```

pub mod algorithm;
pub mod cache;
pub mod cli;
pub mod compare;
pub mod completion;
pub mod config;
pub mod curve;
pub mod db;
pub mod error;
pub mod evaluate;
pub mod events;
pub mod fitter;
pub mod generator;
pub mod library;
pub mod oracle;
pub mod pool;
pub mod queue;
pub mod relax;
pub mod sink;
pub mod taxonomy;
pub mod tier;
