//! # Configuration Module
//!
//! Data directory management and the tunable parameters of the generator.
//!
//! ## Data Storage
//!
//! Stride keeps its library cache and settings in the platform-standard data
//! directory:
//! - Linux: `~/.local/share/stride/`
//! - macOS: `~/Library/Application Support/stride/`
//! - Windows: `%APPDATA%\stride\`
//!
//! ## Tuning
//!
//! Every threshold and bonus cap the engine uses lives in [`GeneratorConfig`].
//! The values are empirically chosen, so they are read from `config.json` in
//! the data directory when it exists. Missing keys fall back to defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "stride";
const DB_FILE: &str = "library.db";
const CONFIG_FILE: &str = "config.json";

/// Returns the platform-appropriate library database path.
///
/// Creates the `stride` data directory when it does not exist yet.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The stride subdirectory cannot be created due to permissions
///
/// # Examples
///
/// ```no_run
/// use stride::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Library cache: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Returns the platform-appropriate data directory for Stride, creating it
/// if needed. Also holds `config.json` and published playlists.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let stride_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&stride_dir).with_context(|| {
        format!(
            "Failed to create Stride data directory at {}. Please check file permissions.",
            stride_dir.display()
        )
    })?;

    Ok(stride_dir)
}

/// Slot-fit thresholds and usage caps of the relaxation ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaxationConfig {
    pub adjacent_tier_min_fit: f64,
    pub second_tier_min_fit: f64,
    pub neighbor_genre_min_fit: f64,
    pub lockout_break_min_fit: f64,
    /// Slots per playlist that may use neighbor-genre relaxation
    pub max_neighbor_slots: usize,
    /// Slots per playlist that may break the lockout
    pub max_lockout_breaks: usize,
}

impl Default for RelaxationConfig {
    fn default() -> Self {
        Self {
            adjacent_tier_min_fit: 0.70,
            second_tier_min_fit: 0.65,
            neighbor_genre_min_fit: 0.60,
            lockout_break_min_fit: 0.55,
            max_neighbor_slots: 2,
            max_lockout_breaks: 1,
        }
    }
}

/// Weights and caps of the scoring terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub slot_fit_weight: f64,
    pub energy_cap_penalty: f64,
    pub energy_floor_penalty: f64,
    pub recency_bonus: f64,
    pub artist_spacing_bonus: f64,
    /// Distance at which the spacing bonus is fully earned
    pub artist_spacing_full_distance: usize,
    pub diversity_bonus: f64,
    pub artist_novelty_bonus: f64,
    /// Days after the lockout over which the novelty bonus ramps up
    pub artist_novelty_ramp_days: f64,
    pub artist_never_used_bonus: f64,
    pub genre_affinity_bonus: f64,
    pub rediscovery_bonus: f64,
    pub umbrella_balance_bonus: f64,
    pub source_likes_bonus: f64,
    pub source_recs_bonus: f64,
    pub source_third_bonus: f64,
    /// Tempo proxy scale when a track has no BPM
    pub missing_tempo_scale: f64,
    /// Pools larger than this are scored on the rayon pool
    pub parallel_threshold: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            slot_fit_weight: 0.60,
            energy_cap_penalty: 0.12,
            energy_floor_penalty: 0.10,
            recency_bonus: 0.10,
            artist_spacing_bonus: 0.16,
            artist_spacing_full_distance: 7,
            diversity_bonus: 0.10,
            artist_novelty_bonus: 0.08,
            artist_novelty_ramp_days: 20.0,
            artist_never_used_bonus: 0.06,
            genre_affinity_bonus: 0.08,
            rediscovery_bonus: 0.05,
            umbrella_balance_bonus: 0.06,
            source_likes_bonus: 0.04,
            source_recs_bonus: 0.02,
            source_third_bonus: 0.0,
            missing_tempo_scale: 0.9,
            parallel_threshold: 512,
        }
    }
}

/// All tunables of a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub minutes_per_slot: f64,
    pub duration_tolerance_minutes: f64,
    pub min_track_seconds: u64,
    pub max_track_seconds: u64,
    pub lockout_days: f64,
    pub rediscovery_days: f64,
    /// Cross-run artist cooldown; `None` disables it
    pub artist_cooldown_days: Option<f64>,
    pub diversity_lookback_days: f64,
    pub liveness_threshold: usize,
    pub neighbor_weight: f64,
    pub artist_cap: usize,
    pub steady_low_artist_cap: usize,
    pub top_k_easy: usize,
    pub top_k_moderate: usize,
    pub top_k_other: usize,
    pub rediscovery_target: f64,
    pub max_ramp_hard: usize,
    /// Cap on tail-extension slots; `None` extends until nothing fits
    pub max_extension_slots: Option<usize>,
    pub oracle_timeout_ms: u64,
    pub scoring: ScoringConfig,
    pub relaxation: RelaxationConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            minutes_per_slot: 4.0,
            duration_tolerance_minutes: 2.0,
            min_track_seconds: 90,
            max_track_seconds: 360,
            lockout_days: 10.0,
            rediscovery_days: 60.0,
            artist_cooldown_days: Some(3.0),
            diversity_lookback_days: 10.0,
            liveness_threshold: 200,
            neighbor_weight: 0.6,
            artist_cap: 2,
            steady_low_artist_cap: 1,
            top_k_easy: 25,
            top_k_moderate: 15,
            top_k_other: 8,
            rediscovery_target: 0.5,
            max_ramp_hard: 2,
            max_extension_slots: None,
            oracle_timeout_ms: 3_000,
            scoring: ScoringConfig::default(),
            relaxation: RelaxationConfig::default(),
        }
    }
}

impl GeneratorConfig {
    /// Read a config file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid generator config in {}", path.display()))
    }

    /// `load` when the file exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Path to the library cache
    pub db_path: PathBuf,
    pub generator: GeneratorConfig,
}

impl RuntimeConfig {
    /// Resolve paths from the data directory and load `config.json`.
    pub fn new() -> Result<Self> {
        let data_dir = get_data_dir()?;
        Ok(Self {
            db_path: data_dir.join(DB_FILE),
            generator: GeneratorConfig::load_or_default(&data_dir.join(CONFIG_FILE))?,
        })
    }

    /// Create configuration with explicit database path and default tuning
    pub fn with_db_path(db_path: PathBuf) -> Self {
        Self {
            db_path,
            generator: GeneratorConfig::default(),
        }
    }
}
