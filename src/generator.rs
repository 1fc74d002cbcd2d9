//! # Playlist Generator
//!
//! Entry point tying the pieces together:
//!
//! 1. read one [`LibrarySnapshot`] from the cache
//! 2. build the candidate pool, broadening to neighbor genres once if a
//!    genre-filtered pool is thinner than the liveness threshold
//! 3. build the effort curve for the template and duration plan
//! 4. run the selection loop, then trim the tail to the upper bound
//! 5. report picks, stats and the event log
//!
//! [`Generator::generate`] is pure apart from the cache read. [`Generator::run`]
//! also publishes the playlist and records usage.

use crate::cache::{record_usage, LibraryCache};
use crate::config::GeneratorConfig;
use crate::curve::{build_curve, minutes_to_seconds, DurationPlan, Segment, Slot, Template};
use crate::error::GenerationError;
use crate::events::{EventLog, GenerationEvent, RelaxStep};
use crate::fitter::trim_to_bounds;
use crate::library::{Decade, LibrarySnapshot, SourceKind, UsageHistory};
use crate::oracle::PlayabilityOracle;
use crate::pool::{CandidatePoolBuilder, PoolFilters, PoolOptions};
use crate::queue::{Pick, SelectionCounters, SelectionInputs, SelectionLoop};
use crate::relax::PoolSet;
use crate::sink::{PlaylistRef, PlaylistSink, PublishedPlaylist};
use crate::taxonomy::{selected_weights, GenreTaxonomy};
use crate::tier::EffortTier;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// What the caller asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub template: Template,
    pub plan: DurationPlan,
    /// User-facing genre names; resolved through the taxonomy
    pub genres: Vec<String>,
    pub decades: Vec<Decade>,
}

impl GenerationRequest {
    /// Template with its default warm-up/core/cool-down split.
    #[must_use]
    pub fn new(template: Template, total_minutes: u32) -> Self {
        Self::with_plan(template, DurationPlan::for_template(template, total_minutes))
    }

    #[must_use]
    pub fn with_plan(template: Template, plan: DurationPlan) -> Self {
        Self {
            template,
            plan,
            genres: Vec::new(),
            decades: Vec::new(),
        }
    }

    #[must_use]
    pub fn genres(mut self, genres: Vec<String>) -> Self {
        self.genres = genres;
        self
    }

    #[must_use]
    pub fn decades(mut self, decades: Vec<Decade>) -> Self {
        self.decades = decades;
        self
    }
}

/// Counts and averages describing one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    pub pool_size: usize,
    pub pool_broadened: bool,
    pub preflight_unplayable: usize,
    pub slots_planned: usize,
    pub slots_filled: usize,
    pub slots_skipped: usize,
    pub extension_slots: usize,
    pub tracks_trimmed: usize,
    pub swapped: usize,
    pub removed: usize,
    pub oracle_timeouts: usize,
    pub neighbor_relax_slots: usize,
    pub lockout_breaks: usize,
    pub max_downgrades: usize,
    pub hard_downgrades: usize,
    pub total_seconds: u64,
    pub min_seconds: u64,
    pub max_seconds: u64,
    pub warmup_seconds: u64,
    pub main_seconds: u64,
    pub cooldown_seconds: u64,
    pub warmup_target_seconds: u64,
    pub main_target_seconds: u64,
    pub cooldown_target_seconds: u64,
    pub rediscovery_pct: f64,
    pub unique_artists: usize,
    pub avg_tempo_fit: f64,
    pub avg_slot_fit: f64,
    pub avg_genre_affinity: f64,
    pub under_duration: bool,
}

/// Per-track diagnostics as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotReport {
    pub slot: usize,
    pub track_id: String,
    pub artist_id: String,
    pub title: String,
    pub artist_name: String,
    pub seconds: u64,
    pub tier: EffortTier,
    pub scored_tier: EffortTier,
    pub segment: Segment,
    pub tempo: Option<f64>,
    pub energy: Option<f64>,
    pub tempo_fit: f64,
    pub effort_index: f64,
    pub slot_fit: f64,
    pub score: f64,
    pub genre_affinity: f64,
    pub umbrella: Option<String>,
    pub decade: Decade,
    pub is_rediscovery: bool,
    pub relax_step: Option<u8>,
    pub used_neighbor: bool,
    pub broke_lockout: bool,
    pub substituted: bool,
}

/// Output of one generation run.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub name: String,
    pub description: String,
    pub template: Template,
    pub plan: DurationPlan,
    pub curve: Vec<Slot>,
    pub picks: Vec<Pick>,
    pub stats: GenerationStats,
    pub events: EventLog,
    /// Genre filters were active (after resolution)
    pub genre_filtered: bool,
    /// Pool was built with neighbor weights from the start
    broadened: bool,
}

/// Serializable view of a [`GenerationOutcome`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub name: String,
    pub description: String,
    pub template: Template,
    pub track_ids: Vec<String>,
    pub artist_ids: Vec<String>,
    pub efforts: Vec<EffortTier>,
    pub sources: Vec<SourceKind>,
    pub slots: Vec<SlotReport>,
    #[serde(flatten)]
    pub stats: GenerationStats,
}

impl GenerationOutcome {
    #[must_use]
    pub fn track_ids(&self) -> Vec<String> {
        self.picks.iter().map(|p| p.track_id().to_string()).collect()
    }

    #[must_use]
    pub fn slot_reports(&self) -> Vec<SlotReport> {
        self.picks
            .iter()
            .map(|pick| {
                let candidate = &pick.candidate;
                SlotReport {
                    slot: pick.slot.index,
                    track_id: candidate.id().to_string(),
                    artist_id: candidate.artist_id().to_string(),
                    title: candidate.track.title.clone(),
                    artist_name: candidate.track.artist_name.clone(),
                    seconds: pick.seconds(),
                    tier: pick.tier,
                    scored_tier: pick.breakdown.tier,
                    segment: pick.slot.segment,
                    tempo: candidate.tempo(),
                    energy: candidate.energy(),
                    tempo_fit: pick.breakdown.tempo_fit,
                    effort_index: pick.breakdown.effort_index,
                    slot_fit: pick.breakdown.slot_fit,
                    score: pick.breakdown.score,
                    genre_affinity: candidate.genre_affinity,
                    umbrella: candidate.umbrella.clone(),
                    decade: candidate.decade,
                    is_rediscovery: candidate.rediscovery,
                    relax_step: pick.relaxation.map(RelaxStep::number),
                    used_neighbor: pick.relaxation == Some(RelaxStep::NeighborGenres)
                        || (self.broadened && candidate.genre_affinity < 1.0),
                    broke_lockout: candidate.within_lockout,
                    substituted: pick.substituted,
                }
            })
            .collect()
    }

    #[must_use]
    pub fn report(&self) -> GenerationReport {
        GenerationReport {
            name: self.name.clone(),
            description: self.description.clone(),
            template: self.template,
            track_ids: self.track_ids(),
            artist_ids: self.picks.iter().map(|p| p.artist_id().to_string()).collect(),
            efforts: self.picks.iter().map(|p| p.tier).collect(),
            sources: self.picks.iter().map(|p| p.candidate.track.source).collect(),
            slots: self.slot_reports(),
            stats: self.stats.clone(),
        }
    }
}

/// A generated playlist and where it was published, if anywhere.
#[derive(Debug)]
pub struct RunResult {
    pub outcome: GenerationOutcome,
    pub playlist: Option<PlaylistRef>,
    pub usage_recorded: usize,
}

pub struct Generator {
    cache: Arc<dyn LibraryCache>,
    taxonomy: Box<dyn GenreTaxonomy>,
    config: GeneratorConfig,
}

impl Generator {
    #[must_use]
    pub fn new(cache: Arc<dyn LibraryCache>, taxonomy: Box<dyn GenreTaxonomy>, config: GeneratorConfig) -> Self {
        Self { cache, taxonomy, config }
    }

    #[must_use]
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate with a seeded [`StdRng`]; the same seed, library and `now`
    /// give the same playlist.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        oracle: &dyn PlayabilityOracle,
        seed: u64,
        now: DateTime<Utc>,
    ) -> Result<GenerationOutcome, GenerationError> {
        self.generate_with_rng(request, oracle, StdRng::seed_from_u64(seed), now)
            .await
    }

    pub async fn generate_with_rng<R: Rng>(
        &self,
        request: &GenerationRequest,
        oracle: &dyn PlayabilityOracle,
        rng: R,
        now: DateTime<Utc>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let snapshot = LibrarySnapshot::load(self.cache.as_ref())
            .await
            .map_err(GenerationError::Cache)?;
        let taxonomy: &dyn GenreTaxonomy = self.taxonomy.as_ref();
        let mut log = EventLog::new();

        let filters = PoolFilters {
            umbrellas: taxonomy.resolve_filters(&request.genres),
            decades: request.decades.clone(),
        };
        let history = UsageHistory::build(&snapshot, now, self.config.diversity_lookback_days, |artist| {
            taxonomy.primary_umbrella(&artist.genres)
        });

        let builder = CandidatePoolBuilder::new(&snapshot, taxonomy, &self.config, &filters, now);
        let mut options = PoolOptions {
            weights: selected_weights(&filters.umbrellas),
            enforce_lockout: true,
        };
        let mut pool = builder.build(&options);
        log.push(GenerationEvent::PoolBuilt {
            size: pool.len(),
            neighbor_weights: false,
            lockout_enforced: true,
        });

        let genre_filtered = filters.genre_filters_active();
        let neighbor_weights = taxonomy.neighbor_weights(&filters.umbrellas, self.config.neighbor_weight);
        let mut broadened = false;
        if genre_filtered && pool.len() < self.config.liveness_threshold {
            let before = pool.len();
            options.weights = neighbor_weights.clone();
            pool = builder.build(&options);
            broadened = true;
            log.push(GenerationEvent::PoolBroadened {
                before,
                after: pool.len(),
            });
        }

        if pool.is_empty() {
            warn!("No candidates survive the filters (genre filters: {genre_filtered})");
            return Err(GenerationError::EmptyPool {
                genre_filters_active: genre_filtered,
            });
        }
        let pool_size = pool.len();

        let curve = build_curve(request.template, &request.plan, self.config.minutes_per_slot);
        log.push(GenerationEvent::CurveBuilt {
            slots: curve.len(),
            tiers: curve.iter().map(|s| s.tier).collect(),
        });

        let bounds = request.plan.bounds_seconds(self.config.duration_tolerance_minutes);
        let relax_weights = (genre_filtered && !broadened).then_some(neighbor_weights);
        let pools = PoolSet::new(&builder, pool, options, broadened, relax_weights);
        let inputs = SelectionInputs {
            config: &self.config,
            template: request.template,
            pools: &pools,
            history: &history,
            target_umbrellas: &filters.umbrellas,
            oracle,
            now,
            bounds,
        };
        let selection = SelectionLoop::new(inputs, rng, log).run(&curve).await;

        let mut picks = selection.picks;
        let mut log = selection.log;
        let trimmed = trim_to_bounds(&mut picks, bounds.1, &mut log);
        let total_seconds: u64 = picks.iter().map(Pick::seconds).sum();
        if total_seconds < bounds.0 {
            log.push(GenerationEvent::UnderDuration {
                total_seconds,
                min_seconds: bounds.0,
            });
        }

        let preflight_unplayable = snapshot.tracks.iter().filter(|t| !t.playable).count();
        let stats = summarize(
            &picks,
            &selection.counters,
            &request.plan,
            bounds,
            trimmed,
            Preflight {
                pool_size,
                pool_broadened: broadened,
                preflight_unplayable,
            },
        );

        info!(
            "Generated {} tracks, {}s (bounds {}..{}s), {} slots skipped",
            picks.len(),
            stats.total_seconds,
            bounds.0,
            bounds.1,
            stats.slots_skipped
        );

        Ok(GenerationOutcome {
            name: playlist_name(request.template, &request.plan),
            description: describe_arc(&picks),
            template: request.template,
            plan: request.plan,
            curve,
            picks,
            stats,
            events: log,
            genre_filtered,
            broadened,
        })
    }

    /// Generate, publish to `sink` and record usage. A dry run or an empty
    /// result publishes and records nothing.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        oracle: &dyn PlayabilityOracle,
        sink: &dyn PlaylistSink,
        seed: u64,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<RunResult> {
        let mut outcome = self.generate(request, oracle, seed, now).await?;
        if dry_run || outcome.picks.is_empty() {
            return Ok(RunResult {
                outcome,
                playlist: None,
                usage_recorded: 0,
            });
        }

        let playlist = sink
            .publish(&PublishedPlaylist {
                name: outcome.name.clone(),
                description: outcome.description.clone(),
                track_ids: outcome.track_ids(),
                created_at: now,
            })
            .await
            .context("Failed to publish playlist")?;

        let usage_recorded = record_usage(self.cache.as_ref(), &outcome.track_ids(), now, &mut outcome.events).await?;

        Ok(RunResult {
            outcome,
            playlist: Some(playlist),
            usage_recorded,
        })
    }
}

struct Preflight {
    pool_size: usize,
    pool_broadened: bool,
    preflight_unplayable: usize,
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn summarize(
    picks: &[Pick],
    counters: &SelectionCounters,
    plan: &DurationPlan,
    bounds: (u64, u64),
    trimmed: usize,
    preflight: Preflight,
) -> GenerationStats {
    let seconds_in = |segment: Segment| -> u64 {
        picks
            .iter()
            .filter(|p| p.slot.segment == segment)
            .map(Pick::seconds)
            .sum()
    };
    let total_seconds: u64 = picks.iter().map(Pick::seconds).sum();
    let rediscovered = picks.iter().filter(|p| p.candidate.rediscovery).count();
    let unique_artists = picks.iter().map(Pick::artist_id).collect::<HashSet<_>>().len();

    #[allow(clippy::cast_precision_loss)]
    let rediscovery_pct = if picks.is_empty() {
        0.0
    } else {
        100.0 * rediscovered as f64 / picks.len() as f64
    };

    GenerationStats {
        pool_size: preflight.pool_size,
        pool_broadened: preflight.pool_broadened,
        preflight_unplayable: preflight.preflight_unplayable,
        slots_planned: counters.slots_planned,
        slots_filled: picks.len(),
        slots_skipped: counters.slots_skipped,
        extension_slots: counters.extension_slots,
        tracks_trimmed: trimmed,
        swapped: counters.swapped,
        removed: counters.removed,
        oracle_timeouts: counters.oracle_timeouts,
        neighbor_relax_slots: counters.neighbor_relax_slots,
        lockout_breaks: counters.lockout_breaks,
        max_downgrades: counters.max_downgrades,
        hard_downgrades: counters.hard_downgrades,
        total_seconds,
        min_seconds: bounds.0,
        max_seconds: bounds.1,
        warmup_seconds: seconds_in(Segment::Warmup),
        main_seconds: seconds_in(Segment::Main),
        cooldown_seconds: seconds_in(Segment::Cooldown),
        warmup_target_seconds: minutes_to_seconds(plan.warmup_minutes),
        main_target_seconds: minutes_to_seconds(plan.core_minutes),
        cooldown_target_seconds: minutes_to_seconds(plan.cooldown_minutes),
        rediscovery_pct,
        unique_artists,
        avg_tempo_fit: mean(picks.iter().map(|p| p.breakdown.tempo_fit)),
        avg_slot_fit: mean(picks.iter().map(|p| p.breakdown.slot_fit)),
        avg_genre_affinity: mean(picks.iter().map(|p| p.candidate.genre_affinity)),
        under_duration: total_seconds < bounds.0,
    }
}

/// `"<Template display> · <N> min"`
#[must_use]
pub fn playlist_name(template: Template, plan: &DurationPlan) -> String {
    format!("{} · {} min", template.display_name(), plan.total_minutes().round())
}

/// Tier arc of the selection, run-length encoded: `easy ×2 → hard → easy`.
fn describe_arc(picks: &[Pick]) -> String {
    let mut runs: Vec<(EffortTier, usize)> = Vec::new();
    for pick in picks {
        match runs.last_mut() {
            Some((tier, n)) if *tier == pick.tier => *n += 1,
            _ => runs.push((pick.tier, 1)),
        }
    }
    runs.iter()
        .map(|(tier, n)| if *n > 1 { format!("{tier} ×{n}") } else { tier.to_string() })
        .collect::<Vec<_>>()
        .join(" → ")
}
