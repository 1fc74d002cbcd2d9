//! # Selection Loop
//!
//! Walks the effort curve one slot at a time and commits at most one track
//! per slot:
//!
//! ```text
//! filter available → score → relax if empty → skip if still empty
//!   → top-K → weighted draw → capacity check → playability check → commit
//! ```
//!
//! Slots are strictly sequential: spacing, diversity and rediscovery bonuses
//! for slot N read the counters committed by slots 0..N. The only awaits are
//! playability oracle calls, and each slot is settled before the next one
//! starts. All randomness comes from the injected `R: Rng`.
//!
//! Once the planned slots are done, Easy cool-down slots are appended while
//! the playlist is still shorter than the lower duration bound and the pool
//! can still fill them.

use crate::algorithm::{rank, Gate, RunState, ScoreBreakdown, Scored, ScoringContext};
use crate::config::GeneratorConfig;
use crate::curve::{minutes_to_seconds, Segment, Slot, Template};
use crate::events::{EventLog, GenerationEvent, RelaxStep};
use crate::library::UsageHistory;
use crate::oracle::{self, PlayabilityOracle, Verdict};
use crate::pool::Candidate;
use crate::relax::{PoolSet, RelaxationLadder};
use crate::tier::EffortTier;
use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;

const MIN_DRAW_WEIGHT: f64 = 0.001;

/// A committed track and how it got there.
#[derive(Debug, Clone)]
pub struct Pick {
    pub candidate: Candidate,
    pub slot: Slot,
    /// Slot tier after placement caps
    pub tier: EffortTier,
    pub breakdown: ScoreBreakdown,
    pub relaxation: Option<RelaxStep>,
    /// Replaced an unplayable first choice
    pub substituted: bool,
}

impl Pick {
    #[must_use]
    pub fn seconds(&self) -> u64 {
        self.candidate.track.duration_seconds()
    }

    #[must_use]
    pub fn track_id(&self) -> &str {
        self.candidate.id()
    }

    #[must_use]
    pub fn artist_id(&self) -> &str {
        self.candidate.artist_id()
    }
}

/// Recoverable conditions met while selecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionCounters {
    pub slots_planned: usize,
    pub slots_skipped: usize,
    pub extension_slots: usize,
    pub swapped: usize,
    pub removed: usize,
    pub oracle_timeouts: usize,
    pub over_capacity: usize,
    pub max_downgrades: usize,
    pub hard_downgrades: usize,
    pub neighbor_relax_slots: usize,
    pub lockout_breaks: usize,
}

/// Result of one pass over the curve.
#[derive(Debug)]
pub struct Selection {
    pub picks: Vec<Pick>,
    pub total_seconds: u64,
    pub counters: SelectionCounters,
    pub log: EventLog,
}

/// Fixed inputs of a selection pass.
pub struct SelectionInputs<'a> {
    pub config: &'a GeneratorConfig,
    pub template: Template,
    pub pools: &'a PoolSet<'a>,
    pub history: &'a UsageHistory,
    pub target_umbrellas: &'a [String],
    pub oracle: &'a dyn PlayabilityOracle,
    pub now: DateTime<Utc>,
    /// Inclusive duration window in seconds
    pub bounds: (u64, u64),
}

/// Per-slot filter: not chosen yet, under the artist cap, not the previous
/// artist, outside the cross-run artist cooldown.
struct Availability<'s> {
    chosen: &'s HashSet<String>,
    unplayable: &'s HashSet<String>,
    run: &'s RunState,
    previous_artist: Option<&'s str>,
    history: &'s UsageHistory,
    now: DateTime<Utc>,
    artist_cap: usize,
    cooldown_days: Option<f64>,
}

impl Availability<'_> {
    fn allows(&self, candidate: &Candidate) -> bool {
        if self.chosen.contains(candidate.id()) || self.unplayable.contains(candidate.id()) {
            return false;
        }
        let artist = candidate.artist_id();
        if self.run.artist_count(artist) >= self.artist_cap || self.previous_artist == Some(artist) {
            return false;
        }
        match self.cooldown_days {
            Some(cooldown) => self
                .history
                .days_since_artist(artist, self.now)
                .map_or(true, |days| days >= cooldown),
            None => true,
        }
    }
}

/// Everything committed so far in this run.
#[derive(Default)]
struct Progress {
    run: RunState,
    chosen: HashSet<String>,
    /// Rejected by the oracle earlier in this run
    unplayable: HashSet<String>,
    picks: Vec<Pick>,
    total_seconds: u64,
}

impl Progress {
    fn availability<'s>(&'s self, inputs: &'s SelectionInputs<'_>, artist_cap: usize) -> Availability<'s> {
        Availability {
            chosen: &self.chosen,
            unplayable: &self.unplayable,
            run: &self.run,
            previous_artist: self.picks.last().map(Pick::artist_id),
            history: inputs.history,
            now: inputs.now,
            artist_cap,
            cooldown_days: inputs.config.artist_cooldown_days,
        }
    }
}

/// One slot as it is being filled.
struct SlotPlan<'s> {
    slot: &'s Slot,
    tier: EffortTier,
    target_effort: f64,
    relaxation: Option<RelaxStep>,
    /// Cool-down seconds still to be held back
    reserved: u64,
}

enum Attempt {
    Committed { via_alternate: bool },
    Unplayable,
    Passed,
}

fn scoring_context<'s>(inputs: &'s SelectionInputs<'_>, run: &'s RunState, rediscovery_goal: f64) -> ScoringContext<'s> {
    ScoringContext {
        config: &inputs.config.scoring,
        now: inputs.now,
        lockout_days: inputs.config.lockout_days,
        history: inputs.history,
        run,
        target_umbrellas: inputs.target_umbrellas,
        rediscovery_goal,
    }
}

pub struct SelectionLoop<'a, R: Rng> {
    inputs: SelectionInputs<'a>,
    rng: R,
    ladder: RelaxationLadder<'a>,
    progress: Progress,
    rediscovery_goal: f64,
    max_placed: usize,
    hard_placed: usize,
    counters: SelectionCounters,
    log: EventLog,
}

impl<'a, R: Rng> SelectionLoop<'a, R> {
    pub fn new(inputs: SelectionInputs<'a>, rng: R, log: EventLog) -> Self {
        let config: &'a GeneratorConfig = inputs.config;
        let ladder = RelaxationLadder::new(&config.relaxation);
        Self {
            inputs,
            rng,
            ladder,
            progress: Progress::default(),
            rediscovery_goal: 0.0,
            max_placed: 0,
            hard_placed: 0,
            counters: SelectionCounters::default(),
            log,
        }
    }

    /// Process every slot of `curve`, then extend the tail if short.
    pub async fn run(mut self, curve: &[Slot]) -> Selection {
        #[allow(clippy::cast_precision_loss)]
        let planned = curve.len() as f64;
        self.rediscovery_goal = self.inputs.config.rediscovery_target * planned;
        self.counters.slots_planned = curve.len();

        for (position, slot) in curve.iter().enumerate() {
            let reserved = self.reserved_cooldown_seconds(&curve[position + 1..]);
            self.fill_slot(slot, reserved).await;
        }

        self.extend_tail(curve.len()).await;

        self.counters.neighbor_relax_slots = self.ladder.neighbor_slots_used();
        self.counters.lockout_breaks = self.ladder.lockout_breaks_used();
        info!(
            "Selected {} tracks ({}s) from {} planned slots, {} skipped",
            self.progress.picks.len(),
            self.progress.total_seconds,
            self.counters.slots_planned,
            self.counters.slots_skipped
        );

        Selection {
            picks: self.progress.picks,
            total_seconds: self.progress.total_seconds,
            counters: self.counters,
            log: self.log,
        }
    }

    /// Space held back for cool-down slots that are still to come.
    fn reserved_cooldown_seconds(&self, rest: &[Slot]) -> u64 {
        let pending = rest.iter().filter(|s| s.segment == Segment::Cooldown).count() as u64;
        pending * minutes_to_seconds(self.inputs.config.minutes_per_slot)
    }

    /// Runs until the lower bound is met, a slot cannot be filled, or the
    /// optional extension cap is spent.
    async fn extend_tail(&mut self, first_index: usize) {
        let (lower, _) = self.inputs.bounds;
        let cap = self.inputs.config.max_extension_slots.unwrap_or(usize::MAX);
        let mut index = first_index;
        while self.progress.total_seconds < lower && self.counters.extension_slots < cap {
            self.log.push(GenerationEvent::ExtensionSlot {
                slot: index,
                total_seconds: self.progress.total_seconds,
                min_seconds: lower,
            });
            self.counters.extension_slots += 1;
            let slot = Slot::new(index, EffortTier::Easy, Segment::Cooldown);
            if !self.fill_slot(&slot, 0).await {
                debug!("Tail extension stopped at slot {index}: nothing left to place");
                break;
            }
            index += 1;
        }
    }

    /// Demote a tier whose placement cap is spent.
    fn effective_tier(&mut self, slot: &Slot) -> EffortTier {
        let mut tier = slot.tier;
        if tier == EffortTier::Max && self.max_placed >= 1 {
            tier = tier.step_down();
            self.counters.max_downgrades += 1;
        }
        if self.inputs.template == Template::RampToPeak
            && tier == EffortTier::Hard
            && self.hard_placed >= self.inputs.config.max_ramp_hard
        {
            tier = tier.step_down();
            self.counters.hard_downgrades += 1;
        }
        if tier != slot.tier {
            self.log.push(GenerationEvent::TierCapped {
                slot: slot.index,
                planned: slot.tier,
                effective: tier,
            });
        }
        tier
    }

    fn artist_cap(&self) -> usize {
        if self.inputs.template == Template::SteadyLow {
            self.inputs.config.steady_low_artist_cap
        } else {
            self.inputs.config.artist_cap
        }
    }

    fn top_k(&self, tier: EffortTier) -> usize {
        match tier {
            EffortTier::Easy => self.inputs.config.top_k_easy,
            EffortTier::Moderate => self.inputs.config.top_k_moderate,
            _ => self.inputs.config.top_k_other,
        }
    }

    /// Ranked candidates for a slot, from the primary gate or the ladder.
    /// Empty when the slot cannot be filled.
    fn shortlist(&mut self, plan: &mut SlotPlan<'_>) -> Vec<Scored<'a>> {
        let pools: &'a PoolSet<'a> = self.inputs.pools;
        let available = self.progress.availability(&self.inputs, self.artist_cap());
        let ctx = scoring_context(&self.inputs, &self.progress.run, self.rediscovery_goal);

        let open: Vec<&'a Candidate> = pools.primary().iter().filter(|c| available.allows(c)).collect();
        let mut scored = ctx.score_all(&open, plan.tier, plan.target_effort, Gate::TempoFit);
        self.log.push(GenerationEvent::SlotScored {
            slot: plan.slot.index,
            tier: plan.tier,
            available: open.len(),
            viable: scored.len(),
        });

        if scored.is_empty() {
            let allows = |c: &Candidate| available.allows(c);
            if let Some(relaxed) = self.ladder.relax(
                plan.slot.index,
                plan.tier,
                plan.target_effort,
                pools,
                &allows,
                &ctx,
                &mut self.log,
            ) {
                plan.relaxation = Some(relaxed.step);
                scored = relaxed.scored;
            }
        }

        rank(&mut scored);
        scored
    }

    /// Try to place one track. Returns whether a track was committed.
    async fn fill_slot(&mut self, slot: &Slot, reserved: u64) -> bool {
        let tier = self.effective_tier(slot);
        let mut plan = SlotPlan {
            slot,
            tier,
            target_effort: slot_target(slot, tier),
            relaxation: None,
            reserved,
        };

        let ranked = self.shortlist(&mut plan);
        if ranked.is_empty() {
            self.skip(&plan);
            return false;
        }

        let k = self.top_k(tier).clamp(1, ranked.len());
        let weights: Vec<f64> = ranked[..k].iter().map(|s| s.score().max(MIN_DRAW_WEIGHT)).collect();
        let drawn = WeightedIndex::new(&weights).map_or(0, |dist| dist.sample(&mut self.rng));

        let order = std::iter::once(ranked[drawn]).chain(
            ranked
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != drawn)
                .map(|(_, s)| *s),
        );

        let mut rejections = 0;
        for scored in order {
            match self.attempt(&plan, &scored, rejections > 0).await {
                Attempt::Committed { via_alternate } => {
                    if via_alternate || rejections > 0 {
                        self.counters.swapped += 1;
                    }
                    return true;
                }
                Attempt::Unplayable => {
                    rejections += 1;
                    if rejections >= k {
                        break;
                    }
                }
                Attempt::Passed => {}
            }
        }

        if rejections > 0 {
            self.counters.removed += 1;
        }
        self.skip(&plan);
        false
    }

    fn skip(&mut self, plan: &SlotPlan<'_>) {
        self.counters.slots_skipped += 1;
        self.log.push(GenerationEvent::SlotSkipped {
            slot: plan.slot.index,
            tier: plan.tier,
        });
    }

    fn remaining(&self, reserved: u64) -> u64 {
        self.inputs
            .bounds
            .1
            .saturating_sub(self.progress.total_seconds)
            .saturating_sub(reserved)
    }

    async fn attempt(&mut self, plan: &SlotPlan<'_>, scored: &Scored<'a>, after_rejection: bool) -> Attempt {
        let candidate = scored.candidate;
        let seconds = candidate.track.duration_seconds();
        let remaining = self.remaining(plan.reserved);
        if seconds > remaining {
            self.counters.over_capacity += 1;
            self.log.push(GenerationEvent::OverCapacity {
                slot: plan.slot.index,
                track_id: candidate.id().to_string(),
                seconds,
                remaining,
            });
            return Attempt::Passed;
        }

        let timeout = Duration::from_millis(self.inputs.config.oracle_timeout_ms);
        match oracle::check(self.inputs.oracle, candidate.id(), timeout).await {
            Verdict::Playable => {}
            Verdict::Unknown => {
                self.counters.oracle_timeouts += 1;
                self.log.push(GenerationEvent::OracleTimeout {
                    slot: plan.slot.index,
                    track_id: candidate.id().to_string(),
                });
            }
            Verdict::Unplayable => {
                self.progress.unplayable.insert(candidate.id().to_string());
                self.log.push(GenerationEvent::TrackUnplayable {
                    slot: plan.slot.index,
                    track_id: candidate.id().to_string(),
                });
                return match self.alternate_for(plan, scored, timeout).await {
                    Some(replacement) => {
                        self.log.push(GenerationEvent::TrackSubstituted {
                            slot: plan.slot.index,
                            rejected: candidate.id().to_string(),
                            replacement: replacement.candidate.id().to_string(),
                        });
                        self.commit(plan, &replacement, true);
                        Attempt::Committed { via_alternate: true }
                    }
                    None => Attempt::Unplayable,
                };
            }
        }

        self.commit(plan, scored, after_rejection);
        Attempt::Committed { via_alternate: false }
    }

    /// The oracle's own stand-in, if it is an open candidate that fits.
    async fn alternate_for(&mut self, plan: &SlotPlan<'_>, rejected: &Scored<'a>, timeout: Duration) -> Option<Scored<'a>> {
        let alternate_id = oracle::alternate(self.inputs.oracle, rejected.candidate.id(), timeout).await?;
        let pools: &'a PoolSet<'a> = self.inputs.pools;
        let candidate: &'a Candidate = pools.primary().iter().find(|c| c.id() == alternate_id)?;
        let usable = self.progress.availability(&self.inputs, self.artist_cap()).allows(candidate);
        if !usable || candidate.track.duration_seconds() > self.remaining(plan.reserved) {
            debug!("Alternate {alternate_id} for {} is not usable here", rejected.candidate.id());
            return None;
        }

        let tier = rejected.breakdown.tier;
        let ctx = scoring_context(&self.inputs, &self.progress.run, self.rediscovery_goal);
        let breakdown = ctx
            .score(candidate, tier, slot_target(plan.slot, tier), Gate::SlotFit(0.0))
            .unwrap_or(rejected.breakdown);
        Some(Scored { candidate, breakdown })
    }

    fn commit(&mut self, plan: &SlotPlan<'_>, scored: &Scored<'a>, substituted: bool) {
        let candidate = scored.candidate;

        match scored.breakdown.tier {
            EffortTier::Max => {
                self.max_placed += 1;
                self.ladder.block_tier(EffortTier::Max);
            }
            EffortTier::Hard => {
                self.hard_placed += 1;
                if self.inputs.template == Template::RampToPeak && self.hard_placed >= self.inputs.config.max_ramp_hard {
                    self.ladder.block_tier(EffortTier::Hard);
                }
            }
            _ => {}
        }

        if let Some(step) = plan.relaxation {
            self.ladder.record_use(step);
        }

        self.progress.run.record(candidate);
        self.progress.chosen.insert(candidate.id().to_string());
        self.progress.total_seconds += candidate.track.duration_seconds();

        self.log.push(GenerationEvent::TrackPicked {
            slot: plan.slot.index,
            track_id: candidate.id().to_string(),
            artist_id: candidate.artist_id().to_string(),
            tier: plan.tier,
            segment: plan.slot.segment,
            score: scored.breakdown.score,
            relaxation: plan.relaxation,
        });

        self.progress.picks.push(Pick {
            candidate: candidate.clone(),
            slot: *plan.slot,
            tier: plan.tier,
            breakdown: scored.breakdown,
            relaxation: plan.relaxation,
            substituted,
        });
    }
}

/// Target effort for scoring a slot against `tier`.
fn slot_target(slot: &Slot, tier: EffortTier) -> f64 {
    if tier == slot.tier {
        slot.target_effort
    } else {
        tier.spec().target_effort
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{build_curve_from_counts, SlotCounts};
    use crate::library::{AudioFeature, LibrarySnapshot, SourceKind, Track, UsageRecord};
    use crate::oracle::{AlwaysPlayable, RejectList};
    use crate::pool::{CandidatePoolBuilder, PoolFilters, PoolOptions};
    use crate::taxonomy::{KeywordTaxonomy, UmbrellaWeights};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const EASY: (f64, f64, f64) = (155.0, 0.55, 0.6);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn track(id: &str, artist: &str) -> Track {
        Track {
            id: id.to_string(),
            title: format!("Track {id}"),
            artist_id: artist.to_string(),
            artist_name: artist.to_string(),
            duration_ms: 240_000,
            album: String::new(),
            release_year: Some(2005),
            explicit: false,
            playable: true,
            source: SourceKind::Likes,
        }
    }

    fn feature(id: &str, (tempo, energy, dance): (f64, f64, f64)) -> AudioFeature {
        AudioFeature {
            track_id: id.to_string(),
            tempo: Some(tempo),
            energy: Some(energy),
            danceability: Some(dance),
            valence: None,
            loudness: None,
            key: None,
            mode: None,
            time_signature: None,
        }
    }

    fn used(track_id: &str, days_ago: i64) -> UsageRecord {
        UsageRecord {
            track_id: track_id.to_string(),
            last_used: now() - chrono::Duration::days(days_ago),
            use_count: 1,
        }
    }

    /// `n` tracks sharing one audio profile, distinct artists, 240 s each.
    fn uniform_library(n: usize, profile: (f64, f64, f64)) -> LibrarySnapshot {
        let ids: Vec<String> = (0..n).map(|i| format!("t{i:02}")).collect();
        LibrarySnapshot::from_parts(
            ids.iter().enumerate().map(|(i, id)| track(id, &format!("artist{i:02}"))).collect(),
            ids.iter().map(|id| feature(id, profile)).collect(),
            Vec::new(),
            Vec::new(),
        )
    }

    fn easy_library(n: usize) -> LibrarySnapshot {
        uniform_library(n, EASY)
    }

    fn options() -> PoolOptions {
        PoolOptions {
            weights: UmbrellaWeights::new(),
            enforce_lockout: true,
        }
    }

    struct Harness {
        template: Template,
        config: GeneratorConfig,
        bounds: (u64, u64),
    }

    impl Harness {
        fn new(template: Template, bounds: (u64, u64)) -> Self {
            Self {
                template,
                config: GeneratorConfig::default(),
                bounds,
            }
        }

        async fn select(&self, snapshot: &LibrarySnapshot, curve: &[Slot], oracle: &dyn PlayabilityOracle, seed: u64) -> Selection {
            let filters = PoolFilters::default();
            let history = UsageHistory::build(snapshot, now(), self.config.diversity_lookback_days, |_| None);
            let builder = CandidatePoolBuilder::new(snapshot, &KeywordTaxonomy, &self.config, &filters, now());
            let pools = PoolSet::new(&builder, builder.build(&options()), options(), false, None);
            let inputs = SelectionInputs {
                config: &self.config,
                template: self.template,
                pools: &pools,
                history: &history,
                target_umbrellas: &[],
                oracle,
                now: now(),
                bounds: self.bounds,
            };
            SelectionLoop::new(inputs, StdRng::seed_from_u64(seed), EventLog::new())
                .run(curve)
                .await
        }
    }

    async fn select(
        snapshot: &LibrarySnapshot,
        curve: &[Slot],
        bounds: (u64, u64),
        oracle: &dyn PlayabilityOracle,
        seed: u64,
    ) -> Selection {
        Harness::new(Template::SteadyLow, bounds).select(snapshot, curve, oracle, seed).await
    }

    fn easy_curve(n: usize) -> Vec<Slot> {
        build_curve_from_counts(Template::SteadyLow, SlotCounts { warmup: 1, core: n.saturating_sub(2).max(1), cooldown: 1 })
    }

    fn tier_capped(selection: &Selection) -> Vec<(usize, EffortTier, EffortTier)> {
        selection
            .log
            .events()
            .iter()
            .filter_map(|e| match e {
                GenerationEvent::TierCapped { slot, planned, effective } => Some((*slot, *planned, *effective)),
                _ => None,
            })
            .collect()
    }

    struct Stalled;

    #[async_trait]
    impl PlayabilityOracle for Stalled {
        async fn is_playable(&self, _track_id: &str) -> anyhow::Result<bool> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_fills_every_slot_with_distinct_artists() {
        let snapshot = easy_library(20);
        let curve = easy_curve(5);
        let selection = select(&snapshot, &curve, (0, 10_000), &AlwaysPlayable, 7).await;

        assert_eq!(selection.picks.len(), curve.len());
        assert_eq!(selection.total_seconds, 240 * curve.len() as u64);
        let artists: HashSet<&str> = selection.picks.iter().map(Pick::artist_id).collect();
        assert_eq!(artists.len(), selection.picks.len(), "steady-low caps each artist at one track");
    }

    #[tokio::test]
    async fn test_capacity_reserves_cooldown_space() {
        let snapshot = easy_library(20);
        let curve = easy_curve(5);
        // Room for four tracks; the last cool-down slot keeps its share
        let selection = select(&snapshot, &curve, (0, 960), &AlwaysPlayable, 7).await;

        assert_eq!(selection.total_seconds, 960);
        let last = selection.picks.last().expect("picks");
        assert_eq!(last.slot.segment, Segment::Cooldown);
        assert!(selection.counters.slots_skipped >= 1);
        assert!(selection.counters.over_capacity >= 1);
    }

    #[tokio::test]
    async fn test_unplayable_draws_are_swapped() {
        let snapshot = easy_library(3);
        let curve = easy_curve(3);
        let oracle = RejectList::new(["t00", "t01"]);
        let selection = select(&snapshot, &curve, (0, 10_000), &oracle, 1).await;

        assert_eq!(selection.picks.len(), 1);
        assert_eq!(selection.picks[0].track_id(), "t02");
        assert!(selection.counters.swapped + selection.counters.removed >= 1);
        assert!(selection
            .log
            .events()
            .iter()
            .any(|e| matches!(e, GenerationEvent::TrackUnplayable { .. })));
    }

    #[tokio::test]
    async fn test_oracle_alternate_is_used() {
        let snapshot = easy_library(2);
        let curve = vec![Slot::new(0, EffortTier::Easy, Segment::Warmup)];
        let oracle = RejectList::new(["t00", "t01"]).with_alternate("t00", "t01").with_alternate("t01", "t00");
        let selection = select(&snapshot, &curve, (0, 10_000), &oracle, 3).await;

        assert_eq!(selection.picks.len(), 1);
        assert!(selection.picks[0].substituted);
        assert_eq!(selection.counters.swapped, 1);
    }

    #[tokio::test]
    async fn test_stalled_oracle_keeps_tracks() {
        let snapshot = easy_library(6);
        let curve = easy_curve(3);
        let mut harness = Harness::new(Template::SteadyLow, (0, 10_000));
        harness.config.oracle_timeout_ms = 20;
        let selection = harness.select(&snapshot, &curve, &Stalled, 5).await;

        assert_eq!(selection.picks.len(), 3);
        assert_eq!(selection.counters.oracle_timeouts, 3);
        assert_eq!(selection.counters.removed, 0);
        let timeouts = selection
            .log
            .events()
            .iter()
            .filter(|e| matches!(e, GenerationEvent::OracleTimeout { .. }))
            .count();
        assert_eq!(timeouts, 3);
        assert!(!selection
            .log
            .events()
            .iter()
            .any(|e| matches!(e, GenerationEvent::TrackUnplayable { .. })));
    }

    #[tokio::test]
    async fn test_tail_extension_reaches_lower_bound() {
        let snapshot = easy_library(20);
        let curve = easy_curve(3);
        let selection = select(&snapshot, &curve, (1_400, 1_700), &AlwaysPlayable, 11).await;

        assert!(selection.total_seconds >= 1_400);
        assert!(selection.counters.extension_slots >= 1);
        assert!(selection.picks[3..].iter().all(|p| p.slot.segment == Segment::Cooldown));
    }

    #[tokio::test]
    async fn test_tail_extension_uses_deep_pool_after_many_skips() {
        // Low-energy 150 BPM tracks fit Easy slots only, so every Hard and
        // Max slot of the alternation is skipped
        let snapshot = uniform_library(100, (150.0, 0.3, 0.3));
        let curve = build_curve_from_counts(Template::StrictAlternation, SlotCounts { warmup: 1, core: 30, cooldown: 1 });
        let selection = Harness::new(Template::StrictAlternation, (7_560, 7_800))
            .select(&snapshot, &curve, &AlwaysPlayable, 9)
            .await;

        assert_eq!(selection.counters.slots_skipped, 15);
        assert!(selection.total_seconds >= 7_560, "stopped at {}s", selection.total_seconds);
        assert!(selection.total_seconds <= 7_800);
        assert_eq!(selection.picks.len(), 32);
        assert_eq!(selection.counters.extension_slots, 15);
    }

    #[tokio::test]
    async fn test_extension_cap_still_configurable() {
        let snapshot = uniform_library(100, (150.0, 0.3, 0.3));
        let curve = build_curve_from_counts(Template::StrictAlternation, SlotCounts { warmup: 1, core: 30, cooldown: 1 });
        let mut harness = Harness::new(Template::StrictAlternation, (7_560, 7_800));
        harness.config.max_extension_slots = Some(4);
        let selection = harness.select(&snapshot, &curve, &AlwaysPlayable, 9).await;

        assert_eq!(selection.counters.extension_slots, 4);
        assert_eq!(selection.picks.len(), 21);
    }

    #[tokio::test]
    async fn test_second_max_is_downgraded() {
        let snapshot = uniform_library(6, (184.0, 0.9, 0.6));
        let curve = vec![
            Slot::new(0, EffortTier::Max, Segment::Main),
            Slot::new(1, EffortTier::Max, Segment::Main),
        ];
        let selection = Harness::new(Template::Pyramid, (0, 10_000))
            .select(&snapshot, &curve, &AlwaysPlayable, 2)
            .await;

        assert_eq!(selection.picks.len(), 2);
        assert_eq!(selection.picks[0].tier, EffortTier::Max);
        assert_eq!(selection.picks[1].tier, EffortTier::Hard);
        assert_eq!(selection.picks[1].breakdown.tier, EffortTier::Hard);
        assert_eq!(selection.counters.max_downgrades, 1);
        assert_eq!(tier_capped(&selection), vec![(1, EffortTier::Max, EffortTier::Hard)]);
    }

    #[tokio::test]
    async fn test_ramp_hard_cap_counts_relaxed_hard() {
        // 186 BPM misses the Strong window; the track only reaches a Strong
        // slot by being rescored as Hard
        let snapshot = uniform_library(6, (186.0, 0.7, 0.0));
        let curve = vec![
            Slot::new(0, EffortTier::Strong, Segment::Main),
            Slot::new(1, EffortTier::Hard, Segment::Main),
            Slot::new(2, EffortTier::Hard, Segment::Main),
        ];
        let selection = Harness::new(Template::RampToPeak, (0, 10_000))
            .select(&snapshot, &curve, &AlwaysPlayable, 4)
            .await;

        assert_eq!(selection.picks.len(), 3);
        assert_eq!(selection.picks[0].relaxation, Some(RelaxStep::AdjacentTier));
        assert_eq!(selection.picks[0].breakdown.tier, EffortTier::Hard);
        assert_eq!(selection.picks[1].breakdown.tier, EffortTier::Hard);

        let hard = selection.picks.iter().filter(|p| p.breakdown.tier == EffortTier::Hard).count();
        assert_eq!(hard, 2);
        assert_eq!(selection.picks[2].tier, EffortTier::Strong);
        assert_eq!(selection.counters.hard_downgrades, 1);
        assert_eq!(selection.counters.max_downgrades, 0);
        assert_eq!(tier_capped(&selection), vec![(2, EffortTier::Hard, EffortTier::Strong)]);
    }

    #[tokio::test]
    async fn test_artist_cooldown_spans_runs() {
        let curve = vec![Slot::new(0, EffortTier::Easy, Segment::Warmup)];
        let snapshot = LibrarySnapshot::from_parts(
            vec![track("a_old", "a"), track("a_new", "a"), track("b_old", "b"), track("b_new", "b")],
            ["a_old", "a_new", "b_old", "b_new"].iter().map(|id| feature(id, EASY)).collect(),
            Vec::new(),
            vec![used("a_old", 2), used("b_old", 4)],
        );
        for seed in 0..8 {
            let selection = select(&snapshot, &curve, (0, 10_000), &AlwaysPlayable, seed).await;
            assert_eq!(selection.picks.len(), 1);
            assert_eq!(selection.picks[0].track_id(), "b_new");
        }
    }

    #[tokio::test]
    async fn test_artist_cooldown_can_leave_slot_empty() {
        let curve = vec![Slot::new(0, EffortTier::Easy, Segment::Warmup)];
        let snapshot = LibrarySnapshot::from_parts(
            vec![track("a_old", "a"), track("a_new", "a")],
            vec![feature("a_old", EASY), feature("a_new", EASY)],
            Vec::new(),
            vec![used("a_old", 2)],
        );

        let blocked = select(&snapshot, &curve, (0, 10_000), &AlwaysPlayable, 1).await;
        assert!(blocked.picks.is_empty());
        assert_eq!(blocked.counters.slots_skipped, 1);

        let mut harness = Harness::new(Template::SteadyLow, (0, 10_000));
        harness.config.artist_cooldown_days = None;
        let open = harness.select(&snapshot, &curve, &AlwaysPlayable, 1).await;
        assert_eq!(open.picks.len(), 1);
        assert_eq!(open.picks[0].track_id(), "a_new");
    }

    #[tokio::test]
    async fn test_lockout_break_not_spent_when_over_capacity() {
        // The only Hard track is locked out; the first Hard slot has to hold
        // space for the later cool-down-tagged slot and cannot take it
        let snapshot = LibrarySnapshot::from_parts(
            vec![track("locked", "a")],
            vec![feature("locked", (177.0, 0.85, 0.6))],
            Vec::new(),
            vec![used("locked", 5)],
        );
        let curve = vec![
            Slot::new(0, EffortTier::Hard, Segment::Main),
            Slot::new(1, EffortTier::Hard, Segment::Cooldown),
        ];
        let selection = Harness::new(Template::SteadySustained, (0, 400))
            .select(&snapshot, &curve, &AlwaysPlayable, 6)
            .await;

        assert_eq!(selection.counters.over_capacity, 1);
        assert_eq!(selection.counters.slots_skipped, 1);
        assert_eq!(selection.picks.len(), 1);
        assert_eq!(selection.picks[0].slot.index, 1);
        assert_eq!(selection.picks[0].relaxation, Some(RelaxStep::LockoutBreak));
        assert_eq!(selection.counters.lockout_breaks, 1);
    }

    #[tokio::test]
    async fn test_same_seed_same_selection() {
        let snapshot = easy_library(30);
        let curve = easy_curve(8);
        let a = select(&snapshot, &curve, (0, 10_000), &AlwaysPlayable, 42).await;
        let b = select(&snapshot, &curve, (0, 10_000), &AlwaysPlayable, 42).await;
        let ids = |s: &Selection| s.picks.iter().map(|p| p.track_id().to_string()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }
}
