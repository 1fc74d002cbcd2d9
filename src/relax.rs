//! # Relaxation Ladder
//!
//! When nothing survives the primary gate for a slot, the ladder loosens one
//! constraint at a time, in a fixed order, and stops at the first rung that
//! produces a candidate:
//!
//! 1. score against the adjacent tier (slotFit ≥ 0.70)
//! 2. score against the tier two steps away (slotFit ≥ 0.65)
//! 3. admit neighbor-umbrella genres (slotFit ≥ 0.60, at most 2 slots)
//! 4. admit tracks inside the lockout window (slotFit ≥ 0.55, once)
//!
//! Rungs 3 and 4 need pools the generator did not build up front; [`PoolSet`]
//! builds them the first time they are asked for.

use crate::algorithm::{Gate, Scored, ScoringContext};
use crate::config::RelaxationConfig;
use crate::events::{EventLog, GenerationEvent, RelaxOutcome, RelaxStep};
use crate::pool::{Candidate, CandidatePoolBuilder, PoolOptions};
use crate::taxonomy::UmbrellaWeights;
use crate::tier::EffortTier;
use log::debug;
use std::cell::OnceCell;
use std::collections::HashSet;

/// The primary pool plus the lazily built relaxation pools.
pub struct PoolSet<'a> {
    builder: &'a CandidatePoolBuilder<'a>,
    primary: Vec<Candidate>,
    primary_ids: HashSet<String>,
    primary_options: PoolOptions,
    /// Primary pool already uses neighbor weights
    broadened: bool,
    /// Weights for rung 3, `None` when it cannot widen anything
    neighbor_weights: Option<UmbrellaWeights>,
    neighbor: OnceCell<Vec<Candidate>>,
    lockout_break: OnceCell<Vec<Candidate>>,
}

impl<'a> PoolSet<'a> {
    #[must_use]
    pub fn new(
        builder: &'a CandidatePoolBuilder<'a>,
        primary: Vec<Candidate>,
        primary_options: PoolOptions,
        broadened: bool,
        neighbor_weights: Option<UmbrellaWeights>,
    ) -> Self {
        let primary_ids = primary.iter().map(|c| c.id().to_string()).collect();
        Self {
            builder,
            primary,
            primary_ids,
            primary_options,
            broadened,
            neighbor_weights,
            neighbor: OnceCell::new(),
            lockout_break: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn primary(&self) -> &[Candidate] {
        &self.primary
    }

    /// Neighbor-genre candidates that the primary pool did not already hold.
    fn neighbor(&self, log: &mut EventLog) -> Option<&[Candidate]> {
        let weights = self.neighbor_weights.as_ref()?;
        let pool = self.neighbor.get_or_init(|| {
            let options = PoolOptions {
                weights: weights.clone(),
                enforce_lockout: self.primary_options.enforce_lockout,
            };
            let pool: Vec<Candidate> = self
                .builder
                .build(&options)
                .into_iter()
                .filter(|c| !self.primary_ids.contains(c.id()))
                .collect();
            log.push(GenerationEvent::PoolBuilt {
                size: pool.len(),
                neighbor_weights: true,
                lockout_enforced: options.enforce_lockout,
            });
            pool
        });
        Some(pool)
    }

    /// Primary-filter candidates that only the lockout kept out.
    fn lockout_break(&self, log: &mut EventLog) -> &[Candidate] {
        self.lockout_break.get_or_init(|| {
            let options = PoolOptions {
                weights: self.primary_options.weights.clone(),
                enforce_lockout: false,
            };
            let pool: Vec<Candidate> = self
                .builder
                .build(&options)
                .into_iter()
                .filter(|c| c.within_lockout)
                .collect();
            log.push(GenerationEvent::PoolBuilt {
                size: pool.len(),
                neighbor_weights: self.broadened,
                lockout_enforced: false,
            });
            pool
        })
    }
}

/// Candidates found by one rung.
#[derive(Debug)]
pub struct Relaxed<'p> {
    pub step: RelaxStep,
    pub scored: Vec<Scored<'p>>,
}

/// Per-run ladder state; owns the usage caps of rungs 3 and 4.
#[derive(Debug)]
pub struct RelaxationLadder<'c> {
    config: &'c RelaxationConfig,
    neighbor_slots_used: usize,
    lockout_breaks_used: usize,
    /// Tiers whose placement cap is spent
    blocked: Vec<EffortTier>,
}

impl<'c> RelaxationLadder<'c> {
    #[must_use]
    pub fn new(config: &'c RelaxationConfig) -> Self {
        Self {
            config,
            neighbor_slots_used: 0,
            lockout_breaks_used: 0,
            blocked: Vec::new(),
        }
    }

    /// Stop rungs 1 and 2 from rescoring against `tier`.
    pub fn block_tier(&mut self, tier: EffortTier) {
        if !self.blocked.contains(&tier) {
            self.blocked.push(tier);
        }
    }

    #[must_use]
    pub fn neighbor_slots_used(&self) -> usize {
        self.neighbor_slots_used
    }

    #[must_use]
    pub fn lockout_breaks_used(&self) -> usize {
        self.lockout_breaks_used
    }

    /// Charge a committed track against the cap of the rung that found it.
    pub fn record_use(&mut self, step: RelaxStep) {
        match step {
            RelaxStep::NeighborGenres => self.neighbor_slots_used += 1,
            RelaxStep::LockoutBreak => self.lockout_breaks_used += 1,
            RelaxStep::AdjacentTier | RelaxStep::SecondTier => {}
        }
    }

    /// Walk the rungs for one slot. `available` applies the selection
    /// loop's per-slot filters (already chosen, artist cap and adjacency).
    /// Finding candidates spends nothing; see [`Self::record_use`].
    #[allow(clippy::too_many_arguments)]
    pub fn relax<'p>(
        &mut self,
        slot: usize,
        tier: EffortTier,
        target_effort: f64,
        pools: &'p PoolSet<'_>,
        available: &dyn Fn(&Candidate) -> bool,
        ctx: &ScoringContext<'_>,
        log: &mut EventLog,
    ) -> Option<Relaxed<'p>> {
        for step in RelaxStep::ORDER {
            let (outcome, scored) = self.try_step(step, tier, target_effort, pools, available, ctx, log);
            log.push(GenerationEvent::RelaxationTried { slot, step, outcome });
            if let RelaxOutcome::Found(_) = outcome {
                debug!("Slot {slot} relaxed at step {}", step.number());
                return Some(Relaxed { step, scored });
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn try_step<'p>(
        &self,
        step: RelaxStep,
        tier: EffortTier,
        target_effort: f64,
        pools: &'p PoolSet<'_>,
        available: &dyn Fn(&Candidate) -> bool,
        ctx: &ScoringContext<'_>,
        log: &mut EventLog,
    ) -> (RelaxOutcome, Vec<Scored<'p>>) {
        let scored = match step {
            RelaxStep::AdjacentTier | RelaxStep::SecondTier => {
                let (distance, min_fit) = if step == RelaxStep::AdjacentTier {
                    (1, self.config.adjacent_tier_min_fit)
                } else {
                    (2, self.config.second_tier_min_fit)
                };
                let open: Vec<&Candidate> = pools.primary().iter().filter(|c| available(c)).collect();
                tier.neighbors(distance)
                    .into_iter()
                    .filter(|other| !self.blocked.contains(other))
                    .flat_map(|other| ctx.score_all(&open, other, other.spec().target_effort, Gate::SlotFit(min_fit)))
                    .collect()
            }
            RelaxStep::NeighborGenres => {
                if self.neighbor_slots_used >= self.config.max_neighbor_slots {
                    return (RelaxOutcome::CapReached, Vec::new());
                }
                let Some(pool) = pools.neighbor(log) else {
                    return (RelaxOutcome::NotApplicable, Vec::new());
                };
                let open: Vec<&Candidate> = pool.iter().filter(|c| available(c)).collect();
                ctx.score_all(&open, tier, target_effort, Gate::SlotFit(self.config.neighbor_genre_min_fit))
            }
            RelaxStep::LockoutBreak => {
                if self.lockout_breaks_used >= self.config.max_lockout_breaks {
                    return (RelaxOutcome::CapReached, Vec::new());
                }
                let pool = pools.lockout_break(log);
                let open: Vec<&Candidate> = pool.iter().filter(|c| available(c)).collect();
                ctx.score_all(&open, tier, target_effort, Gate::SlotFit(self.config.lockout_break_min_fit))
            }
        };

        if scored.is_empty() {
            (RelaxOutcome::Empty, scored)
        } else {
            (RelaxOutcome::Found(scored.len()), scored)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::RunState;
    use crate::config::{GeneratorConfig, ScoringConfig};
    use crate::library::{AudioFeature, LibrarySnapshot, SourceKind, Track, UsageHistory, UsageRecord};
    use crate::pool::PoolFilters;
    use crate::taxonomy::KeywordTaxonomy;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn track(id: &str, artist: &str) -> Track {
        Track {
            id: id.to_string(),
            title: id.to_string(),
            artist_id: artist.to_string(),
            artist_name: artist.to_string(),
            duration_ms: 240_000,
            album: String::new(),
            release_year: Some(2010),
            explicit: false,
            playable: true,
            source: SourceKind::Likes,
        }
    }

    fn feature(id: &str, tempo: f64, energy: f64, dance: f64) -> AudioFeature {
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

    struct Fixture {
        snapshot: LibrarySnapshot,
        config: GeneratorConfig,
        scoring: ScoringConfig,
        filters: PoolFilters,
        history: UsageHistory,
        run: RunState,
    }

    impl Fixture {
        /// One Strong-window track (misses a Hard gate) and one Hard track
        /// locked out by recent use.
        fn new() -> Self {
            let snapshot = LibrarySnapshot::from_parts(
                vec![track("strong", "a"), track("locked", "b")],
                vec![feature("strong", 168.0, 0.75, 0.6), feature("locked", 176.0, 0.85, 0.6)],
                Vec::new(),
                vec![UsageRecord {
                    track_id: "locked".to_string(),
                    last_used: now() - Duration::days(2),
                    use_count: 1,
                }],
            );
            Self {
                snapshot,
                config: GeneratorConfig::default(),
                scoring: ScoringConfig::default(),
                filters: PoolFilters::default(),
                history: UsageHistory::default(),
                run: RunState::default(),
            }
        }

        fn ctx(&self) -> ScoringContext<'_> {
            ScoringContext {
                config: &self.scoring,
                now: now(),
                lockout_days: 10.0,
                history: &self.history,
                run: &self.run,
                target_umbrellas: &[],
                rediscovery_goal: 0.0,
            }
        }
    }

    fn options() -> PoolOptions {
        PoolOptions {
            weights: UmbrellaWeights::new(),
            enforce_lockout: true,
        }
    }

    #[test]
    fn test_adjacent_tier_found_first() {
        let fx = Fixture::new();
        let builder = CandidatePoolBuilder::new(&fx.snapshot, &KeywordTaxonomy, &fx.config, &fx.filters, now());
        let pools = PoolSet::new(&builder, builder.build(&options()), options(), false, None);
        let mut ladder = RelaxationLadder::new(&fx.config.relaxation);
        let mut log = EventLog::new();

        let ctx = fx.ctx();
        let any = |_: &Candidate| true;
        let relaxed = ladder
            .relax(0, EffortTier::Max, EffortTier::Max.spec().target_effort, &pools, &any, &ctx, &mut log)
            .expect("hard neighbor should rescue the slot");
        assert_eq!(relaxed.step, RelaxStep::AdjacentTier);
        assert_eq!(relaxed.scored[0].breakdown.tier, EffortTier::Hard);
        assert_eq!(log.relaxations().len(), 1);
    }

    #[test]
    fn test_steps_run_in_order_and_lockout_break_once() {
        let fx = Fixture::new();
        let builder = CandidatePoolBuilder::new(&fx.snapshot, &KeywordTaxonomy, &fx.config, &fx.filters, now());
        let pools = PoolSet::new(&builder, builder.build(&options()), options(), false, None);
        let mut ladder = RelaxationLadder::new(&fx.config.relaxation);
        let mut log = EventLog::new();
        let ctx = fx.ctx();

        // The only primary track is unavailable, so only the locked track helps
        let not_strong = |c: &Candidate| c.id() != "strong";
        let first = ladder
            .relax(3, EffortTier::Hard, 0.82, &pools, &not_strong, &ctx, &mut log)
            .expect("lockout break rescues the first slot");
        assert_eq!(first.step, RelaxStep::LockoutBreak);
        assert_eq!(first.scored[0].candidate.id(), "locked");
        assert_eq!(ladder.lockout_breaks_used(), 0);
        ladder.record_use(first.step);

        assert!(ladder
            .relax(4, EffortTier::Hard, 0.82, &pools, &not_strong, &ctx, &mut log)
            .is_none());
        assert_eq!(ladder.lockout_breaks_used(), 1);

        let steps: Vec<(usize, RelaxStep, RelaxOutcome)> = log.relaxations();
        let slot3: Vec<RelaxStep> = steps.iter().filter(|s| s.0 == 3).map(|s| s.1).collect();
        assert_eq!(slot3, RelaxStep::ORDER.to_vec());
        assert_eq!(steps[2].2, RelaxOutcome::NotApplicable);
        assert_eq!(steps.last().unwrap().2, RelaxOutcome::CapReached);
        let fired = steps
            .iter()
            .filter(|s| s.1 == RelaxStep::LockoutBreak && matches!(s.2, RelaxOutcome::Found(_)))
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_found_without_commit_keeps_cap() {
        let fx = Fixture::new();
        let builder = CandidatePoolBuilder::new(&fx.snapshot, &KeywordTaxonomy, &fx.config, &fx.filters, now());
        let pools = PoolSet::new(&builder, builder.build(&options()), options(), false, None);
        let mut ladder = RelaxationLadder::new(&fx.config.relaxation);
        let mut log = EventLog::new();
        let ctx = fx.ctx();
        let not_strong = |c: &Candidate| c.id() != "strong";

        for slot in 0..3 {
            let relaxed = ladder
                .relax(slot, EffortTier::Hard, 0.82, &pools, &not_strong, &ctx, &mut log)
                .expect("lockout break stays open until a track is placed");
            assert_eq!(relaxed.step, RelaxStep::LockoutBreak);
        }
        assert_eq!(ladder.lockout_breaks_used(), 0);

        ladder.record_use(RelaxStep::AdjacentTier);
        assert_eq!(ladder.lockout_breaks_used(), 0);
        assert_eq!(ladder.neighbor_slots_used(), 0);
    }

    #[test]
    fn test_blocked_tier_is_not_rescored() {
        let fx = Fixture::new();
        let builder = CandidatePoolBuilder::new(&fx.snapshot, &KeywordTaxonomy, &fx.config, &fx.filters, now());
        let pools = PoolSet::new(&builder, builder.build(&options()), options(), false, None);
        let mut ladder = RelaxationLadder::new(&fx.config.relaxation);
        ladder.block_tier(EffortTier::Hard);
        let mut log = EventLog::new();
        let ctx = fx.ctx();
        let any = |_: &Candidate| true;

        let relaxed = ladder.relax(0, EffortTier::Max, 0.90, &pools, &any, &ctx, &mut log);
        assert!(relaxed.map_or(true, |r| r.scored.iter().all(|s| s.breakdown.tier != EffortTier::Hard)));
        assert_eq!(log.relaxations()[0].2, RelaxOutcome::Empty);
    }
}
