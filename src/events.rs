//! # Generation Events
//!
//! Every decision the engine makes is appended to an [`EventLog`] that is
//! returned with the result, so dry runs and tests can inspect what happened
//! without scraping log output. Each event is mirrored to `log::debug!`.

use crate::curve::Segment;
use crate::tier::EffortTier;
use log::debug;
use serde::Serialize;

/// A rung of the relaxation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelaxStep {
    AdjacentTier,
    SecondTier,
    NeighborGenres,
    LockoutBreak,
}

impl RelaxStep {
    pub const ORDER: [RelaxStep; 4] = [
        Self::AdjacentTier,
        Self::SecondTier,
        Self::NeighborGenres,
        Self::LockoutBreak,
    ];

    /// 1-based position on the ladder.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::AdjacentTier => 1,
            Self::SecondTier => 2,
            Self::NeighborGenres => 3,
            Self::LockoutBreak => 4,
        }
    }
}

/// Why a rung produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelaxOutcome {
    Found(usize),
    Empty,
    CapReached,
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GenerationEvent {
    PoolBuilt {
        size: usize,
        neighbor_weights: bool,
        lockout_enforced: bool,
    },
    PoolBroadened {
        before: usize,
        after: usize,
    },
    CurveBuilt {
        slots: usize,
        tiers: Vec<EffortTier>,
    },
    TierCapped {
        slot: usize,
        planned: EffortTier,
        effective: EffortTier,
    },
    SlotScored {
        slot: usize,
        tier: EffortTier,
        available: usize,
        viable: usize,
    },
    RelaxationTried {
        slot: usize,
        step: RelaxStep,
        outcome: RelaxOutcome,
    },
    SlotSkipped {
        slot: usize,
        tier: EffortTier,
    },
    TrackUnplayable {
        slot: usize,
        track_id: String,
    },
    TrackSubstituted {
        slot: usize,
        rejected: String,
        replacement: String,
    },
    OracleTimeout {
        slot: usize,
        track_id: String,
    },
    OverCapacity {
        slot: usize,
        track_id: String,
        seconds: u64,
        remaining: u64,
    },
    TrackPicked {
        slot: usize,
        track_id: String,
        artist_id: String,
        tier: EffortTier,
        segment: Segment,
        score: f64,
        relaxation: Option<RelaxStep>,
    },
    ExtensionSlot {
        slot: usize,
        total_seconds: u64,
        min_seconds: u64,
    },
    TrackTrimmed {
        track_id: String,
        total_seconds: u64,
    },
    UnderDuration {
        total_seconds: u64,
        min_seconds: u64,
    },
    UsageRecorded {
        tracks: usize,
    },
}

/// Append-only record of a run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<GenerationEvent>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: GenerationEvent) {
        debug!("{event:?}");
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[GenerationEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Ladder rungs tried, in order, as (slot, step, outcome).
    #[must_use]
    pub fn relaxations(&self) -> Vec<(usize, RelaxStep, RelaxOutcome)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                GenerationEvent::RelaxationTried { slot, step, outcome } => {
                    Some((*slot, *step, *outcome))
                }
                _ => None,
            })
            .collect()
    }

    /// Human-readable one-liners, as printed by `--debug` style output.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events.iter().map(describe).collect()
    }
}

fn describe(event: &GenerationEvent) -> String {
    use GenerationEvent as E;
    match event {
        E::PoolBuilt { size, neighbor_weights, lockout_enforced } => format!(
            "pool: {size} candidates (neighbors: {neighbor_weights}, lockout: {lockout_enforced})"
        ),
        E::PoolBroadened { before, after } => {
            format!("pool: broadened to neighbor genres {before} -> {after}")
        }
        E::CurveBuilt { slots, tiers } => {
            let arc: Vec<&str> = tiers.iter().map(|t| t.as_str()).collect();
            format!("curve: {slots} slots [{}]", arc.join(" "))
        }
        E::TierCapped { slot, planned, effective } => {
            format!("slot {slot}: {planned} capped, using {effective}")
        }
        E::SlotScored { slot, tier, available, viable } => {
            format!("slot {slot} [{tier}]: {viable}/{available} viable")
        }
        E::RelaxationTried { slot, step, outcome } => {
            format!("slot {slot}: relax step {} {step:?} -> {outcome:?}", step.number())
        }
        E::SlotSkipped { slot, tier } => format!("slot {slot} [{tier}]: skipped"),
        E::TrackUnplayable { slot, track_id } => format!("slot {slot}: {track_id} unplayable"),
        E::TrackSubstituted { slot, rejected, replacement } => {
            format!("slot {slot}: {rejected} swapped for {replacement}")
        }
        E::OracleTimeout { slot, track_id } => {
            format!("slot {slot}: playability check timed out for {track_id}")
        }
        E::OverCapacity { slot, track_id, seconds, remaining } => {
            format!("slot {slot}: {track_id} ({seconds}s) exceeds remaining {remaining}s")
        }
        E::TrackPicked { slot, track_id, tier, score, relaxation, .. } => match relaxation {
            Some(step) => format!(
                "slot {slot} [{tier}]: {track_id} score {score:.3} via step {}",
                step.number()
            ),
            None => format!("slot {slot} [{tier}]: {track_id} score {score:.3}"),
        },
        E::ExtensionSlot { slot, total_seconds, min_seconds } => {
            format!("extend: slot {slot} ({total_seconds}s < {min_seconds}s)")
        }
        E::TrackTrimmed { track_id, total_seconds } => {
            format!("trim: dropped {track_id}, now {total_seconds}s")
        }
        E::UnderDuration { total_seconds, min_seconds } => {
            format!("short: {total_seconds}s below {min_seconds}s")
        }
        E::UsageRecorded { tracks } => format!("usage: recorded {tracks} tracks"),
    }
}
