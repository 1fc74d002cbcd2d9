//! # Effort Tiers
//!
//! The five effort tiers a workout curve is built from, and the static table
//! describing how each tier is scored. Re-tuning a tier is a change to
//! [`TierSpec`] data in [`EffortTier::spec`], never to control flow.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Effort tier, ordered from gentlest to hardest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortTier {
    Easy,
    Moderate,
    Strong,
    Hard,
    Max,
}

/// Scoring weights applied to a track's (tempoFit, energy, danceability).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierWeights {
    pub tempo: f64,
    pub energy: f64,
    pub dance: f64,
}

/// Static scoring description of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Effort value a slot of this tier aims for, in [0,1]
    pub target_effort: f64,
    /// Inclusive BPM window considered a perfect tempo fit
    pub tempo_window: (f64, f64),
    /// BPM distance outside the window at which tempoFit reaches zero
    pub tempo_tolerance: f64,
    /// Candidates with a lower tempoFit are dropped before bonuses
    pub min_tempo_fit: f64,
    pub weights: TierWeights,
    /// Penalise energy below this value (all tiers above Easy)
    pub energy_floor: Option<f64>,
    /// Penalise energy above this value (Easy only)
    pub energy_cap: Option<f64>,
}

/// All tiers in ascending order.
pub const ALL_TIERS: [EffortTier; 5] = [
    EffortTier::Easy,
    EffortTier::Moderate,
    EffortTier::Strong,
    EffortTier::Hard,
    EffortTier::Max,
];

const EASY: TierSpec = TierSpec {
    target_effort: 0.60,
    tempo_window: (150.0, 160.0),
    tempo_tolerance: 15.0,
    min_tempo_fit: 0.35,
    weights: TierWeights { tempo: 0.30, energy: 0.45, dance: 0.25 },
    energy_floor: None,
    energy_cap: Some(0.70),
};

const MODERATE: TierSpec = TierSpec {
    target_effort: 0.68,
    tempo_window: (158.0, 168.0),
    tempo_tolerance: 12.0,
    min_tempo_fit: 0.40,
    weights: TierWeights { tempo: 0.35, energy: 0.45, dance: 0.20 },
    energy_floor: Some(0.45),
    energy_cap: None,
};

const STRONG: TierSpec = TierSpec {
    target_effort: 0.75,
    tempo_window: (165.0, 174.0),
    tempo_tolerance: 10.0,
    min_tempo_fit: 0.45,
    weights: TierWeights { tempo: 0.40, energy: 0.40, dance: 0.20 },
    energy_floor: Some(0.55),
    energy_cap: None,
};

const HARD: TierSpec = TierSpec {
    target_effort: 0.82,
    tempo_window: (172.0, 182.0),
    tempo_tolerance: 10.0,
    min_tempo_fit: 0.50,
    weights: TierWeights { tempo: 0.40, energy: 0.45, dance: 0.15 },
    energy_floor: Some(0.65),
    energy_cap: None,
};

const MAX: TierSpec = TierSpec {
    target_effort: 0.90,
    tempo_window: (178.0, 190.0),
    tempo_tolerance: 10.0,
    min_tempo_fit: 0.50,
    weights: TierWeights { tempo: 0.40, energy: 0.50, dance: 0.10 },
    energy_floor: Some(0.75),
    energy_cap: None,
};

impl EffortTier {
    /// Lookup into the tier table.
    #[must_use]
    pub const fn spec(self) -> &'static TierSpec {
        match self {
            Self::Easy => &EASY,
            Self::Moderate => &MODERATE,
            Self::Strong => &STRONG,
            Self::Hard => &HARD,
            Self::Max => &MAX,
        }
    }

    /// Position on the five-step scale (Easy = 0).
    #[must_use]
    pub const fn rank(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn from_rank(rank: usize) -> Option<Self> {
        ALL_TIERS.get(rank).copied()
    }

    /// Tiers exactly `steps` away on either side, lower one first.
    #[must_use]
    pub fn neighbors(self, steps: usize) -> Vec<Self> {
        let rank = self.rank();
        let lower = rank.checked_sub(steps).and_then(Self::from_rank);
        let upper = Self::from_rank(rank + steps);
        lower.into_iter().chain(upper).collect()
    }

    /// One tier gentler, saturating at Easy.
    #[must_use]
    pub fn step_down(self) -> Self {
        self.rank()
            .checked_sub(1)
            .and_then(Self::from_rank)
            .unwrap_or(Self::Easy)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Moderate => "moderate",
            Self::Strong => "strong",
            Self::Hard => "hard",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for EffortTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffortTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_TIERS
            .iter()
            .copied()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown effort tier: '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_are_ordered_by_effort() {
        for pair in ALL_TIERS.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(
                pair[0].spec().target_effort < pair[1].spec().target_effort,
                "{} should aim lower than {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        for tier in ALL_TIERS {
            let w = tier.spec().weights;
            assert!((w.tempo + w.energy + w.dance - 1.0).abs() < 1e-9, "{tier} weights");
        }
    }

    #[test]
    fn test_energy_cap_only_on_lowest_tier() {
        assert!(EffortTier::Easy.spec().energy_cap.is_some());
        assert!(EffortTier::Easy.spec().energy_floor.is_none());
        for tier in &ALL_TIERS[1..] {
            assert!(tier.spec().energy_cap.is_none());
            assert!(tier.spec().energy_floor.is_some());
        }
    }

    #[test]
    fn test_neighbors() {
        assert_eq!(EffortTier::Easy.neighbors(1), vec![EffortTier::Moderate]);
        assert_eq!(
            EffortTier::Strong.neighbors(1),
            vec![EffortTier::Moderate, EffortTier::Hard]
        );
        assert_eq!(EffortTier::Strong.neighbors(2), vec![EffortTier::Easy, EffortTier::Max]);
        assert_eq!(EffortTier::Max.neighbors(2), vec![EffortTier::Strong]);
        assert!(EffortTier::Easy.neighbors(5).is_empty());
    }

    #[test]
    fn test_parse_round_trip() {
        assert_eq!("HARD".parse::<EffortTier>().unwrap(), EffortTier::Hard);
        assert!("sprint".parse::<EffortTier>().is_err());
        assert_eq!(EffortTier::Max.step_down(), EffortTier::Hard);
        assert_eq!(EffortTier::Easy.step_down(), EffortTier::Easy);
    }
}
