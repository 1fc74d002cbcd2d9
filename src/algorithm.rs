//! # Scoring Algorithms
//!
//! Scores a (candidate, slot) pair in two stages.
//!
//! ## Fit
//!
//! ```text
//! tempoFit    = max over {bpm, bpm/2, bpm*2} of 1 - distance_to_window / tolerance
//! effortIndex = wT·tempoFit + wE·energy + wD·danceability
//! slotFit     = 1 - |effortIndex - targetEffort|
//! baseScore   = 0.60·slotFit - energy shaping penalty
//! ```
//!
//! A track without a BPM gets a tempo proxy of `0.9·(0.6·energy + 0.4·dance)`;
//! missing energy or danceability count as 0.5. Candidates whose tempoFit is
//! below the tier's gate never reach the bonus stage.
//!
//! ## Bonuses
//!
//! Additive terms rewarding freshness and variety: recency, artist spacing
//! inside the run, genre/decade diversity against recent history, cross-run
//! artist novelty, genre affinity, umbrella balance, rediscovery bias and
//! source preference.

use crate::config::ScoringConfig;
use crate::library::{Decade, SourceKind, UsageHistory};
use crate::pool::Candidate;
use crate::tier::{EffortTier, TierSpec};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

const NEUTRAL_FEATURE: f64 = 0.5;

/// Fit of a single BPM value against a tier's window.
#[must_use]
pub fn window_fit(bpm: f64, spec: &TierSpec) -> f64 {
    let (low, high) = spec.tempo_window;
    let distance = if bpm < low {
        low - bpm
    } else if bpm > high {
        bpm - high
    } else {
        0.0
    };
    (1.0 - distance / spec.tempo_tolerance).clamp(0.0, 1.0)
}

/// Best fit over the raw, half and double tempo readings, or the
/// energy/danceability proxy when the tempo is unknown.
///
/// # Examples
///
/// ```
/// use stride::algorithm::tempo_fit;
/// use stride::tier::EffortTier;
///
/// let spec = EffortTier::Hard.spec();
/// // 88 BPM reads as 176 when doubled
/// assert_eq!(tempo_fit(Some(88.0), None, None, spec, 0.9), 1.0);
/// ```
#[must_use]
pub fn tempo_fit(
    tempo: Option<f64>,
    energy: Option<f64>,
    danceability: Option<f64>,
    spec: &TierSpec,
    missing_tempo_scale: f64,
) -> f64 {
    match tempo {
        Some(bpm) if bpm.is_finite() && bpm > 0.0 => [bpm, bpm / 2.0, bpm * 2.0]
            .iter()
            .map(|reading| window_fit(*reading, spec))
            .fold(0.0, f64::max),
        _ => {
            let energy = energy.unwrap_or(NEUTRAL_FEATURE);
            let dance = danceability.unwrap_or(NEUTRAL_FEATURE);
            (missing_tempo_scale * (0.6 * energy + 0.4 * dance)).clamp(0.0, 1.0)
        }
    }
}

#[must_use]
pub fn effort_index(tempo_fit: f64, energy: Option<f64>, danceability: Option<f64>, spec: &TierSpec) -> f64 {
    let w = spec.weights;
    w.tempo * tempo_fit
        + w.energy * energy.unwrap_or(NEUTRAL_FEATURE)
        + w.dance * danceability.unwrap_or(NEUTRAL_FEATURE)
}

#[must_use]
pub fn slot_fit(effort_index: f64, target_effort: f64) -> f64 {
    (1.0 - (effort_index - target_effort).abs()).clamp(0.0, 1.0)
}

/// Penalty for Easy tracks that are too hot, or harder-tier tracks that are
/// too flat.
#[must_use]
pub fn energy_penalty(energy: Option<f64>, spec: &TierSpec, config: &ScoringConfig) -> f64 {
    let energy = energy.unwrap_or(NEUTRAL_FEATURE);
    if let Some(cap) = spec.energy_cap {
        if energy > cap && cap < 1.0 {
            return config.energy_cap_penalty * ((energy - cap) / (1.0 - cap)).min(1.0);
        }
        return 0.0;
    }
    match spec.energy_floor {
        Some(floor) if floor > 0.0 && energy < floor => {
            config.energy_floor_penalty * ((floor - energy) / floor).min(1.0)
        }
        _ => 0.0,
    }
}

/// Per-term bonus values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bonuses {
    pub recency: f64,
    pub artist_spacing: f64,
    pub diversity: f64,
    pub artist_novelty: f64,
    pub genre_affinity: f64,
    pub umbrella_balance: f64,
    pub rediscovery: f64,
    pub source: f64,
}

impl Bonuses {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.recency
            + self.artist_spacing
            + self.diversity
            + self.artist_novelty
            + self.genre_affinity
            + self.umbrella_balance
            + self.rediscovery
            + self.source
    }
}

/// Every number behind a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// Tier the candidate was scored against
    pub tier: EffortTier,
    pub tempo_fit: f64,
    pub effort_index: f64,
    pub slot_fit: f64,
    pub base: f64,
    pub bonuses: Bonuses,
    pub score: f64,
}

/// Admission rule applied before bonuses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gate {
    /// The tier's own minimum tempoFit
    TempoFit,
    /// Minimum slotFit, used by relaxation passes
    SlotFit(f64),
}

/// Selection state accumulated while the run progresses.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Index the next pick will occupy
    pub position: usize,
    pub artist_last_position: HashMap<String, usize>,
    pub artist_counts: HashMap<String, usize>,
    pub umbrella_counts: HashMap<String, u32>,
    pub decade_counts: HashMap<Decade, u32>,
    pub rediscovered: usize,
}

impl RunState {
    /// Fold a committed pick into the counters and advance the position.
    pub fn record(&mut self, candidate: &Candidate) {
        let artist = candidate.artist_id().to_string();
        self.artist_last_position.insert(artist.clone(), self.position);
        *self.artist_counts.entry(artist).or_insert(0) += 1;
        if let Some(umbrella) = &candidate.umbrella {
            *self.umbrella_counts.entry(umbrella.clone()).or_insert(0) += 1;
        }
        *self.decade_counts.entry(candidate.decade).or_insert(0) += 1;
        if candidate.rediscovery {
            self.rediscovered += 1;
        }
        self.position += 1;
    }

    #[must_use]
    pub fn artist_count(&self, artist_id: &str) -> usize {
        self.artist_counts.get(artist_id).copied().unwrap_or(0)
    }
}

/// Read-only inputs for scoring one slot.
pub struct ScoringContext<'a> {
    pub config: &'a ScoringConfig,
    pub now: DateTime<Utc>,
    pub lockout_days: f64,
    pub history: &'a UsageHistory,
    pub run: &'a RunState,
    /// Umbrellas the user asked for
    pub target_umbrellas: &'a [String],
    /// Number of rediscoveries the run aims for
    pub rediscovery_goal: f64,
}

impl ScoringContext<'_> {
    /// Fit stage only; `None` when the gate rejects the candidate.
    #[must_use]
    pub fn fit(&self, candidate: &Candidate, tier: EffortTier, target_effort: f64, gate: Gate) -> Option<(f64, f64, f64, f64)> {
        let spec = tier.spec();
        let energy = candidate.energy();
        let dance = candidate.danceability();

        let tempo = tempo_fit(candidate.tempo(), energy, dance, spec, self.config.missing_tempo_scale);
        if matches!(gate, Gate::TempoFit) && tempo < spec.min_tempo_fit {
            return None;
        }

        let effort = effort_index(tempo, energy, dance, spec);
        let fit = slot_fit(effort, target_effort);
        if let Gate::SlotFit(min) = gate {
            if fit < min {
                return None;
            }
        }

        let base = self.config.slot_fit_weight * fit - energy_penalty(energy, spec, self.config);
        Some((tempo, effort, fit, base))
    }

    /// Full score for one candidate.
    #[must_use]
    pub fn score(&self, candidate: &Candidate, tier: EffortTier, target_effort: f64, gate: Gate) -> Option<ScoreBreakdown> {
        let (tempo_fit, effort_index, slot_fit, base) = self.fit(candidate, tier, target_effort, gate)?;
        let bonuses = self.bonuses(candidate);
        Some(ScoreBreakdown {
            tier,
            tempo_fit,
            effort_index,
            slot_fit,
            base,
            bonuses,
            score: base + bonuses.total(),
        })
    }

    #[must_use]
    pub fn bonuses(&self, candidate: &Candidate) -> Bonuses {
        Bonuses {
            recency: self.recency_bonus(candidate),
            artist_spacing: self.artist_spacing_bonus(candidate),
            diversity: self.diversity_bonus(candidate),
            artist_novelty: self.artist_novelty_bonus(candidate),
            genre_affinity: candidate.genre_affinity * self.config.genre_affinity_bonus,
            umbrella_balance: self.umbrella_balance_bonus(candidate),
            rediscovery: self.rediscovery_bonus(candidate),
            source: self.source_bonus(candidate.track.source),
        }
    }

    fn recency_bonus(&self, candidate: &Candidate) -> f64 {
        match candidate.days_since_use {
            None => self.config.recency_bonus,
            Some(_) if self.lockout_days <= 0.0 => self.config.recency_bonus,
            Some(days) => self.config.recency_bonus * (days / self.lockout_days).clamp(0.0, 1.0),
        }
    }

    fn artist_spacing_bonus(&self, candidate: &Candidate) -> f64 {
        let full = self.config.artist_spacing_full_distance.max(2);
        match self.run.artist_last_position.get(candidate.artist_id()) {
            None => self.config.artist_spacing_bonus,
            Some(last) => {
                let distance = self.run.position.saturating_sub(*last);
                #[allow(clippy::cast_precision_loss)]
                let ratio = (distance.saturating_sub(1) as f64) / ((full - 1) as f64);
                self.config.artist_spacing_bonus * ratio.clamp(0.0, 1.0)
            }
        }
    }

    fn diversity_bonus(&self, candidate: &Candidate) -> f64 {
        let half = self.config.diversity_bonus / 2.0;

        let mut genres: HashMap<&str, u32> = HashMap::new();
        for (umbrella, count) in self.history.umbrella_counts.iter().chain(&self.run.umbrella_counts) {
            *genres.entry(umbrella.as_str()).or_insert(0) += count;
        }
        let genre_count = candidate
            .umbrella
            .as_deref()
            .and_then(|u| genres.get(u).copied())
            .unwrap_or(0);
        let genre_part = under_representation(genre_count, genres.values().copied().max().unwrap_or(0));

        let mut decades: HashMap<Decade, u32> = HashMap::new();
        for (decade, count) in self.history.decade_counts.iter().chain(&self.run.decade_counts) {
            *decades.entry(*decade).or_insert(0) += count;
        }
        let decade_count = decades.get(&candidate.decade).copied().unwrap_or(0);
        let decade_part = under_representation(decade_count, decades.values().copied().max().unwrap_or(0));

        half * genre_part + half * decade_part
    }

    fn artist_novelty_bonus(&self, candidate: &Candidate) -> f64 {
        match self.history.days_since_artist(candidate.artist_id(), self.now) {
            None => self.config.artist_never_used_bonus,
            Some(days) if days > self.lockout_days => {
                let ramp = self.config.artist_novelty_ramp_days.max(f64::EPSILON);
                self.config.artist_novelty_bonus * ((days - self.lockout_days) / ramp).clamp(0.0, 1.0)
            }
            Some(_) => 0.0,
        }
    }

    fn umbrella_balance_bonus(&self, candidate: &Candidate) -> f64 {
        if self.target_umbrellas.len() < 2 {
            return 0.0;
        }
        let Some(umbrella) = candidate.umbrella.as_ref() else {
            return 0.0;
        };
        if !self.target_umbrellas.contains(umbrella) {
            return 0.0;
        }
        let count_of = |u: &String| self.run.umbrella_counts.get(u).copied().unwrap_or(0);
        let max = self.target_umbrellas.iter().map(count_of).max().unwrap_or(0);
        self.config.umbrella_balance_bonus * under_representation(count_of(umbrella), max)
    }

    fn rediscovery_bonus(&self, candidate: &Candidate) -> f64 {
        if !candidate.rediscovery || self.rediscovery_goal <= 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let unmet = (self.rediscovery_goal - self.run.rediscovered as f64) / self.rediscovery_goal;
        self.config.rediscovery_bonus * unmet.clamp(0.0, 1.0)
    }

    fn source_bonus(&self, source: SourceKind) -> f64 {
        match source {
            SourceKind::Likes => self.config.source_likes_bonus,
            SourceKind::Recs => self.config.source_recs_bonus,
            SourceKind::Third => self.config.source_third_bonus,
        }
    }

    /// Score every candidate, dropping gate failures. Large pools are scored
    /// in parallel; output order follows input order either way.
    #[must_use]
    pub fn score_all<'p>(
        &self,
        candidates: &[&'p Candidate],
        tier: EffortTier,
        target_effort: f64,
        gate: Gate,
    ) -> Vec<Scored<'p>> {
        let score_one = |candidate: &&'p Candidate| {
            self.score(candidate, tier, target_effort, gate)
                .map(|breakdown| Scored { candidate: *candidate, breakdown })
        };

        if candidates.len() > self.config.parallel_threshold {
            candidates.par_iter().filter_map(score_one).collect()
        } else {
            candidates.iter().filter_map(score_one).collect()
        }
    }
}

/// `(max - count) / max`, or 1 when nothing has been counted yet.
fn under_representation(count: u32, max: u32) -> f64 {
    if max == 0 {
        return 1.0;
    }
    f64::from(max.saturating_sub(count)) / f64::from(max)
}

/// A candidate together with its score for the current slot.
#[derive(Debug, Clone, Copy)]
pub struct Scored<'p> {
    pub candidate: &'p Candidate,
    pub breakdown: ScoreBreakdown,
}

impl Scored<'_> {
    #[must_use]
    pub fn score(&self) -> f64 {
        self.breakdown.score
    }
}

/// Sort best-first; ties break on track id so runs stay reproducible.
pub fn rank(scored: &mut [Scored<'_>]) {
    scored.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.candidate.id().cmp(b.candidate.id()))
    });
}
