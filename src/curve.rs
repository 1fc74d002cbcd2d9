//! # Effort Curves
//!
//! Turns a workout template and a duration plan into the ordered list of
//! slots the selection loop walks. The curve is computed once per run:
//!
//! ```text
//! [ warm-up: Easy … ] [ core: template shape ] [ cool-down: Easy … ]
//! ```
//!
//! Minute budgets become slot counts through a fixed minutes-per-slot
//! estimate, and every section keeps at least one slot even when its budget
//! rounds to zero.

use crate::tier::EffortTier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Workout template, named after the shape of its core section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Template {
    /// Mostly Easy with a short Moderate lift in the middle (`light`)
    SteadyLow,
    /// Strong sustained effort with up to two Hard spikes (`tempo`)
    SteadySustained,
    /// Easy/Hard one-for-one (`hiit`)
    StrictAlternation,
    /// Moderate/Hard one-for-one (`intervals`)
    LooseAlternation,
    /// Up to Max and back down (`pyramid`)
    Pyramid,
    /// Moderate/Strong build finishing on Hard then Max (`kicker`)
    RampToPeak,
}

impl Template {
    pub const ALL: [Template; 6] = [
        Self::SteadyLow,
        Self::SteadySustained,
        Self::StrictAlternation,
        Self::LooseAlternation,
        Self::Pyramid,
        Self::RampToPeak,
    ];

    /// Short name used on the command line and in JSON output.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::SteadyLow => "light",
            Self::SteadySustained => "tempo",
            Self::StrictAlternation => "hiit",
            Self::LooseAlternation => "intervals",
            Self::Pyramid => "pyramid",
            Self::RampToPeak => "kicker",
        }
    }

    #[must_use]
    pub const fn shape_name(self) -> &'static str {
        match self {
            Self::SteadyLow => "steady-low",
            Self::SteadySustained => "steady-sustained",
            Self::StrictAlternation => "strict-alternation",
            Self::LooseAlternation => "loose-alternation",
            Self::Pyramid => "pyramid",
            Self::RampToPeak => "ramp-to-peak",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::SteadyLow => "Light Run",
            Self::SteadySustained => "Tempo Run",
            Self::StrictAlternation => "HIIT",
            Self::LooseAlternation => "Intervals",
            Self::Pyramid => "Pyramid",
            Self::RampToPeak => "Kicker",
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Template {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.short_name() == wanted || t.shape_name() == wanted)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown template: '{s}'. Use one of: light, tempo, hiit, intervals, pyramid, kicker"
                )
            })
    }
}

/// Part of the workout a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Warmup,
    Main,
    Cooldown,
}

impl Segment {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Main => "main",
            Self::Cooldown => "cooldown",
        }
    }
}

/// One position in the playlist: which tier it should sound like.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub index: usize,
    pub tier: EffortTier,
    pub target_effort: f64,
    pub segment: Segment,
}

impl Slot {
    #[must_use]
    pub fn new(index: usize, tier: EffortTier, segment: Segment) -> Self {
        Self {
            index,
            tier,
            target_effort: tier.spec().target_effort,
            segment,
        }
    }
}

/// Minute budgets for the three sections of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationPlan {
    pub warmup_minutes: f64,
    pub core_minutes: f64,
    pub cooldown_minutes: f64,
}

impl DurationPlan {
    #[must_use]
    pub fn new(warmup_minutes: f64, core_minutes: f64, cooldown_minutes: f64) -> Self {
        Self {
            warmup_minutes,
            core_minutes,
            cooldown_minutes,
        }
    }

    /// Split a total run length using per-template warm-up and cool-down
    /// baselines. Light runs ease in faster than interval work. The sections
    /// always add up to `total_minutes`; runs too short for the section
    /// minimums shrink all three in proportion.
    #[must_use]
    pub fn for_template(template: Template, total_minutes: u32) -> Self {
        let total = f64::from(total_minutes);
        let (warm_share, cool_share) = match template {
            Template::SteadyLow => (0.12, 0.10),
            Template::SteadySustained | Template::RampToPeak => (0.15, 0.12),
            Template::StrictAlternation | Template::LooseAlternation | Template::Pyramid => {
                (0.18, 0.12)
            }
        };
        let warmup = (total * warm_share).round().clamp(4.0, 10.0);
        let cooldown = (total * cool_share).round().clamp(4.0, 8.0);
        let core = (total - warmup - cooldown).max(4.0);
        let planned = warmup + core + cooldown;
        if planned > total && total > 0.0 {
            let scale = total / planned;
            return Self::new(warmup * scale, core * scale, cooldown * scale);
        }
        Self::new(warmup, core, cooldown)
    }

    #[must_use]
    pub fn total_minutes(&self) -> f64 {
        self.warmup_minutes + self.core_minutes + self.cooldown_minutes
    }

    #[must_use]
    pub fn total_seconds(&self) -> u64 {
        minutes_to_seconds(self.total_minutes())
    }

    /// Acceptable total length as (min, max) seconds.
    #[must_use]
    pub fn bounds_seconds(&self, tolerance_minutes: f64) -> (u64, u64) {
        let total = self.total_minutes();
        (
            minutes_to_seconds((total - tolerance_minutes).max(0.0)),
            minutes_to_seconds(total + tolerance_minutes),
        )
    }
}

/// Whole seconds in `minutes`, negatives clamped to zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn minutes_to_seconds(minutes: f64) -> u64 {
    (minutes.max(0.0) * 60.0).round() as u64
}

/// Slot counts per section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCounts {
    pub warmup: usize,
    pub core: usize,
    pub cooldown: usize,
}

impl SlotCounts {
    #[must_use]
    pub fn from_plan(plan: &DurationPlan, minutes_per_slot: f64) -> Self {
        Self {
            warmup: slots_for(plan.warmup_minutes, minutes_per_slot),
            core: slots_for(plan.core_minutes, minutes_per_slot),
            cooldown: slots_for(plan.cooldown_minutes, minutes_per_slot),
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.warmup + self.core + self.cooldown
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn slots_for(minutes: f64, minutes_per_slot: f64) -> usize {
    if minutes_per_slot <= 0.0 || !minutes.is_finite() {
        return 1;
    }
    ((minutes / minutes_per_slot).round().max(1.0)) as usize
}

/// Build the full slot sequence for `template`.
///
/// # Examples
///
/// ```
/// use stride::curve::{build_curve, DurationPlan, Template};
/// use stride::tier::EffortTier;
///
/// let plan = DurationPlan::new(4.0, 32.0, 4.0);
/// let slots = build_curve(Template::StrictAlternation, &plan, 4.0);
/// assert_eq!(slots.len(), 10);
/// assert_eq!(slots[0].tier, EffortTier::Easy);
/// assert_eq!(slots[1].tier, EffortTier::Hard);
/// ```
#[must_use]
pub fn build_curve(template: Template, plan: &DurationPlan, minutes_per_slot: f64) -> Vec<Slot> {
    let counts = SlotCounts::from_plan(plan, minutes_per_slot);
    build_curve_from_counts(template, counts)
}

/// Same as [`build_curve`] with explicit slot counts.
#[must_use]
pub fn build_curve_from_counts(template: Template, counts: SlotCounts) -> Vec<Slot> {
    let warmup = counts.warmup.max(1);
    let core = counts.core.max(1);
    let cooldown = counts.cooldown.max(1);

    let warmup_last = EffortTier::Easy;
    let core_tiers = core_shape(template, core, warmup_last);

    let tiers = std::iter::repeat(EffortTier::Easy)
        .take(warmup)
        .map(|tier| (tier, Segment::Warmup))
        .chain(core_tiers.into_iter().map(|tier| (tier, Segment::Main)))
        .chain(
            std::iter::repeat(EffortTier::Easy)
                .take(cooldown)
                .map(|tier| (tier, Segment::Cooldown)),
        );

    tiers
        .enumerate()
        .map(|(index, (tier, segment))| Slot::new(index, tier, segment))
        .collect()
}

/// Core tier sequence of length `n` for a template.
#[must_use]
pub fn core_shape(template: Template, n: usize, previous: EffortTier) -> Vec<EffortTier> {
    match template {
        Template::SteadyLow => steady_low(n),
        Template::SteadySustained => steady_sustained(n),
        Template::StrictAlternation => strict_alternation(n, previous),
        Template::LooseAlternation => loose_alternation(n, previous),
        Template::Pyramid => pyramid(n),
        Template::RampToPeak => ramp_to_peak(n),
    }
}

fn steady_low(n: usize) -> Vec<EffortTier> {
    let mut tiers = vec![EffortTier::Easy; n];
    if n < 3 {
        return tiers;
    }
    // at most 20%, centred, never touching either end
    let lifts = n / 5;
    let start = (n - lifts) / 2;
    for tier in tiers.iter_mut().skip(start).take(lifts) {
        *tier = EffortTier::Moderate;
    }
    tiers
}

fn steady_sustained(n: usize) -> Vec<EffortTier> {
    let mut tiers = vec![EffortTier::Strong; n];
    if n >= 2 {
        tiers[0] = EffortTier::Moderate;
    }
    let spikes: Vec<usize> = match n {
        0..=4 => Vec::new(),
        5..=7 => vec![2 * n / 3],
        _ => vec![n / 3, 2 * n / 3],
    };
    for i in spikes {
        tiers[i] = EffortTier::Hard;
    }
    tiers
}

/// Minimum core length before a Max interval is allowed.
const ALTERNATION_MAX_MIN_CORE: usize = 10;

fn strict_alternation(n: usize, previous: EffortTier) -> Vec<EffortTier> {
    let first = if previous == EffortTier::Hard {
        EffortTier::Easy
    } else {
        EffortTier::Hard
    };
    let second = if first == EffortTier::Hard {
        EffortTier::Easy
    } else {
        EffortTier::Hard
    };
    let mut tiers: Vec<EffortTier> = (0..n)
        .map(|i| if i % 2 == 0 { first } else { second })
        .collect();

    if n >= ALTERNATION_MAX_MIN_CORE {
        // the last Hard outside the first Easy/Hard cycle becomes the peak
        if let Some(i) = tiers.iter().rposition(|t| *t == EffortTier::Hard) {
            if i >= 2 {
                tiers[i] = EffortTier::Max;
            }
        }
    }
    tiers
}

fn loose_alternation(n: usize, previous: EffortTier) -> Vec<EffortTier> {
    let (first, second) = if previous == EffortTier::Moderate {
        (EffortTier::Hard, EffortTier::Moderate)
    } else {
        (EffortTier::Moderate, EffortTier::Hard)
    };
    (0..n)
        .map(|i| if i % 2 == 0 { first } else { second })
        .collect()
}

fn pyramid(n: usize) -> Vec<EffortTier> {
    use EffortTier::{Hard, Max, Moderate, Strong};

    if n >= 7 {
        let up = (n - 1) / 2;
        let down = n - 1 - up;
        let mut tiers = climb(up);
        tiers.push(Max);
        tiers.extend(climb(down).into_iter().rev());
        return tiers;
    }

    // no room for the full shape: drop Max, then squeeze the middle
    let mut tiers = vec![Moderate, Strong, Hard, Hard, Strong, Moderate];
    while tiers.len() > n {
        let mid = tiers.len() / 2;
        tiers.remove(mid);
    }
    tiers
}

/// Moderate → Strong → Hard stretched over `len` slots.
fn climb(len: usize) -> Vec<EffortTier> {
    const LEVELS: [EffortTier; 3] = [EffortTier::Moderate, EffortTier::Strong, EffortTier::Hard];
    (0..len).map(|j| LEVELS[(j * LEVELS.len() / len).min(2)]).collect()
}

fn ramp_to_peak(n: usize) -> Vec<EffortTier> {
    if n <= 2 {
        return vec![EffortTier::Hard; n];
    }
    let mut tiers: Vec<EffortTier> = (0..n - 2)
        .map(|i| {
            if i % 2 == 0 {
                EffortTier::Moderate
            } else {
                EffortTier::Strong
            }
        })
        .collect();
    tiers.push(EffortTier::Hard);
    tiers.push(EffortTier::Max);
    tiers
}
