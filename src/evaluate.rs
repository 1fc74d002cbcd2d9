//! # Playlist Evaluation
//!
//! Objective checks over a finished [`GenerationOutcome`]. Two layers:
//!
//! - **Hard requirements**: pass/fail rules a usable workout playlist must
//!   meet (duration window, segment lengths, Easy bookends, artist spacing,
//!   track length).
//! - **Dimensions**: six 1–10 scores combined by fixed weights into an
//!   overall score, each with the issues that pulled it down.
//!
//! Nothing here feeds back into generation; it is a report for humans and
//! regression tests.

use crate::curve::{Segment, Template};
use crate::generator::{GenerationOutcome, GenerationRequest, SlotReport};
use crate::library::SourceKind;
use crate::tier::EffortTier;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

const DURATION_TOLERANCE_SECONDS: u64 = 120;
const SEGMENT_TOLERANCE_SECONDS: u64 = 60;
const MAX_TRACK_SECONDS: u64 = 360;
const MAX_PER_ARTIST: usize = 2;

const TEMPO_WEIGHT: f64 = 0.25;
const ENERGY_ARC_WEIGHT: f64 = 0.25;
const SLOT_FIT_WEIGHT: f64 = 0.20;
const VARIETY_WEIGHT: f64 = 0.15;
const FLOW_WEIGHT: f64 = 0.10;
const FILTER_WEIGHT: f64 = 0.05;

/// Jumps larger than these count as a rough transition.
const TEMPO_JUMP_BPM: f64 = 20.0;
const LARGE_TEMPO_JUMP_BPM: f64 = 30.0;
const ENERGY_JUMP: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Requirement {
    pub name: &'static str,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionScore {
    pub name: &'static str,
    /// 1.0 to 10.0
    pub score: f64,
    pub weight: f64,
    pub notes: String,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub requirements: Vec<Requirement>,
    pub all_passed: bool,
    pub dimensions: Vec<DimensionScore>,
    /// Weighted mean of the dimension scores
    pub overall: f64,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Overall: {:.1}/10", self.overall)?;
        writeln!(f, "Hard requirements:")?;
        for req in &self.requirements {
            let mark = if req.passed { "pass" } else { "FAIL" };
            writeln!(f, "  [{mark}] {}: {}", req.name, req.details)?;
        }
        writeln!(f, "Dimensions:")?;
        for dim in &self.dimensions {
            writeln!(f, "  {}: {:.1}/10 ({:.0}%) {}", dim.name, dim.score, dim.weight * 100.0, dim.notes)?;
            for issue in &dim.issues {
                writeln!(f, "    - {issue}")?;
            }
        }
        Ok(())
    }
}

/// Score `outcome`, generated from `request`.
#[must_use]
pub fn evaluate(request: &GenerationRequest, outcome: &GenerationOutcome) -> Evaluation {
    let slots = outcome.slot_reports();
    let requirements = check_requirements(outcome, &slots);
    let all_passed = requirements.iter().all(|r| r.passed);

    let dimensions = vec![
        tempo_fitness(outcome, &slots),
        energy_arc(outcome.template, &slots),
        slot_fitness(outcome, &slots),
        variety(outcome, &slots),
        flow(&slots),
        filter_adherence(request, outcome, &slots),
    ];
    let overall = dimensions.iter().map(|d| d.score * d.weight).sum();

    Evaluation {
        requirements,
        all_passed,
        dimensions,
        overall,
    }
}

fn within(actual: u64, target: u64, tolerance: u64) -> bool {
    actual.abs_diff(target) <= tolerance
}

fn check_requirements(outcome: &GenerationOutcome, slots: &[SlotReport]) -> Vec<Requirement> {
    let stats = &outcome.stats;
    let target = outcome.plan.total_seconds();
    let mut requirements = Vec::with_capacity(7);

    requirements.push(Requirement {
        name: "Duration",
        passed: within(stats.total_seconds, target, DURATION_TOLERANCE_SECONDS),
        details: format!(
            "target {target}s, actual {}s, off by {}s",
            stats.total_seconds,
            stats.total_seconds.abs_diff(target)
        ),
    });
    requirements.push(Requirement {
        name: "Warm-up",
        passed: within(stats.warmup_seconds, stats.warmup_target_seconds, SEGMENT_TOLERANCE_SECONDS),
        details: format!("target {}s, actual {}s", stats.warmup_target_seconds, stats.warmup_seconds),
    });
    requirements.push(Requirement {
        name: "Cool-down",
        passed: within(stats.cooldown_seconds, stats.cooldown_target_seconds, SEGMENT_TOLERANCE_SECONDS),
        details: format!("target {}s, actual {}s", stats.cooldown_target_seconds, stats.cooldown_seconds),
    });

    let (first, last) = (slots.first(), slots.last());
    requirements.push(Requirement {
        name: "Easy bookends",
        passed: matches!((first, last), (Some(a), Some(b)) if a.tier == EffortTier::Easy && b.tier == EffortTier::Easy),
        details: format!(
            "first {}, last {}",
            first.map_or("n/a", |s| s.tier.as_str()),
            last.map_or("n/a", |s| s.tier.as_str())
        ),
    });

    let adjacent = slots
        .windows(2)
        .filter(|pair| pair[0].artist_id == pair[1].artist_id)
        .count();
    requirements.push(Requirement {
        name: "No back-to-back artist",
        passed: adjacent == 0,
        details: format!("{adjacent} adjacent repeats"),
    });

    let mut per_artist: HashMap<&str, usize> = HashMap::new();
    for slot in slots {
        *per_artist.entry(slot.artist_id.as_str()).or_insert(0) += 1;
    }
    let busiest = per_artist.values().copied().max().unwrap_or(0);
    requirements.push(Requirement {
        name: "Artist cap",
        passed: busiest <= MAX_PER_ARTIST,
        details: format!("max {busiest} tracks per artist"),
    });

    let long = slots.iter().filter(|s| s.seconds > MAX_TRACK_SECONDS).count();
    requirements.push(Requirement {
        name: "Track length",
        passed: long == 0,
        details: format!("{long} tracks over {} min", MAX_TRACK_SECONDS / 60),
    });

    requirements
}

/// Piecewise map from an average fit in [0,1] onto 1–10.
fn fit_to_score(fit: f64) -> f64 {
    let score = if fit >= 0.85 {
        10.0
    } else if fit >= 0.75 {
        8.0 + (fit - 0.75) * 20.0
    } else if fit >= 0.65 {
        6.0 + (fit - 0.65) * 20.0
    } else if fit >= 0.50 {
        4.0 + (fit - 0.50) * 13.3
    } else {
        fit * 8.0
    };
    score.clamp(1.0, 10.0)
}

fn tempo_fitness(outcome: &GenerationOutcome, slots: &[SlotReport]) -> DimensionScore {
    let avg = outcome.stats.avg_tempo_fit;
    let mut score = fit_to_score(avg);
    let mut issues = Vec::new();

    let poor = slots.iter().filter(|s| s.tempo_fit < 0.50).count();
    if poor > 0 {
        issues.push(format!("{poor} tracks with tempoFit < 0.50"));
    }
    let critical = slots.iter().filter(|s| s.tempo_fit < 0.35).count();
    if critical > 0 {
        issues.push(format!("{critical} tracks with tempoFit < 0.35"));
        #[allow(clippy::cast_precision_loss)]
        let penalty = critical as f64 * 0.5;
        score -= penalty;
    }

    DimensionScore {
        name: "Tempo fitness",
        score: score.clamp(1.0, 10.0),
        weight: TEMPO_WEIGHT,
        notes: format!("avg tempoFit {avg:.2}"),
        issues,
    }
}

fn mean_energy(slots: &[SlotReport], segment: Segment) -> Option<f64> {
    let energies: Vec<f64> = slots
        .iter()
        .filter(|s| s.segment == segment)
        .filter_map(|s| s.energy)
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let mean = (!energies.is_empty()).then(|| energies.iter().sum::<f64>() / energies.len() as f64);
    mean
}

fn energy_arc(template: Template, slots: &[SlotReport]) -> DimensionScore {
    let mut issues = Vec::new();
    let mut score = 7.0;

    if slots.is_empty() {
        return DimensionScore {
            name: "Energy arc",
            score: 5.0,
            weight: ENERGY_ARC_WEIGHT,
            notes: String::new(),
            issues: vec!["no tracks".to_string()],
        };
    }

    if let Some(warmup) = mean_energy(slots, Segment::Warmup) {
        if warmup > 0.7 {
            issues.push(format!("warm-up too intense (avg energy {warmup:.2})"));
            score -= 1.5;
        } else if warmup < 0.6 {
            score += 0.5;
        }
    }
    if let Some(cooldown) = mean_energy(slots, Segment::Cooldown) {
        if cooldown > 0.65 {
            issues.push(format!("cool-down stays hot (avg energy {cooldown:.2})"));
            score -= 1.5;
        } else if cooldown < 0.55 {
            score += 0.5;
        }
    }

    let main: Vec<EffortTier> = slots
        .iter()
        .filter(|s| s.segment == Segment::Main)
        .map(|s| s.tier)
        .collect();
    if !main.is_empty() {
        let distinct = main.iter().collect::<HashSet<_>>().len();
        let steady = matches!(template, Template::SteadyLow | Template::SteadySustained);
        if distinct == 1 && !steady {
            issues.push("core has a single effort tier".to_string());
            score -= 1.0;
        }
        if template == Template::StrictAlternation {
            let changes = main.windows(2).filter(|pair| pair[0] != pair[1]).count();
            #[allow(clippy::cast_precision_loss)]
            let enough = changes as f64 >= main.len() as f64 * 0.5;
            if !enough {
                issues.push("core does not alternate enough".to_string());
                score -= 1.5;
            }
        }
    }

    DimensionScore {
        name: "Energy arc",
        score: f64::clamp(score, 1.0, 10.0),
        weight: ENERGY_ARC_WEIGHT,
        notes: "segment energy progression".to_string(),
        issues,
    }
}

fn slot_fitness(outcome: &GenerationOutcome, slots: &[SlotReport]) -> DimensionScore {
    let avg = outcome.stats.avg_slot_fit;
    let mut issues = Vec::new();

    for slot in slots {
        let Some(energy) = slot.energy else { continue };
        match slot.tier {
            EffortTier::Hard | EffortTier::Max if energy < 0.5 => {
                issues.push(format!("slot {}: {} slot with low energy ({energy:.2})", slot.slot, slot.tier));
            }
            EffortTier::Easy if energy > 0.75 => {
                issues.push(format!("slot {}: easy slot with high energy ({energy:.2})", slot.slot));
            }
            _ => {}
        }
    }

    DimensionScore {
        name: "Slot fitness",
        score: fit_to_score(avg),
        weight: SLOT_FIT_WEIGHT,
        notes: format!("avg slotFit {avg:.2}"),
        issues,
    }
}

#[allow(clippy::cast_precision_loss)]
fn variety(outcome: &GenerationOutcome, slots: &[SlotReport]) -> DimensionScore {
    let stats = &outcome.stats;
    let rediscovery = stats.rediscovery_pct / 100.0;
    let mut issues = Vec::new();
    let mut score = 7.0;

    if (0.45..=0.55).contains(&rediscovery) {
        score += 2.0;
    } else if rediscovery >= 0.35 {
        score += 1.0;
    } else if rediscovery < 0.25 {
        issues.push(format!("low rediscovery rate ({:.0}%)", stats.rediscovery_pct));
        score -= 1.5;
    }

    if !slots.is_empty() {
        let ratio = stats.unique_artists as f64 / slots.len() as f64;
        if ratio >= 0.9 {
            score += 1.0;
        } else if ratio < 0.7 {
            issues.push(format!(
                "low artist variety ({} unique in {} tracks)",
                stats.unique_artists,
                slots.len()
            ));
            score -= 1.0;
        }

        let likes = outcome
            .picks
            .iter()
            .filter(|p| p.candidate.track.source == SourceKind::Likes)
            .count() as f64
            / slots.len() as f64;
        if likes < 0.3 {
            issues.push(format!("few liked tracks ({:.0}%)", likes * 100.0));
            score -= 0.5;
        }
    }

    DimensionScore {
        name: "Variety",
        score: f64::clamp(score, 1.0, 10.0),
        weight: VARIETY_WEIGHT,
        notes: format!(
            "rediscovery {:.0}%, {} unique artists",
            stats.rediscovery_pct, stats.unique_artists
        ),
        issues,
    }
}

fn flow(slots: &[SlotReport]) -> DimensionScore {
    if slots.len() < 2 {
        return DimensionScore {
            name: "Flow",
            score: 5.0,
            weight: FLOW_WEIGHT,
            notes: String::new(),
            issues: vec!["not enough tracks to judge transitions".to_string()],
        };
    }

    let mut issues = Vec::new();
    let mut rough = 0usize;
    for pair in slots.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if let (Some(a), Some(b)) = (prev.tempo, next.tempo) {
            let jump = (a - b).abs();
            if jump > TEMPO_JUMP_BPM {
                rough += 1;
                if jump > LARGE_TEMPO_JUMP_BPM {
                    issues.push(format!("{jump:.0} BPM jump between slots {} and {}", prev.slot, next.slot));
                }
            }
        }
        if let (Some(a), Some(b)) = (prev.energy, next.energy) {
            if (a - b).abs() > ENERGY_JUMP {
                rough += 1;
            }
        }
    }

    let mut score: f64 = 7.0;
    if rough == 0 {
        score += 2.0;
    } else {
        #[allow(clippy::cast_precision_loss)]
        let penalty = (rough as f64 * 0.5).min(3.0);
        score -= penalty;
        if rough > 3 {
            issues.push(format!("{rough} rough transitions"));
        }
    }

    DimensionScore {
        name: "Flow",
        score: score.clamp(1.0, 10.0),
        weight: FLOW_WEIGHT,
        notes: "tempo and energy transitions".to_string(),
        issues,
    }
}

fn filter_adherence(request: &GenerationRequest, outcome: &GenerationOutcome, slots: &[SlotReport]) -> DimensionScore {
    let avg = outcome.stats.avg_genre_affinity;
    let notes = format!("avg genre affinity {avg:.2}");
    if request.genres.is_empty() && request.decades.is_empty() {
        return DimensionScore {
            name: "Filter adherence",
            score: 10.0,
            weight: FILTER_WEIGHT,
            notes,
            issues: Vec::new(),
        };
    }

    let mut issues = Vec::new();
    let mut score = if avg >= 0.8 {
        10.0
    } else if avg >= 0.6 {
        8.0 + (avg - 0.6) * 10.0
    } else if avg >= 0.4 {
        6.0 + (avg - 0.4) * 10.0
    } else {
        issues.push(format!("weak genre match ({avg:.2})"));
        avg * 15.0
    };

    let unmatched = slots.iter().filter(|s| s.genre_affinity <= 0.0).count();
    if unmatched > 0 && !request.genres.is_empty() {
        issues.push(format!("{unmatched} tracks match no selected genre"));
        #[allow(clippy::cast_precision_loss)]
        let penalty = unmatched as f64 * 0.5;
        score -= penalty;
    }

    DimensionScore {
        name: "Filter adherence",
        score: f64::clamp(score, 1.0, 10.0),
        weight: FILTER_WEIGHT,
        notes,
        issues,
    }
}
