//! # Batch Comparison
//!
//! Runs a grid of requests (templates × durations × genre sets) against one
//! library, evaluates every playlist and looks across the results for
//! patterns no single run shows: tracks the draw keeps returning to, issues
//! that recur, templates or dimensions that score low, and what filtering
//! costs.
//!
//! Batch runs are dry. Nothing is published and no usage is recorded, so
//! every run sees the same library and repetition reflects the draw alone.

use crate::curve::Template;
use crate::evaluate::{evaluate, Evaluation};
use crate::generator::{GenerationOutcome, GenerationRequest, Generator};
use crate::library::Decade;
use crate::oracle::PlayabilityOracle;
use crate::tier::EffortTier;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Durations every template is tried at by default.
pub const DEFAULT_DURATIONS: [u32; 4] = [20, 30, 45, 60];

const MOST_USED_LIMIT: usize = 20;
/// Appearances across the batch that count as heavy reuse.
const HEAVY_USE: usize = 3;
const RECURRING_MIN: usize = 2;
const RECOMMEND_ISSUE_MIN: usize = 3;
const ISSUE_EXAMPLES: usize = 3;
const WEAK_SCORE: f64 = 6.0;
/// Filtered runs scoring this far below unfiltered ones get flagged.
const FILTER_GAP: f64 = 0.5;

/// Which requests a batch runs.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub templates: Vec<Template>,
    pub durations: Vec<u32>,
    /// Each set is one genre filter; an empty set runs unfiltered
    pub genre_sets: Vec<Vec<String>>,
    pub decade_sets: Vec<Vec<Decade>>,
    pub runs_per_combo: usize,
}

impl Default for BatchPlan {
    fn default() -> Self {
        Self {
            templates: Template::ALL.to_vec(),
            durations: DEFAULT_DURATIONS.to_vec(),
            genre_sets: vec![Vec::new(), vec!["rock".to_string(), "pop".to_string()]],
            decade_sets: vec![Vec::new()],
            runs_per_combo: 2,
        }
    }
}

impl BatchPlan {
    /// Every combination, each repeated `runs_per_combo` times.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        let mut requests = Vec::new();
        for &template in &self.templates {
            for &minutes in &self.durations {
                for genres in &self.genre_sets {
                    for decades in &self.decade_sets {
                        let request = GenerationRequest::new(template, minutes)
                            .genres(genres.clone())
                            .decades(decades.clone());
                        requests.extend(std::iter::repeat(request).take(self.runs_per_combo));
                    }
                }
            }
        }
        requests
    }
}

/// One track as it appeared in a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct Appearance {
    pub track_id: String,
    pub title: String,
    pub artist_name: String,
    pub tier: EffortTier,
}

/// What the comparison keeps from one generated playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub template: Template,
    pub minutes: u32,
    pub seed: u64,
    pub genres: Vec<String>,
    pub decades: Vec<Decade>,
    pub tracks: Vec<Appearance>,
    pub evaluation: Evaluation,
}

impl RunSummary {
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(request: &GenerationRequest, outcome: &GenerationOutcome, seed: u64, evaluation: Evaluation) -> Self {
        Self {
            template: request.template,
            minutes: request.plan.total_minutes().round() as u32,
            seed,
            genres: request.genres.clone(),
            decades: request.decades.clone(),
            tracks: outcome
                .slot_reports()
                .into_iter()
                .map(|slot| Appearance {
                    track_id: slot.track_id,
                    title: slot.title,
                    artist_name: slot.artist_name,
                    tier: slot.tier,
                })
                .collect(),
            evaluation,
        }
    }

    #[must_use]
    pub fn label(&self) -> String {
        let mut label = format!("{}/{}min", self.template, self.minutes);
        if !self.genres.is_empty() {
            label.push_str(&format!(" [{}]", self.genres.join(",")));
        }
        if !self.decades.is_empty() {
            let decades: Vec<String> = self.decades.iter().map(ToString::to_string).collect();
            label.push_str(&format!(" [{}]", decades.join(",")));
        }
        label
    }
}

/// A request that produced no playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub label: String,
    pub error: String,
}

/// Everything a batch produced.
#[derive(Debug, Default)]
pub struct Batch {
    pub runs: Vec<RunSummary>,
    pub failures: Vec<BatchFailure>,
}

impl Batch {
    /// Cross-run report; fails when no run produced a playlist.
    pub fn compare(&self) -> Result<ComparisonReport> {
        let mut report = compare(&self.runs)?;
        report.failures = self.failures.clone();
        Ok(report)
    }
}

/// Generate and evaluate every request in `plan`. Run `i` uses seed
/// `base_seed + i`, so a batch is reproducible.
pub async fn run_batch(
    generator: &Generator,
    plan: &BatchPlan,
    oracle: &dyn PlayabilityOracle,
    base_seed: u64,
    now: DateTime<Utc>,
) -> Batch {
    let mut batch = Batch::default();
    for (i, request) in plan.requests().into_iter().enumerate() {
        let seed = base_seed.wrapping_add(i as u64);
        match generator.generate(&request, oracle, seed, now).await {
            Ok(outcome) => {
                let evaluation = evaluate(&request, &outcome);
                let summary = RunSummary::new(&request, &outcome, seed, evaluation);
                info!(
                    "{}: {} tracks, {:.1}/10",
                    summary.label(),
                    summary.tracks.len(),
                    summary.evaluation.overall
                );
                batch.runs.push(summary);
            }
            Err(e) => {
                let failure = BatchFailure {
                    label: format!("{}/{}min", request.template, request.plan.total_minutes().round()),
                    error: e.to_string(),
                };
                warn!("{}: {}", failure.label, failure.error);
                batch.failures.push(failure);
            }
        }
    }
    batch
}

/// How often one track was picked across the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackUsage {
    pub track_id: String,
    pub title: String,
    pub artist_name: String,
    pub appearances: usize,
    /// Zero-based indexes into the batch's runs
    pub runs: Vec<usize>,
    pub tiers: Vec<EffortTier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Requirement,
    Dimension,
}

/// A failed requirement or dimension issue seen in more than one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuePattern {
    pub kind: IssueKind,
    pub description: String,
    pub occurrences: usize,
    pub runs: Vec<usize>,
    pub examples: Vec<String>,
}

/// Average score with and without a filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterImpact {
    pub with_filter_avg: f64,
    pub without_filter_avg: f64,
    pub with_filter_runs: usize,
    pub without_filter_runs: usize,
}

impl FilterImpact {
    fn from_scores(with: &[f64], without: &[f64]) -> Self {
        Self {
            with_filter_avg: mean(with),
            without_filter_avg: mean(without),
            with_filter_runs: with.len(),
            without_filter_runs: without.len(),
        }
    }

    /// Both sides have runs and the filtered side trails by more than `FILTER_GAP`.
    #[must_use]
    pub fn hurts(&self) -> bool {
        self.with_filter_runs > 0
            && self.without_filter_runs > 0
            && self.with_filter_avg < self.without_filter_avg - FILTER_GAP
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub generations_compared: usize,
    pub failures: Vec<BatchFailure>,

    pub avg_score: f64,
    pub score_std_dev: f64,
    pub min_score: f64,
    pub max_score: f64,
    /// Share of runs passing every hard requirement, 0 to 1
    pub hard_pass_rate: f64,

    pub most_used_tracks: Vec<TrackUsage>,
    pub unique_tracks: usize,
    pub avg_tracks_per_generation: f64,
    /// Share of distinct tracks that appeared in more than one run
    pub track_overlap_rate: f64,

    pub recurring_issues: Vec<IssuePattern>,
    pub dimension_averages: BTreeMap<String, f64>,

    pub template_scores: BTreeMap<String, f64>,
    /// Share of each template's runs passing every hard requirement
    pub template_reliability: BTreeMap<String, f64>,

    pub genre_filter: FilterImpact,
    pub decade_filter: FilterImpact,

    pub recommendations: Vec<String>,
}

/// Compare a set of evaluated runs.
#[allow(clippy::cast_precision_loss)]
pub fn compare(runs: &[RunSummary]) -> Result<ComparisonReport> {
    if runs.is_empty() {
        bail!("No generations to compare");
    }

    let scores: Vec<f64> = runs.iter().map(|r| r.evaluation.overall).collect();
    let passed = runs.iter().filter(|r| r.evaluation.all_passed).count();

    let usage = track_usage(runs);
    let unique_tracks = usage.len();
    let repeated = usage.iter().filter(|u| u.appearances > 1).count();
    let total_tracks: usize = runs.iter().map(|r| r.tracks.len()).sum();
    let mut most_used: Vec<TrackUsage> = usage.into_iter().filter(|u| u.appearances > 1).collect();
    most_used.truncate(MOST_USED_LIMIT);

    let mut dimensions: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for run in runs {
        for dim in &run.evaluation.dimensions {
            dimensions.entry(dim.name.to_string()).or_default().push(dim.score);
        }
    }

    let mut by_template: BTreeMap<String, Vec<&RunSummary>> = BTreeMap::new();
    for run in runs {
        by_template.entry(run.template.to_string()).or_default().push(run);
    }
    let template_scores = by_template
        .iter()
        .map(|(name, runs)| {
            let scores: Vec<f64> = runs.iter().map(|r| r.evaluation.overall).collect();
            (name.clone(), mean(&scores))
        })
        .collect();
    let template_reliability = by_template
        .iter()
        .map(|(name, runs)| {
            let passed = runs.iter().filter(|r| r.evaluation.all_passed).count();
            (name.clone(), passed as f64 / runs.len() as f64)
        })
        .collect();

    let split = |filtered: fn(&RunSummary) -> bool| {
        let (with, without): (Vec<&RunSummary>, Vec<&RunSummary>) = runs.iter().partition(|r| filtered(r));
        let with: Vec<f64> = with.iter().map(|r| r.evaluation.overall).collect();
        let without: Vec<f64> = without.iter().map(|r| r.evaluation.overall).collect();
        FilterImpact::from_scores(&with, &without)
    };

    let mut report = ComparisonReport {
        generations_compared: runs.len(),
        failures: Vec::new(),
        avg_score: mean(&scores),
        score_std_dev: std_dev(&scores),
        min_score: scores.iter().copied().fold(f64::INFINITY, f64::min),
        max_score: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        hard_pass_rate: passed as f64 / runs.len() as f64,
        most_used_tracks: most_used,
        unique_tracks,
        avg_tracks_per_generation: total_tracks as f64 / runs.len() as f64,
        track_overlap_rate: if unique_tracks == 0 { 0.0 } else { repeated as f64 / unique_tracks as f64 },
        recurring_issues: recurring_issues(runs),
        dimension_averages: dimensions.iter().map(|(name, s)| (name.clone(), mean(s))).collect(),
        template_scores,
        template_reliability,
        genre_filter: split(|r| !r.genres.is_empty()),
        decade_filter: split(|r| !r.decades.is_empty()),
        recommendations: Vec::new(),
    };
    report.recommendations = recommendations(&report);
    Ok(report)
}

/// Per-track appearances, most used first.
fn track_usage(runs: &[RunSummary]) -> Vec<TrackUsage> {
    let mut usage: HashMap<&str, TrackUsage> = HashMap::new();
    for (i, run) in runs.iter().enumerate() {
        for track in &run.tracks {
            let entry = usage.entry(track.track_id.as_str()).or_insert_with(|| TrackUsage {
                track_id: track.track_id.clone(),
                title: track.title.clone(),
                artist_name: track.artist_name.clone(),
                appearances: 0,
                runs: Vec::new(),
                tiers: Vec::new(),
            });
            entry.appearances += 1;
            entry.runs.push(i);
            entry.tiers.push(track.tier);
        }
    }
    let mut usage: Vec<TrackUsage> = usage.into_values().collect();
    usage.sort_by(|a, b| b.appearances.cmp(&a.appearances).then_with(|| a.track_id.cmp(&b.track_id)));
    usage
}

fn recurring_issues(runs: &[RunSummary]) -> Vec<IssuePattern> {
    let mut seen: HashMap<(IssueKind, String), IssuePattern> = HashMap::new();
    let mut note = |kind: IssueKind, description: String, run: usize, example: &str| {
        let pattern = seen.entry((kind, description.clone())).or_insert_with(|| IssuePattern {
            kind,
            description,
            occurrences: 0,
            runs: Vec::new(),
            examples: Vec::new(),
        });
        pattern.occurrences += 1;
        pattern.runs.push(run);
        if pattern.examples.len() < ISSUE_EXAMPLES {
            pattern.examples.push(example.to_string());
        }
    };

    for (i, run) in runs.iter().enumerate() {
        for req in run.evaluation.requirements.iter().filter(|r| !r.passed) {
            note(IssueKind::Requirement, req.name.to_string(), i, &req.details);
        }
        for dim in &run.evaluation.dimensions {
            for issue in &dim.issues {
                note(IssueKind::Dimension, format!("{}: {issue}", dim.name), i, issue);
            }
        }
    }

    let mut patterns: Vec<IssuePattern> = seen.into_values().filter(|p| p.occurrences >= RECURRING_MIN).collect();
    patterns.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.description.cmp(&b.description))
    });
    patterns
}

fn recommendations(report: &ComparisonReport) -> Vec<String> {
    let mut out = Vec::new();

    let heavy = report.most_used_tracks.iter().filter(|t| t.appearances >= HEAVY_USE).count();
    if heavy > 0 {
        out.push(format!(
            "High track repetition: {heavy} tracks appear {HEAVY_USE}+ times. Consider raising the recency or diversity bonus."
        ));
    }

    for issue in report.recurring_issues.iter().filter(|i| i.occurrences >= RECOMMEND_ISSUE_MIN).take(3) {
        out.push(format!("Recurring issue ({}x): {}", issue.occurrences, issue.description));
    }

    for (name, avg) in report.dimension_averages.iter().filter(|(_, avg)| **avg < WEAK_SCORE) {
        out.push(format!("Weak dimension: {name} averages {avg:.1}/10"));
    }

    for (name, avg) in report.template_scores.iter().filter(|(_, avg)| **avg < WEAK_SCORE) {
        out.push(format!("Template '{name}' underperforming (avg {avg:.1})"));
    }

    if report.genre_filter.hurts() {
        out.push(format!(
            "Genre filtering lowers quality ({:.1} vs {:.1}). Consider widening neighbor genres sooner.",
            report.genre_filter.with_filter_avg, report.genre_filter.without_filter_avg
        ));
    }
    if report.decade_filter.hurts() {
        out.push(format!(
            "Decade filtering lowers quality ({:.1} vs {:.1})",
            report.decade_filter.with_filter_avg, report.decade_filter.without_filter_avg
        ));
    }

    out
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation.
#[allow(clippy::cast_precision_loss)]
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compared {} generations ({} failed)", self.generations_compared, self.failures.len())?;
        writeln!(
            f,
            "Score: {:.2} avg, {:.2} std dev, range {:.1}-{:.1}",
            self.avg_score, self.score_std_dev, self.min_score, self.max_score
        )?;
        writeln!(f, "Hard requirements passed: {:.0}%", self.hard_pass_rate * 100.0)?;
        writeln!(
            f,
            "Tracks: {} unique, {:.1} per playlist, {:.0}% reused",
            self.unique_tracks,
            self.avg_tracks_per_generation,
            self.track_overlap_rate * 100.0
        )?;

        writeln!(f, "Templates:")?;
        for (name, score) in &self.template_scores {
            let reliability = self.template_reliability.get(name).copied().unwrap_or_default();
            writeln!(f, "  {name:<10} {score:.1}/10, {:.0}% pass", reliability * 100.0)?;
        }

        writeln!(f, "Dimensions:")?;
        for (name, score) in &self.dimension_averages {
            writeln!(f, "  {name:<18} {score:.1}/10")?;
        }

        for (label, impact) in [("Genre", &self.genre_filter), ("Decade", &self.decade_filter)] {
            if impact.with_filter_runs > 0 {
                writeln!(
                    f,
                    "{label} filter: {:.1} with ({} runs), {:.1} without ({} runs)",
                    impact.with_filter_avg, impact.with_filter_runs, impact.without_filter_avg, impact.without_filter_runs
                )?;
            }
        }

        if !self.most_used_tracks.is_empty() {
            writeln!(f, "Most used tracks:")?;
            for track in self.most_used_tracks.iter().take(10) {
                writeln!(f, "  {}x {} - {}", track.appearances, track.artist_name, track.title)?;
            }
        }

        if !self.recurring_issues.is_empty() {
            writeln!(f, "Recurring issues:")?;
            for issue in self.recurring_issues.iter().take(10) {
                writeln!(f, "  {}x {}", issue.occurrences, issue.description)?;
            }
        }

        for failure in &self.failures {
            writeln!(f, "Failed: {}: {}", failure.label, failure.error)?;
        }

        if !self.recommendations.is_empty() {
            writeln!(f, "Recommendations:")?;
            for (i, rec) in self.recommendations.iter().enumerate() {
                writeln!(f, "  {}. {rec}", i + 1)?;
            }
        }
        Ok(())
    }
}
