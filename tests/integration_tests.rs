//! # Integration Tests for Stride
//!
//! End-to-end runs of the generator against in-memory and SQLite caches:
//! curve shape, candidate exhaustion, relaxation order, usage recording and
//! reproducibility.

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use stride::cache::{record_usage, MemoryCache};
use stride::compare::{run_batch, BatchPlan};
use stride::config::GeneratorConfig;
use stride::curve::{build_curve, DurationPlan, Template};
use stride::db::{LibraryDump, SqliteCache};
use stride::events::{EventLog, GenerationEvent, RelaxOutcome, RelaxStep};
use stride::generator::{GenerationOutcome, GenerationRequest, Generator};
use stride::library::{Artist, AudioFeature, SourceKind, Track, UsageRecord};
use stride::oracle::AlwaysPlayable;
use stride::sink::MemorySink;
use stride::taxonomy::KeywordTaxonomy;
use stride::tier::EffortTier;
use tempfile::TempDir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Forty minutes: one warm-up slot, eight core slots, one cool-down slot.
fn forty_minutes() -> DurationPlan {
    DurationPlan::new(4.0, 32.0, 4.0)
}

/// Easy-window profile: 155 BPM, moderate energy.
const EASY: (f64, f64, f64) = (155.0, 0.55, 0.6);
/// Hard-window profile: 177 BPM, high energy.
const HARD: (f64, f64, f64) = (177.0, 0.85, 0.6);

/// Builder for small synthetic libraries.
#[derive(Default)]
struct Library {
    tracks: Vec<Track>,
    features: Vec<AudioFeature>,
    artists: HashMap<String, Artist>,
    usage: Vec<UsageRecord>,
}

impl Library {
    fn add(&mut self, id: &str, artist: &str, genre: &str, seconds: u64, profile: (f64, f64, f64)) -> &mut Self {
        self.tracks.push(Track {
            id: id.to_string(),
            title: format!("Song {id}"),
            artist_id: artist.to_string(),
            artist_name: format!("Artist {artist}"),
            duration_ms: seconds * 1000,
            album: String::new(),
            release_year: Some(2012),
            explicit: false,
            playable: true,
            source: SourceKind::Likes,
        });
        let (tempo, energy, danceability) = profile;
        self.features.push(AudioFeature {
            track_id: id.to_string(),
            tempo: Some(tempo),
            energy: Some(energy),
            danceability: Some(danceability),
            valence: None,
            loudness: None,
            key: None,
            mode: None,
            time_signature: None,
        });
        self.artists.entry(artist.to_string()).or_insert_with(|| Artist {
            id: artist.to_string(),
            name: format!("Artist {artist}"),
            genres: vec![genre.to_string()],
            popularity: None,
        });
        self
    }

    fn used(&mut self, id: &str, days_ago: i64) -> &mut Self {
        self.usage.push(UsageRecord {
            track_id: id.to_string(),
            last_used: now() - Duration::days(days_ago),
            use_count: 1,
        });
        self
    }

    fn artists(&self) -> Vec<Artist> {
        let mut artists: Vec<Artist> = self.artists.values().cloned().collect();
        artists.sort_by(|a, b| a.id.cmp(&b.id));
        artists
    }

    fn memory_cache(&self) -> Arc<MemoryCache> {
        Arc::new(MemoryCache::new(
            self.tracks.clone(),
            self.features.clone(),
            self.artists(),
            self.usage.clone(),
        ))
    }

    fn dump(&self) -> LibraryDump {
        LibraryDump {
            tracks: self.tracks.clone(),
            audio_features: self.features.clone(),
            artists: self.artists(),
            usage: self.usage.clone(),
        }
    }
}

/// 25 Easy and 25 Hard tracks, 240 s each, every track by its own artist.
fn alternation_library() -> Library {
    let mut library = Library::default();
    for i in 0..25 {
        library.add(&format!("e{i:02}"), &format!("ea{i:02}"), "rock", 240, EASY);
        library.add(&format!("h{i:02}"), &format!("ha{i:02}"), "rock", 240, HARD);
    }
    library
}

fn generator(cache: Arc<MemoryCache>) -> Generator {
    Generator::new(cache, Box::new(KeywordTaxonomy), GeneratorConfig::default())
}

async fn generate(library: &Library, request: &GenerationRequest, seed: u64) -> GenerationOutcome {
    generator(library.memory_cache())
        .generate(request, &AlwaysPlayable, seed, now())
        .await
        .expect("generation should succeed")
}

fn assert_no_adjacent_artists(outcome: &GenerationOutcome) {
    for pair in outcome.picks.windows(2) {
        assert_ne!(pair[0].artist_id(), pair[1].artist_id(), "back-to-back artist");
    }
}

#[cfg(test)]
mod curve_tests {
    use super::*;

    #[tokio::test]
    async fn test_strict_alternation_follows_curve() {
        let library = alternation_library();
        let request = GenerationRequest::with_plan(Template::StrictAlternation, forty_minutes());
        let outcome = generate(&library, &request, 7).await;

        let curve = build_curve(Template::StrictAlternation, &forty_minutes(), 4.0);
        assert_eq!(curve.len(), 10);
        assert_eq!(outcome.picks.len(), 10);

        let tiers: Vec<EffortTier> = outcome.picks.iter().map(|p| p.tier).collect();
        let planned: Vec<EffortTier> = curve.iter().map(|s| s.tier).collect();
        assert_eq!(tiers, planned);
        assert_eq!(tiers[0], EffortTier::Easy);
        assert_eq!(tiers[9], EffortTier::Easy);
        for position in [1, 3, 5, 7] {
            assert_eq!(tiers[position], EffortTier::Hard, "slot {position}");
        }
        assert!(!tiers.contains(&EffortTier::Max));

        // Hard slots hold the Hard-profile tracks and vice versa
        for pick in &outcome.picks {
            let expected = if pick.tier == EffortTier::Hard { 'h' } else { 'e' };
            assert!(pick.track_id().starts_with(expected), "{} in {:?}", pick.track_id(), pick.tier);
            assert!(pick.relaxation.is_none());
        }

        assert_eq!(outcome.stats.total_seconds, 2400);
        assert!(!outcome.stats.under_duration);
        assert_eq!(outcome.stats.slots_skipped, 0);
        assert_eq!(outcome.name, "HIIT · 40 min");
        assert_no_adjacent_artists(&outcome);
    }

    #[tokio::test]
    async fn test_duration_lands_within_window() {
        let mut library = Library::default();
        // six artists, mixed lengths, both profiles
        for i in 0..60 {
            let artist = format!("a{}", i % 6);
            let seconds = 200 + (i as u64 * 17) % 100;
            let profile = if i % 2 == 0 { EASY } else { HARD };
            library.add(&format!("t{i:02}"), &artist, "pop", seconds, profile);
        }

        for seed in 0..5 {
            let request = GenerationRequest::with_plan(Template::StrictAlternation, forty_minutes());
            let outcome = generate(&library, &request, seed).await;
            let stats = &outcome.stats;

            assert!(stats.total_seconds <= stats.max_seconds, "seed {seed} ran long");
            assert_eq!(stats.under_duration, stats.total_seconds < stats.min_seconds);
            assert_no_adjacent_artists(&outcome);

            let mut per_artist: HashMap<&str, usize> = HashMap::new();
            for pick in &outcome.picks {
                *per_artist.entry(pick.artist_id()).or_insert(0) += 1;
            }
            assert!(per_artist.values().all(|n| *n <= 2), "seed {seed} broke the artist cap");
        }
    }
}

#[cfg(test)]
mod exhaustion_tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_pool_is_an_error() {
        let mut library = Library::default();
        // every track is longer than six minutes
        for i in 0..5 {
            library.add(&format!("long{i}"), &format!("a{i}"), "rock", 500, EASY);
        }
        let request = GenerationRequest::with_plan(Template::Pyramid, forty_minutes());
        let err = generator(library.memory_cache())
            .generate(&request, &AlwaysPlayable, 1, now())
            .await
            .unwrap_err();
        assert!(err.is_empty_pool());
    }

    #[tokio::test]
    async fn test_tail_extension_covers_skipped_core() {
        // Only Easy slots can be filled, so half the core is skipped and the
        // tail has to make up fifteen tracks
        let mut library = Library::default();
        for i in 0..100 {
            library.add(&format!("s{i:03}"), &format!("sa{i:03}"), "folk", 240, (150.0, 0.3, 0.3));
        }
        let request = GenerationRequest::with_plan(Template::StrictAlternation, DurationPlan::new(4.0, 120.0, 4.0));
        let outcome = generate(&library, &request, 3).await;
        let stats = &outcome.stats;

        assert_eq!(stats.slots_skipped, 15);
        assert_eq!(stats.extension_slots, 15);
        assert!(!stats.under_duration, "stopped at {}s of {}s", stats.total_seconds, stats.min_seconds);
        assert!(stats.total_seconds >= stats.min_seconds && stats.total_seconds <= stats.max_seconds);
        assert!(!outcome
            .events
            .events()
            .iter()
            .any(|e| matches!(e, GenerationEvent::UnderDuration { .. })));
        assert_no_adjacent_artists(&outcome);
    }

    #[tokio::test]
    async fn test_genre_filter_with_no_match_reports_filters() {
        let library = alternation_library();
        let request = GenerationRequest::with_plan(Template::Pyramid, forty_minutes()).genres(vec!["jazz".to_string()]);
        let err = generator(library.memory_cache())
            .generate(&request, &AlwaysPlayable, 1, now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            stride::error::GenerationError::EmptyPool { genre_filters_active: true }
        ));
    }

    #[tokio::test]
    async fn test_single_artist_library_runs_short() {
        let mut library = Library::default();
        for i in 0..5 {
            library.add(&format!("solo{i}"), "solo", "rock", 240, EASY);
        }
        let request = GenerationRequest::with_plan(Template::StrictAlternation, forty_minutes());
        let outcome = generate(&library, &request, 3).await;

        // the same artist can never follow itself
        assert_eq!(outcome.picks.len(), 1);
        assert!(outcome.stats.under_duration);
        assert!(outcome.stats.slots_skipped > 0);
        assert!(outcome
            .events
            .events()
            .iter()
            .any(|e| matches!(e, GenerationEvent::UnderDuration { .. })));
    }

    #[tokio::test]
    async fn test_thin_genre_pool_is_broadened() {
        let mut library = alternation_library();
        // a handful of punk tracks; rock is a neighbor of punk
        for i in 0..4 {
            library.add(&format!("p{i}"), &format!("pa{i}"), "skate punk", 240, EASY);
        }
        let request = GenerationRequest::with_plan(Template::StrictAlternation, forty_minutes()).genres(vec!["punk".to_string()]);
        let outcome = generate(&library, &request, 5).await;

        assert!(outcome.stats.pool_broadened);
        assert_eq!(outcome.stats.pool_size, 54);
        assert!(outcome
            .events
            .events()
            .iter()
            .any(|e| matches!(e, GenerationEvent::PoolBroadened { before: 4, after: 54 })));
        assert!(outcome.picks.iter().all(|p| p.candidate.genre_affinity > 0.0));
    }
}

#[cfg(test)]
mod relaxation_tests {
    use super::*;

    /// Easy slots have plenty of candidates; Hard slots only have tracks
    /// that were played five days ago.
    fn locked_hard_library() -> Library {
        let mut library = Library::default();
        for i in 0..30 {
            // sits on the Easy window edge and is too flat for Moderate
            library.add(&format!("e{i:02}"), &format!("ea{i:02}"), "rock", 240, (150.0, 0.3, 0.3));
        }
        for i in 0..6 {
            let id = format!("h{i}");
            library.add(&id, &format!("ha{i}"), "rock", 240, HARD);
            library.used(&id, 5);
        }
        library
    }

    #[tokio::test]
    async fn test_ladder_order_and_single_lockout_break() {
        let library = locked_hard_library();
        let request = GenerationRequest::with_plan(Template::StrictAlternation, forty_minutes());
        let outcome = generate(&library, &request, 11).await;
        let steps = outcome.events.relaxations();

        // first Hard slot walks every rung and breaks the lockout
        let first: Vec<(RelaxStep, RelaxOutcome)> = steps.iter().filter(|(slot, ..)| *slot == 1).map(|(_, s, o)| (*s, *o)).collect();
        assert_eq!(first.len(), 4);
        assert_eq!(first[0], (RelaxStep::AdjacentTier, RelaxOutcome::Empty));
        assert_eq!(first[1], (RelaxStep::SecondTier, RelaxOutcome::Empty));
        assert_eq!(first[2], (RelaxStep::NeighborGenres, RelaxOutcome::NotApplicable));
        assert_eq!(first[3].0, RelaxStep::LockoutBreak);
        assert!(matches!(first[3].1, RelaxOutcome::Found(_)));

        // later Hard slots find the lockout rung spent
        for slot in [3, 5, 7] {
            let last = steps.iter().filter(|(s, ..)| *s == slot).last().unwrap();
            assert_eq!((last.1, last.2), (RelaxStep::LockoutBreak, RelaxOutcome::CapReached));
        }

        // per slot, rungs are tried in ladder order
        let mut by_slot: HashMap<usize, Vec<u8>> = HashMap::new();
        for (slot, step, _) in &steps {
            by_slot.entry(*slot).or_default().push(step.number());
        }
        for numbers in by_slot.values() {
            assert!(numbers.windows(2).all(|w| w[0] < w[1]));
        }

        let breaks: Vec<_> = outcome.picks.iter().filter(|p| p.relaxation == Some(RelaxStep::LockoutBreak)).collect();
        assert_eq!(breaks.len(), 1);
        assert!(breaks[0].candidate.within_lockout);
        assert_eq!(outcome.stats.lockout_breaks, 1);
        assert!(outcome.slot_reports().iter().filter(|r| r.broke_lockout).count() == 1);

        // skipped Hard slots are made up for with Easy extension slots
        assert!(outcome.stats.extension_slots > 0);
        assert!(!outcome.stats.under_duration);
    }
}

#[cfg(test)]
mod variety_tests {
    use super::*;

    #[tokio::test]
    async fn test_rediscovery_share_meets_target() {
        let mut library = Library::default();
        for i in 0..60 {
            let id = format!("t{i:02}");
            library.add(&id, &format!("a{i:02}"), "indie", 240, EASY);
            // half long forgotten, half played recently but outside the lockout
            library.used(&id, if i % 2 == 0 { 90 } else { 20 });
        }

        let mut fractions = Vec::new();
        for seed in 0..8 {
            let request = GenerationRequest::with_plan(Template::SteadyLow, forty_minutes());
            let outcome = generate(&library, &request, seed).await;
            assert!(!outcome.picks.is_empty());
            let rediscovered = outcome.picks.iter().filter(|p| p.candidate.rediscovery).count();
            fractions.push(rediscovered as f64 / outcome.picks.len() as f64);
        }
        let mean = fractions.iter().sum::<f64>() / fractions.len() as f64;
        assert!(mean >= 0.4, "mean rediscovery share {mean}");
    }

    #[tokio::test]
    async fn test_same_seed_same_playlist() {
        let library = alternation_library();
        let request = GenerationRequest::with_plan(Template::Pyramid, forty_minutes());
        let first = generate(&library, &request, 99).await;
        let second = generate(&library, &request, 99).await;
        assert_eq!(first.track_ids(), second.track_ids());
        assert_eq!(first.stats, second.stats);
    }
}

#[cfg(test)]
mod comparison_tests {
    use super::*;

    fn small_plan() -> BatchPlan {
        BatchPlan {
            templates: vec![Template::StrictAlternation, Template::SteadyLow],
            durations: vec![20, 30],
            genre_sets: vec![Vec::new(), vec!["rock".to_string()]],
            runs_per_combo: 2,
            ..BatchPlan::default()
        }
    }

    #[tokio::test]
    async fn test_batch_covers_every_combination() -> Result<()> {
        let generator = generator(alternation_library().memory_cache());
        let batch = run_batch(&generator, &small_plan(), &AlwaysPlayable, 100, now()).await;

        assert!(batch.failures.is_empty());
        assert_eq!(batch.runs.len(), 16);
        for (i, run) in batch.runs.iter().enumerate() {
            assert_eq!(run.seed, 100 + i as u64);
            assert!(!run.tracks.is_empty());
        }

        let report = batch.compare()?;
        assert_eq!(report.generations_compared, 16);
        assert_eq!(report.template_scores.keys().collect::<Vec<_>>(), vec!["hiit", "light"]);
        assert_eq!(report.genre_filter.with_filter_runs, 8);
        assert_eq!(report.genre_filter.without_filter_runs, 8);
        assert_eq!(report.decade_filter.with_filter_runs, 0);
        // 16 playlists drawn from 50 tracks must reuse some
        assert!(report.track_overlap_rate > 0.0);
        assert!(report.unique_tracks <= 50);
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_is_reproducible() -> Result<()> {
        let library = alternation_library();
        let first = run_batch(&generator(library.memory_cache()), &small_plan(), &AlwaysPlayable, 7, now()).await;
        let second = run_batch(&generator(library.memory_cache()), &small_plan(), &AlwaysPlayable, 7, now()).await;

        assert_eq!(first.runs, second.runs);
        assert_eq!(first.compare()?, second.compare()?);
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_records_failures() {
        let generator = generator(Library::default().memory_cache());
        let plan = small_plan();
        let batch = run_batch(&generator, &plan, &AlwaysPlayable, 0, now()).await;

        assert!(batch.runs.is_empty());
        assert_eq!(batch.failures.len(), plan.requests().len());
        assert!(batch.failures[0].label.starts_with("hiit/20min"));
        assert!(batch.compare().is_err());
    }
}

mod persistence_tests {
    use super::*;

    fn sqlite_cache(library: &Library) -> Result<(TempDir, Arc<SqliteCache>)> {
        let temp_dir = TempDir::new()?;
        let cache = SqliteCache::open(&temp_dir.path().join("library.db"))?;
        cache.import(&library.dump())?;
        Ok((temp_dir, Arc::new(cache)))
    }

    #[tokio::test]
    async fn test_json_dump_imports_into_sqlite() -> Result<()> {
        let raw = r#"{
            "tracks": [
                {"id": "t1", "title": "One", "artistId": "a1", "artistName": "A", "durationMs": 240000, "releaseYear": 1994},
                {"id": "t2", "title": "Two", "artistId": "a2", "artistName": "B", "durationMs": 200000, "playable": false, "source": "recs"}
            ],
            "audioFeatures": [{"trackId": "t1", "tempo": 160.0, "energy": 0.6, "danceability": 0.5}],
            "artists": [{"id": "a1", "name": "A", "genres": ["grunge"]}],
            "usage": [{"trackId": "t1", "lastUsed": "2024-05-01T12:00:00Z", "useCount": 3}]
        }"#;
        let dump: LibraryDump = serde_json::from_str(raw)?;

        let temp_dir = TempDir::new()?;
        let cache = SqliteCache::open(&temp_dir.path().join("library.db"))?;
        let counts = cache.import(&dump)?;
        assert_eq!(counts.tracks, 2);
        assert_eq!(counts.playable_tracks, 1);
        assert_eq!(counts.audio_features, 1);
        assert_eq!(counts.used_tracks, 1);
        assert_eq!(cache.usage_of("t1")?.map(|u| u.use_count), Some(3));

        // importing again replaces rather than duplicates
        let counts = cache.import(&dump)?;
        assert_eq!(counts.tracks, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_publishes_and_records_usage() -> Result<()> {
        let library = alternation_library();
        let (_dir, cache) = sqlite_cache(&library)?;
        let generator = Generator::new(cache.clone(), Box::new(KeywordTaxonomy), GeneratorConfig::default());
        let sink = MemorySink::default();
        let request = GenerationRequest::with_plan(Template::StrictAlternation, forty_minutes());

        let result = generator.run(&request, &AlwaysPlayable, &sink, 21, now(), false).await?;
        let ids = result.outcome.track_ids();
        assert!(result.playlist.is_some());
        assert_eq!(result.usage_recorded, ids.len());
        assert_eq!(sink.published()?[0].track_ids, ids);

        for id in &ids {
            let usage = cache.usage_of(id)?.expect("usage recorded");
            assert_eq!(usage.use_count, 1);
            assert_eq!(usage.last_used, now());
        }

        // a retried write with the same timestamp changes nothing
        let mut log = EventLog::new();
        record_usage(cache.as_ref(), &ids, now(), &mut log).await?;
        assert_eq!(cache.usage_of(&ids[0])?.map(|u| u.use_count), Some(1));

        // tracks just used are locked out of the next run
        let next = generator.generate(&request, &AlwaysPlayable, 21, now()).await?;
        assert!(next.track_ids().iter().all(|id| !ids.contains(id)));
        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_leaves_cache_untouched() -> Result<()> {
        let library = alternation_library();
        let (_dir, cache) = sqlite_cache(&library)?;
        let generator = Generator::new(cache.clone(), Box::new(KeywordTaxonomy), GeneratorConfig::default());
        let sink = MemorySink::default();
        let request = GenerationRequest::with_plan(Template::StrictAlternation, forty_minutes());

        let result = generator.run(&request, &AlwaysPlayable, &sink, 4, now(), true).await?;
        assert!(result.playlist.is_none());
        assert_eq!(result.usage_recorded, 0);
        assert!(sink.published()?.is_empty());
        assert_eq!(cache.counts()?.used_tracks, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_report_serializes_camel_case() -> Result<()> {
        let library = alternation_library();
        let request = GenerationRequest::with_plan(Template::StrictAlternation, forty_minutes());
        let outcome = generate(&library, &request, 2).await;
        let json = serde_json::to_value(outcome.report())?;

        assert_eq!(json["trackIds"].as_array().map(Vec::len), Some(10));
        assert_eq!(json["efforts"][0], "easy");
        assert_eq!(json["sources"][0], "likes");
        assert_eq!(json["totalSeconds"], 2400);
        assert!(json["slots"][1]["tempoFit"].is_number());

        let evaluation = stride::evaluate::evaluate(&request, &outcome);
        assert!(evaluation.all_passed, "{evaluation}");
        assert!(evaluation.overall > 5.0);
        Ok(())
    }
}
