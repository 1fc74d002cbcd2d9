//! # Candidate Pool
//!
//! Applies the hard filters to a [`LibrarySnapshot`] and materialises the
//! per-run [`Candidate`] list. Building is a pure read; the generator may
//! build more than one pool per run (neighbor-genre broadening, lockout
//! break) from the same snapshot.

use crate::config::GeneratorConfig;
use crate::library::{days_between, Artist, AudioFeature, Decade, LibrarySnapshot, Track};
use crate::taxonomy::{GenreTaxonomy, UmbrellaWeights};
use chrono::{DateTime, Utc};
use log::trace;

/// A track eligible for this run, with everything scoring needs attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub track: Track,
    pub feature: Option<AudioFeature>,
    pub artist: Option<Artist>,
    pub umbrella: Option<String>,
    pub decade: Decade,
    /// Never used, or last used long enough ago to count as a rediscovery
    pub rediscovery: bool,
    pub genre_affinity: f64,
    pub days_since_use: Option<f64>,
    /// Inside the lockout window; only present in lockout-break pools
    pub within_lockout: bool,
}

impl Candidate {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.track.id
    }

    #[must_use]
    pub fn artist_id(&self) -> &str {
        &self.track.artist_id
    }

    #[must_use]
    pub fn tempo(&self) -> Option<f64> {
        self.feature.as_ref().and_then(|f| f.tempo)
    }

    #[must_use]
    pub fn energy(&self) -> Option<f64> {
        self.feature.as_ref().and_then(|f| f.energy)
    }

    #[must_use]
    pub fn danceability(&self) -> Option<f64> {
        self.feature.as_ref().and_then(|f| f.danceability)
    }
}

/// User-requested filters, already resolved to umbrella ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolFilters {
    pub umbrellas: Vec<String>,
    pub decades: Vec<Decade>,
}

impl PoolFilters {
    #[must_use]
    pub fn genre_filters_active(&self) -> bool {
        !self.umbrellas.is_empty()
    }
}

/// Variant knobs for one pool build.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolOptions {
    pub weights: UmbrellaWeights,
    pub enforce_lockout: bool,
}

pub struct CandidatePoolBuilder<'a> {
    snapshot: &'a LibrarySnapshot,
    taxonomy: &'a dyn GenreTaxonomy,
    config: &'a GeneratorConfig,
    filters: &'a PoolFilters,
    now: DateTime<Utc>,
}

impl<'a> CandidatePoolBuilder<'a> {
    #[must_use]
    pub fn new(
        snapshot: &'a LibrarySnapshot,
        taxonomy: &'a dyn GenreTaxonomy,
        config: &'a GeneratorConfig,
        filters: &'a PoolFilters,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            snapshot,
            taxonomy,
            config,
            filters,
            now,
        }
    }

    #[must_use]
    pub fn filters(&self) -> &PoolFilters {
        self.filters
    }

    /// Run every hard filter and tag the survivors.
    #[must_use]
    pub fn build(&self, options: &PoolOptions) -> Vec<Candidate> {
        let pool: Vec<Candidate> = self
            .snapshot
            .tracks
            .iter()
            .filter_map(|track| self.admit(track, options))
            .collect();
        trace!(
            "Pool built: {} of {} tracks (lockout: {})",
            pool.len(),
            self.snapshot.tracks.len(),
            options.enforce_lockout
        );
        pool
    }

    fn admit(&self, track: &Track, options: &PoolOptions) -> Option<Candidate> {
        let feature = self.snapshot.feature(&track.id)?;
        if !track.playable {
            return None;
        }

        let (min_ms, max_ms) = (self.config.min_track_seconds * 1000, self.config.max_track_seconds * 1000);
        if track.duration_ms < min_ms || track.duration_ms > max_ms {
            return None;
        }

        let artist = self.snapshot.artist(&track.artist_id);
        let genres: &[String] = artist.map(|a| a.genres.as_slice()).unwrap_or(&[]);

        let genre_affinity = if self.filters.genre_filters_active() {
            let affinity = self.taxonomy.affinity(genres, &options.weights);
            if affinity <= 0.0 {
                return None;
            }
            affinity
        } else {
            0.0
        };

        let decade = Decade::from_year(track.release_year);
        if !self.filters.decades.is_empty() && !self.filters.decades.contains(&decade) {
            return None;
        }

        let days_since_use = self
            .snapshot
            .usage
            .get(&track.id)
            .map(|u| days_between(u.last_used, self.now));
        let within_lockout = days_since_use.is_some_and(|d| d < self.config.lockout_days);
        if options.enforce_lockout && within_lockout {
            return None;
        }

        let rediscovery = days_since_use.map_or(true, |d| d >= self.config.rediscovery_days);

        Some(Candidate {
            track: track.clone(),
            feature: Some(feature.clone()),
            artist: artist.cloned(),
            umbrella: self.taxonomy.primary_umbrella(genres),
            decade,
            rediscovery,
            genre_affinity,
            days_since_use,
            within_lockout,
        })
    }
}
