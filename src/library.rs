//! # Library Data Model
//!
//! Records supplied by the library cache: tracks, their audio features,
//! artists and per-track usage history. [`LibrarySnapshot`] bundles one
//! consistent read of all four so a generation run never talks to the cache
//! more than once on the read path.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Where a cached track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The user's own saved tracks
    #[default]
    Likes,
    /// Recommendations seeded from the user's taste
    Recs,
    /// Third-party curated sources
    Third,
}

impl SourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Likes => "likes",
            Self::Recs => "recs",
            Self::Third => "third",
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "likes" => Ok(Self::Likes),
            "recs" => Ok(Self::Recs),
            "third" => Ok(Self::Third),
            other => anyhow::bail!("Unknown track source: '{other}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist_id: String,
    pub artist_name: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default = "default_playable")]
    pub playable: bool,
    #[serde(default)]
    pub source: SourceKind,
}

const fn default_playable() -> bool {
    true
}

impl Track {
    #[must_use]
    pub fn duration_seconds(&self) -> u64 {
        self.duration_ms / 1000
    }
}

/// Audio analysis for one track. Only tempo, energy and danceability feed
/// the engine; the rest is stored as delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFeature {
    pub track_id: String,
    #[serde(default)]
    pub tempo: Option<f64>,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub danceability: Option<f64>,
    #[serde(default)]
    pub valence: Option<f64>,
    #[serde(default)]
    pub loudness: Option<f64>,
    #[serde(default)]
    pub key: Option<i32>,
    #[serde(default)]
    pub mode: Option<i32>,
    #[serde(default)]
    pub time_signature: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub popularity: Option<u32>,
}

/// Last use and play count for a track. At most one per track id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub track_id: String,
    pub last_used: DateTime<Utc>,
    pub use_count: u32,
}

/// Release-decade bucket used by decade filters and diversity counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Decade {
    #[serde(rename = "1970s")]
    Seventies,
    #[serde(rename = "1980s")]
    Eighties,
    #[serde(rename = "1990s")]
    Nineties,
    #[serde(rename = "2000s")]
    TwoThousands,
    #[serde(rename = "2010s")]
    TwentyTens,
    #[serde(rename = "2020s")]
    TwentyTwenties,
}

impl Decade {
    pub const ALL: [Decade; 6] = [
        Self::Seventies,
        Self::Eighties,
        Self::Nineties,
        Self::TwoThousands,
        Self::TwentyTens,
        Self::TwentyTwenties,
    ];

    /// Bucket for a release year. Years before 1970 fold into the 1970s;
    /// unknown or post-2029 years land in the 2020s.
    #[must_use]
    pub fn from_year(year: Option<i32>) -> Self {
        match year {
            Some(y) if y < 1980 => Self::Seventies,
            Some(y) if y < 1990 => Self::Eighties,
            Some(y) if y < 2000 => Self::Nineties,
            Some(y) if y < 2010 => Self::TwoThousands,
            Some(y) if y < 2020 => Self::TwentyTens,
            _ => Self::TwentyTwenties,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Seventies => "1970s",
            Self::Eighties => "1980s",
            Self::Nineties => "1990s",
            Self::TwoThousands => "2000s",
            Self::TwentyTens => "2010s",
            Self::TwentyTwenties => "2020s",
        }
    }
}

impl fmt::Display for Decade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Decade {
    type Err = anyhow::Error;

    /// Accepts `1990s`, `90s` and `1990`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches(['s', 'S']);
        let year: i32 = trimmed
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown decade: '{s}'"))?;
        let year = match year {
            0..=29 => 2000 + year,
            30..=99 => 1900 + year,
            y => y,
        };
        if !(1970..2030).contains(&year) {
            anyhow::bail!("Decade out of range (1970s-2020s): '{s}'");
        }
        Ok(Self::from_year(Some(year)))
    }
}

/// One consistent read of the library cache.
#[derive(Debug, Clone, Default)]
pub struct LibrarySnapshot {
    pub tracks: Vec<Track>,
    pub features: HashMap<String, AudioFeature>,
    pub artists: HashMap<String, Artist>,
    pub usage: HashMap<String, UsageRecord>,
}

impl LibrarySnapshot {
    /// Index raw cache rows by id. Later duplicates of a usage record replace
    /// earlier ones.
    #[must_use]
    pub fn from_parts(
        tracks: Vec<Track>,
        features: Vec<AudioFeature>,
        artists: Vec<Artist>,
        usage: Vec<UsageRecord>,
    ) -> Self {
        Self {
            tracks,
            features: features
                .into_iter()
                .map(|f| (f.track_id.clone(), f))
                .collect(),
            artists: artists.into_iter().map(|a| (a.id.clone(), a)).collect(),
            usage: usage.into_iter().map(|u| (u.track_id.clone(), u)).collect(),
        }
    }

    #[must_use]
    pub fn artist(&self, artist_id: &str) -> Option<&Artist> {
        self.artists.get(artist_id)
    }

    #[must_use]
    pub fn feature(&self, track_id: &str) -> Option<&AudioFeature> {
        self.features.get(track_id)
    }
}

/// Whole days elapsed between `then` and `now`, never negative.
#[must_use]
pub fn days_between(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let seconds = (now - then).num_seconds().max(0) as f64;
    seconds / 86_400.0
}

/// Usage history folded into the lookups scoring needs.
#[derive(Debug, Clone, Default)]
pub struct UsageHistory {
    /// Most recent use of any track by each artist
    pub artist_last_used: HashMap<String, DateTime<Utc>>,
    /// Umbrella → plays inside the diversity lookback
    pub umbrella_counts: HashMap<String, u32>,
    /// Decade → plays inside the diversity lookback
    pub decade_counts: HashMap<Decade, u32>,
}

impl UsageHistory {
    /// Fold `snapshot.usage` relative to `now`. `umbrella_of` maps an artist
    /// to its primary umbrella category.
    pub fn build(
        snapshot: &LibrarySnapshot,
        now: DateTime<Utc>,
        lookback_days: f64,
        umbrella_of: impl Fn(&Artist) -> Option<String>,
    ) -> Self {
        let tracks: HashMap<&str, &Track> =
            snapshot.tracks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut history = Self::default();

        for record in snapshot.usage.values() {
            let Some(track) = tracks.get(record.track_id.as_str()) else {
                continue;
            };

            history
                .artist_last_used
                .entry(track.artist_id.clone())
                .and_modify(|last| {
                    if record.last_used > *last {
                        *last = record.last_used;
                    }
                })
                .or_insert(record.last_used);

            if days_between(record.last_used, now) <= lookback_days {
                *history
                    .decade_counts
                    .entry(Decade::from_year(track.release_year))
                    .or_insert(0) += 1;
                if let Some(umbrella) = snapshot.artist(&track.artist_id).and_then(&umbrella_of) {
                    *history.umbrella_counts.entry(umbrella).or_insert(0) += 1;
                }
            }
        }

        history
    }

    /// Days since this artist last appeared in any run, if ever.
    #[must_use]
    pub fn days_since_artist(&self, artist_id: &str, now: DateTime<Utc>) -> Option<f64> {
        self.artist_last_used
            .get(artist_id)
            .map(|last| days_between(*last, now))
    }
}
