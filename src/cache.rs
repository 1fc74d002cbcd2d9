//! # Library Cache
//!
//! The engine never talks to a streaming service. Tracks, audio features,
//! artists and usage history come from a [`LibraryCache`] that some ingestion
//! step filled beforehand. Usage is the only thing the engine writes back,
//! always as an upsert keyed by track id.

use crate::events::{EventLog, GenerationEvent};
use crate::library::{Artist, AudioFeature, LibrarySnapshot, Track, UsageRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[async_trait]
pub trait LibraryCache: Send + Sync {
    async fn fetch_tracks(&self) -> Result<Vec<Track>>;
    async fn fetch_audio_features(&self) -> Result<Vec<AudioFeature>>;
    async fn fetch_artists(&self) -> Result<Vec<Artist>>;
    async fn fetch_usage(&self) -> Result<Vec<UsageRecord>>;

    /// Insert with count 1, or set `last_used` and bump the count. A repeat
    /// call with the same timestamp changes nothing.
    async fn upsert_usage(&self, track_id: &str, used_at: DateTime<Utc>) -> Result<()>;
}

impl LibrarySnapshot {
    /// One consistent read of everything the engine needs.
    pub async fn load(cache: &dyn LibraryCache) -> Result<Self> {
        let tracks = cache.fetch_tracks().await.context("Failed to fetch tracks from cache")?;
        let features = cache
            .fetch_audio_features()
            .await
            .context("Failed to fetch audio features from cache")?;
        let artists = cache.fetch_artists().await.context("Failed to fetch artists from cache")?;
        let usage = cache.fetch_usage().await.context("Failed to fetch usage from cache")?;
        Ok(Self::from_parts(tracks, features, artists, usage))
    }
}

/// Upsert semantics shared by the cache implementations.
pub(crate) fn apply_usage(existing: Option<&UsageRecord>, track_id: &str, used_at: DateTime<Utc>) -> UsageRecord {
    match existing {
        Some(record) if record.last_used == used_at => record.clone(),
        Some(record) => UsageRecord {
            track_id: track_id.to_string(),
            last_used: used_at,
            use_count: record.use_count.saturating_add(1),
        },
        None => UsageRecord {
            track_id: track_id.to_string(),
            last_used: used_at,
            use_count: 1,
        },
    }
}

/// Process-local cache, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    tracks: Vec<Track>,
    features: Vec<AudioFeature>,
    artists: Vec<Artist>,
    usage: Mutex<HashMap<String, UsageRecord>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(tracks: Vec<Track>, features: Vec<AudioFeature>, artists: Vec<Artist>, usage: Vec<UsageRecord>) -> Self {
        Self {
            tracks,
            features,
            artists,
            usage: Mutex::new(usage.into_iter().map(|u| (u.track_id.clone(), u)).collect()),
        }
    }

    /// Current record for one track.
    pub fn usage_of(&self, track_id: &str) -> Result<Option<UsageRecord>> {
        let usage = self
            .usage
            .lock()
            .map_err(|_| anyhow::anyhow!("Usage table lock poisoned"))?;
        Ok(usage.get(track_id).cloned())
    }
}

#[async_trait]
impl LibraryCache for MemoryCache {
    async fn fetch_tracks(&self) -> Result<Vec<Track>> {
        Ok(self.tracks.clone())
    }

    async fn fetch_audio_features(&self) -> Result<Vec<AudioFeature>> {
        Ok(self.features.clone())
    }

    async fn fetch_artists(&self) -> Result<Vec<Artist>> {
        Ok(self.artists.clone())
    }

    async fn fetch_usage(&self) -> Result<Vec<UsageRecord>> {
        let usage = self
            .usage
            .lock()
            .map_err(|_| anyhow::anyhow!("Usage table lock poisoned"))?;
        let mut records: Vec<UsageRecord> = usage.values().cloned().collect();
        records.sort_by(|a, b| a.track_id.cmp(&b.track_id));
        Ok(records)
    }

    async fn upsert_usage(&self, track_id: &str, used_at: DateTime<Utc>) -> Result<()> {
        let mut usage = self
            .usage
            .lock()
            .map_err(|_| anyhow::anyhow!("Usage table lock poisoned"))?;
        let record = apply_usage(usage.get(track_id), track_id, used_at);
        usage.insert(track_id.to_string(), record);
        Ok(())
    }
}

/// Write usage for every confirmed track, once per id. Safe to retry with
/// the same `now`.
pub async fn record_usage(cache: &dyn LibraryCache, track_ids: &[String], now: DateTime<Utc>, log: &mut EventLog) -> Result<usize> {
    let mut seen = HashSet::new();
    let mut recorded = 0;
    for track_id in track_ids {
        if !seen.insert(track_id.as_str()) {
            continue;
        }
        cache
            .upsert_usage(track_id, now)
            .await
            .with_context(|| format!("Failed to record usage for track {track_id}"))?;
        recorded += 1;
    }
    info!("Recorded usage for {recorded} tracks");
    log.push(GenerationEvent::UsageRecorded { tracks: recorded });
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_record_usage_inserts_then_increments() {
        let cache = MemoryCache::default();
        let mut log = EventLog::new();
        let ids = vec!["a".to_string(), "b".to_string(), "a".to_string()];

        assert_eq!(record_usage(&cache, &ids, now(), &mut log).await.unwrap(), 2);
        assert_eq!(cache.usage_of("a").unwrap().unwrap().use_count, 1);

        let later = now() + Duration::days(1);
        record_usage(&cache, &ids, later, &mut log).await.unwrap();
        let a = cache.usage_of("a").unwrap().unwrap();
        assert_eq!(a.use_count, 2);
        assert_eq!(a.last_used, later);
    }

    #[tokio::test]
    async fn test_record_usage_is_idempotent_under_retry() {
        let cache = MemoryCache::default();
        let mut log = EventLog::new();
        let ids = vec!["a".to_string()];
        record_usage(&cache, &ids, now(), &mut log).await.unwrap();
        record_usage(&cache, &ids, now(), &mut log).await.unwrap();
        assert_eq!(cache.usage_of("a").unwrap().unwrap().use_count, 1);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_load_indexes_rows() {
        let cache = MemoryCache::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![UsageRecord {
                track_id: "x".to_string(),
                last_used: now(),
                use_count: 3,
            }],
        );
        let snapshot = LibrarySnapshot::load(&cache).await.unwrap();
        assert_eq!(snapshot.usage["x"].use_count, 3);
        assert!(snapshot.tracks.is_empty());
    }
}
