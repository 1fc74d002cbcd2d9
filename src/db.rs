//! SQLite-backed [`LibraryCache`].
//!
//! One file holds four tables mirroring the library records. Bulk loads go
//! through a single transaction; usage writes are `ON CONFLICT` upserts keyed
//! by track id, so two runs recording the same track cannot clobber each
//! other's counts.

use crate::cache::LibraryCache;
use crate::library::{Artist, AudioFeature, Track, UsageRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tracks (
        id            TEXT PRIMARY KEY,
        title         TEXT    NOT NULL,
        artist_id     TEXT    NOT NULL,
        artist_name   TEXT    NOT NULL,
        duration_ms   INTEGER NOT NULL,
        album         TEXT    NOT NULL DEFAULT '',
        release_year  INTEGER,
        explicit      INTEGER NOT NULL DEFAULT 0,
        playable      INTEGER NOT NULL DEFAULT 1,
        source        TEXT    NOT NULL DEFAULT 'likes'
    );
    CREATE TABLE IF NOT EXISTS audio_features (
        track_id       TEXT PRIMARY KEY,
        tempo          REAL,
        energy         REAL,
        danceability   REAL,
        valence        REAL,
        loudness       REAL,
        key            INTEGER,
        mode           INTEGER,
        time_signature INTEGER
    );
    CREATE TABLE IF NOT EXISTS artists (
        id         TEXT PRIMARY KEY,
        name       TEXT NOT NULL,
        genres     TEXT NOT NULL DEFAULT '[]',
        popularity INTEGER
    );
    CREATE TABLE IF NOT EXISTS track_usage (
        track_id     TEXT PRIMARY KEY,
        last_used_ms INTEGER NOT NULL,
        use_count    INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_tracks_artist ON tracks(artist_id);
";

/// Everything an ingestion step hands over, as one JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDump {
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub audio_features: Vec<AudioFeature>,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub usage: Vec<UsageRecord>,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryCounts {
    pub tracks: usize,
    pub audio_features: usize,
    pub artists: usize,
    pub used_tracks: usize,
    pub playable_tracks: usize,
}

pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open (or create) the cache file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open library cache at {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().context("Failed to open in-memory cache")?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create library cache schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Library cache connection lock poisoned"))
    }

    /// Bulk-load a dump in one transaction. Existing rows with the same key
    /// are replaced.
    pub fn import(&self, dump: &LibraryDump) -> Result<LibraryCounts> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO tracks
                 (id, title, artist_id, artist_name, duration_ms, album, release_year, explicit, playable, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for track in &dump.tracks {
                stmt.execute(params![
                    track.id,
                    track.title,
                    track.artist_id,
                    track.artist_name,
                    i64::try_from(track.duration_ms).unwrap_or(i64::MAX),
                    track.album,
                    track.release_year,
                    track.explicit,
                    track.playable,
                    track.source.as_str(),
                ])
                .with_context(|| format!("Failed to insert track {}", track.id))?;
            }

            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO audio_features
                 (track_id, tempo, energy, danceability, valence, loudness, key, mode, time_signature)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for f in &dump.audio_features {
                stmt.execute(params![
                    f.track_id,
                    f.tempo,
                    f.energy,
                    f.danceability,
                    f.valence,
                    f.loudness,
                    f.key,
                    f.mode,
                    f.time_signature,
                ])
                .with_context(|| format!("Failed to insert audio features for {}", f.track_id))?;
            }

            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO artists (id, name, genres, popularity) VALUES (?1, ?2, ?3, ?4)")?;
            for artist in &dump.artists {
                let genres = serde_json::to_string(&artist.genres)?;
                stmt.execute(params![artist.id, artist.name, genres, artist.popularity])
                    .with_context(|| format!("Failed to insert artist {}", artist.id))?;
            }

            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO track_usage (track_id, last_used_ms, use_count) VALUES (?1, ?2, ?3)",
            )?;
            for record in &dump.usage {
                stmt.execute(params![record.track_id, record.last_used.timestamp_millis(), record.use_count])
                    .with_context(|| format!("Failed to insert usage for {}", record.track_id))?;
            }
        }

        tx.commit().context("Committing library import failed")?;
        drop(conn);

        let counts = self.counts()?;
        info!(
            "Imported library: {} tracks, {} features, {} artists",
            counts.tracks, counts.audio_features, counts.artists
        );
        Ok(counts)
    }

    pub fn counts(&self) -> Result<LibraryCounts> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn
                .query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("Count query failed: {sql}"))?;
            Ok(usize::try_from(n).unwrap_or(0))
        };
        Ok(LibraryCounts {
            tracks: count("SELECT COUNT(*) FROM tracks")?,
            audio_features: count("SELECT COUNT(*) FROM audio_features")?,
            artists: count("SELECT COUNT(*) FROM artists")?,
            used_tracks: count("SELECT COUNT(*) FROM track_usage")?,
            playable_tracks: count("SELECT COUNT(*) FROM tracks WHERE playable = 1")?,
        })
    }

    /// Current usage record for one track.
    pub fn usage_of(&self, track_id: &str) -> Result<Option<UsageRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT track_id, last_used_ms, use_count FROM track_usage WHERE track_id = ?1",
            [track_id],
            usage_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to read usage for {track_id}"))
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn usage_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageRecord> {
    Ok(UsageRecord {
        track_id: row.get(0)?,
        last_used: from_millis(row.get(1)?),
        use_count: row.get(2)?,
    })
}

#[async_trait]
impl LibraryCache for SqliteCache {
    async fn fetch_tracks(&self) -> Result<Vec<Track>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, artist_id, artist_name, duration_ms, album, release_year, explicit, playable, source
                 FROM tracks ORDER BY id",
            )
            .context("Invalid SQL statement when selecting tracks")?;
        let tracks = stmt
            .query_map([], |row| {
                let duration_ms: i64 = row.get(4)?;
                let source: String = row.get(9)?;
                Ok(Track {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    artist_id: row.get(2)?,
                    artist_name: row.get(3)?,
                    duration_ms: u64::try_from(duration_ms).unwrap_or(0),
                    album: row.get(5)?,
                    release_year: row.get(6)?,
                    explicit: row.get(7)?,
                    playable: row.get(8)?,
                    source: source.parse().unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read tracks")?;
        debug!("Fetched {} tracks", tracks.len());
        Ok(tracks)
    }

    async fn fetch_audio_features(&self) -> Result<Vec<AudioFeature>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT track_id, tempo, energy, danceability, valence, loudness, key, mode, time_signature
             FROM audio_features ORDER BY track_id",
        )?;
        let features = stmt
            .query_map([], |row| {
                Ok(AudioFeature {
                    track_id: row.get(0)?,
                    tempo: row.get(1)?,
                    energy: row.get(2)?,
                    danceability: row.get(3)?,
                    valence: row.get(4)?,
                    loudness: row.get(5)?,
                    key: row.get(6)?,
                    mode: row.get(7)?,
                    time_signature: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read audio features")?;
        Ok(features)
    }

    async fn fetch_artists(&self) -> Result<Vec<Artist>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, genres, popularity FROM artists ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<u32>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read artists")?;

        rows.into_iter()
            .map(|(id, name, genres, popularity)| {
                let genres: Vec<String> = serde_json::from_str(&genres)
                    .with_context(|| format!("Corrupt genre list for artist {id}"))?;
                Ok(Artist {
                    id,
                    name,
                    genres,
                    popularity,
                })
            })
            .collect()
    }

    async fn fetch_usage(&self) -> Result<Vec<UsageRecord>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT track_id, last_used_ms, use_count FROM track_usage ORDER BY track_id")?;
        let usage = stmt
            .query_map([], usage_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read usage")?;
        Ok(usage)
    }

    async fn upsert_usage(&self, track_id: &str, used_at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO track_usage (track_id, last_used_ms, use_count) VALUES (?1, ?2, 1)
             ON CONFLICT(track_id) DO UPDATE SET
                 use_count = CASE
                     WHEN track_usage.last_used_ms = excluded.last_used_ms THEN track_usage.use_count
                     ELSE track_usage.use_count + 1
                 END,
                 last_used_ms = excluded.last_used_ms",
            params![track_id, used_at.timestamp_millis()],
        )
        .with_context(|| format!("Failed to upsert usage for {track_id}"))?;
        Ok(())
    }
}
