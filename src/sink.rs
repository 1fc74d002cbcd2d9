//! # Playlist Sink
//!
//! Where a finished playlist goes. The engine only produces an ordered list
//! of track ids; persisting it is a collaborator's job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

/// Handle to a published playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRef {
    pub id: String,
    pub location: String,
}

/// Document written by [`JsonFileSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedPlaylist {
    pub name: String,
    pub description: String,
    pub track_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PlaylistSink: Send + Sync {
    async fn publish(&self, playlist: &PublishedPlaylist) -> Result<PlaylistRef>;
}

/// Writes each playlist as `<dir>/<slug>-<timestamp>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

/// Lowercase ASCII words joined by dashes.
fn slug(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
impl PlaylistSink for JsonFileSink {
    async fn publish(&self, playlist: &PublishedPlaylist) -> Result<PlaylistRef> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create playlist directory {}", self.dir.display()))?;

        let id = format!("{}-{}", slug(&playlist.name), playlist.created_at.format("%Y%m%d%H%M%S"));
        let path = self.dir.join(format!("{id}.json"));
        let body = serde_json::to_vec_pretty(playlist).context("Failed to serialize playlist")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write playlist {}", path.display()))?;

        info!("Published '{}' ({} tracks) to {}", playlist.name, playlist.track_ids.len(), path.display());
        Ok(PlaylistRef {
            id,
            location: path.display().to_string(),
        })
    }
}

/// Keeps published playlists in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    published: Mutex<Vec<PublishedPlaylist>>,
}

impl MemorySink {
    pub fn published(&self) -> Result<Vec<PublishedPlaylist>> {
        let published = self
            .published
            .lock()
            .map_err(|_| anyhow::anyhow!("Playlist store lock poisoned"))?;
        Ok(published.clone())
    }
}

#[async_trait]
impl PlaylistSink for MemorySink {
    async fn publish(&self, playlist: &PublishedPlaylist) -> Result<PlaylistRef> {
        let mut published = self
            .published
            .lock()
            .map_err(|_| anyhow::anyhow!("Playlist store lock poisoned"))?;
        published.push(playlist.clone());
        let id = format!("memory-{}", published.len());
        Ok(PlaylistRef {
            location: id.clone(),
            id,
        })
    }
}
