//! # Playability Oracle
//!
//! The cache's `playable` flag can be stale by the time a playlist is built,
//! so the selection loop asks an external oracle about each chosen track.
//! Calls are awaited under a timeout; an oracle that does not answer in time
//! (or errors) yields [`Verdict::Unknown`] and the track is kept.

use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[async_trait]
pub trait PlayabilityOracle: Send + Sync {
    async fn is_playable(&self, track_id: &str) -> Result<bool>;

    /// A playable stand-in for `track_id`, when the backend knows one.
    async fn find_alternate(&self, _track_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Accepts everything. Used when the cached flag is the only signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPlayable;

#[async_trait]
impl PlayabilityOracle for AlwaysPlayable {
    async fn is_playable(&self, _track_id: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Fixed answers: listed ids are unplayable, optionally with a known
/// replacement each.
#[derive(Debug, Clone, Default)]
pub struct RejectList {
    unplayable: HashSet<String>,
    alternates: HashMap<String, String>,
}

impl RejectList {
    #[must_use]
    pub fn new<I, S>(unplayable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unplayable: unplayable.into_iter().map(Into::into).collect(),
            alternates: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_alternate(mut self, track_id: impl Into<String>, alternate: impl Into<String>) -> Self {
        self.alternates.insert(track_id.into(), alternate.into());
        self
    }
}

#[async_trait]
impl PlayabilityOracle for RejectList {
    async fn is_playable(&self, track_id: &str) -> Result<bool> {
        Ok(!self.unplayable.contains(track_id))
    }

    async fn find_alternate(&self, track_id: &str) -> Result<Option<String>> {
        Ok(self.alternates.get(track_id).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Playable,
    Unplayable,
    /// Timed out or failed; callers treat it as playable
    Unknown,
}

/// `is_playable` under a deadline.
pub async fn check(oracle: &dyn PlayabilityOracle, track_id: &str, timeout: Duration) -> Verdict {
    match tokio::time::timeout(timeout, oracle.is_playable(track_id)).await {
        Ok(Ok(true)) => Verdict::Playable,
        Ok(Ok(false)) => Verdict::Unplayable,
        Ok(Err(e)) => {
            warn!("Playability check failed for {track_id}: {e:#}");
            Verdict::Unknown
        }
        Err(_) => {
            warn!("Playability check timed out for {track_id} after {timeout:?}");
            Verdict::Unknown
        }
    }
}

/// `find_alternate` under a deadline; failures mean "no alternate".
pub async fn alternate(oracle: &dyn PlayabilityOracle, track_id: &str, timeout: Duration) -> Option<String> {
    match tokio::time::timeout(timeout, oracle.find_alternate(track_id)).await {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            warn!("Alternate lookup failed for {track_id}: {e:#}");
            None
        }
        Err(_) => None,
    }
}
