//! Hard-stop failures of a generation run. Thin inventories are not errors:
//! skipped slots, playability drops and short playlists are counted in
//! [`crate::generator::GenerationStats`] instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Nothing survived the hard filters, even after neighbor broadening.
    #[error("no candidate tracks survive the filters (genre filters active: {genre_filters_active})")]
    EmptyPool { genre_filters_active: bool },

    /// The library cache could not be read.
    #[error("library cache unavailable")]
    Cache(#[source] anyhow::Error),
}

impl GenerationError {
    /// Whether retrying with looser filters could help.
    #[must_use]
    pub fn is_empty_pool(&self) -> bool {
        matches!(self, Self::EmptyPool { .. })
    }
}
