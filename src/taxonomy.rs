//! # Genre Taxonomy
//!
//! Artists arrive with free-text genre tags ("uk garage", "alt-country",
//! "melodic death metal"). Filters and diversity work on a small set of
//! umbrella categories instead. The engine only consumes the pure functions
//! of [`GenreTaxonomy`]; [`KeywordTaxonomy`] is the stock implementation.

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Umbrella id → weight in [0,1].
pub type UmbrellaWeights = HashMap<String, f64>;

/// Resolves free-text genre tags into umbrella categories.
pub trait GenreTaxonomy: Send + Sync {
    /// Umbrellas matched by the tags, primary first, without duplicates.
    fn umbrellas(&self, genres: &[String]) -> Vec<String>;

    /// Umbrellas adjacent to `umbrella` (e.g. punk ↔ rock).
    fn neighbors(&self, umbrella: &str) -> Vec<String>;

    /// Strongest weight any of the artist's umbrellas carries in `target`.
    fn affinity(&self, genres: &[String], target: &UmbrellaWeights) -> f64 {
        self.umbrellas(genres)
            .iter()
            .filter_map(|u| target.get(u))
            .fold(0.0_f64, |best, w| best.max(*w))
            .clamp(0.0, 1.0)
    }

    /// Selected umbrellas at 1.0 plus their neighbors at `neighbor_weight`.
    fn neighbor_weights(&self, selected: &[String], neighbor_weight: f64) -> UmbrellaWeights {
        let mut weights = selected_weights(selected);
        for umbrella in selected {
            for neighbor in self.neighbors(umbrella) {
                weights.entry(neighbor).or_insert(neighbor_weight);
            }
        }
        weights
    }

    #[must_use]
    fn primary_umbrella(&self, genres: &[String]) -> Option<String> {
        self.umbrellas(genres).into_iter().next()
    }

    /// Map user-facing filter names onto umbrella ids. Names the taxonomy
    /// does not know are kept verbatim.
    fn resolve_filters(&self, filters: &[String]) -> Vec<String> {
        let mut resolved: Vec<String> = Vec::new();
        for filter in filters {
            let umbrella = self
                .primary_umbrella(std::slice::from_ref(filter))
                .unwrap_or_else(|| filter.trim().to_ascii_lowercase());
            if !resolved.contains(&umbrella) {
                resolved.push(umbrella);
            }
        }
        resolved
    }
}

/// Weight 1.0 for each selected umbrella and nothing else.
#[must_use]
pub fn selected_weights(selected: &[String]) -> UmbrellaWeights {
    selected.iter().map(|u| (u.clone(), 1.0)).collect()
}

lazy_static! {
    /// Umbrella → substrings that identify it. Checked in order, so more
    /// specific umbrellas come first ("indie rock" is indie before rock).
    static ref UMBRELLA_KEYWORDS: Vec<(&'static str, Vec<&'static str>)> = vec![
        ("metal", vec!["metal", "metalcore", "grindcore", "djent", "thrash"]),
        ("punk", vec!["punk", "emo", "hardcore", "post-hardcore"]),
        ("indie", vec!["indie", "shoegaze", "lo-fi", "bedroom pop", "dream pop"]),
        ("hiphop", vec!["hip hop", "hip-hop", "rap", "trap", "drill", "grime"]),
        ("electronic", vec![
            "edm", "house", "techno", "trance", "electro", "dubstep", "drum and bass",
            "dnb", "garage", "synthwave", "electronic", "dance",
        ]),
        ("rnb", vec!["r&b", "rnb", "soul", "funk", "neo soul", "motown"]),
        ("latin", vec!["latin", "reggaeton", "salsa", "bachata", "cumbia", "samba"]),
        ("country", vec!["country", "americana", "bluegrass", "honky"]),
        ("jazz", vec!["jazz", "swing", "bebop", "bossa"]),
        ("classical", vec!["classical", "orchestra", "baroque", "opera", "soundtrack"]),
        ("folk", vec!["folk", "singer-songwriter", "acoustic"]),
        ("reggae", vec!["reggae", "dancehall", "ska", "dub"]),
        ("rock", vec!["rock", "grunge", "britpop", "new wave"]),
        ("pop", vec!["pop", "k-pop", "j-pop", "boy band", "girl group"]),
    ];

    static ref UMBRELLA_NEIGHBORS: HashMap<&'static str, Vec<&'static str>> = {
        let mut m = HashMap::new();
        m.insert("metal", vec!["rock", "punk"]);
        m.insert("punk", vec!["rock", "metal", "indie"]);
        m.insert("indie", vec!["rock", "pop", "folk"]);
        m.insert("hiphop", vec!["rnb", "electronic", "pop"]);
        m.insert("electronic", vec!["pop", "hiphop"]);
        m.insert("rnb", vec!["hiphop", "pop", "jazz"]);
        m.insert("latin", vec!["pop", "reggae"]);
        m.insert("country", vec!["folk", "rock"]);
        m.insert("jazz", vec!["rnb", "classical"]);
        m.insert("classical", vec!["jazz"]);
        m.insert("folk", vec!["indie", "country"]);
        m.insert("reggae", vec!["latin", "hiphop"]);
        m.insert("rock", vec!["indie", "punk", "metal"]);
        m.insert("pop", vec!["indie", "electronic", "rnb"]);
        m
    };
}

/// Substring-matching taxonomy backed by a static keyword table.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordTaxonomy;

impl KeywordTaxonomy {
    /// Every umbrella id the keyword table knows, in match order.
    #[must_use]
    pub fn umbrella_ids() -> Vec<&'static str> {
        UMBRELLA_KEYWORDS.iter().map(|(umbrella, _)| *umbrella).collect()
    }
}

impl GenreTaxonomy for KeywordTaxonomy {
    fn umbrellas(&self, genres: &[String]) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for tag in genres {
            let tag = tag.to_ascii_lowercase();
            for (umbrella, keywords) in UMBRELLA_KEYWORDS.iter() {
                if keywords.iter().any(|k| tag.contains(k)) && !found.iter().any(|f| f == umbrella) {
                    found.push((*umbrella).to_string());
                }
            }
        }
        found
    }

    fn neighbors(&self, umbrella: &str) -> Vec<String> {
        UMBRELLA_NEIGHBORS
            .get(umbrella)
            .map(|n| n.iter().map(|s| (*s).to_string()).collect())
            .unwrap_or_default()
    }
}
