//! Tail trimming for over-long selections. Order is never changed and
//! nothing is re-scored; tracks leave strictly from the end.

use crate::events::{EventLog, GenerationEvent};
use crate::queue::Pick;

/// Drop tracks from the tail while the total exceeds `max_seconds`, keeping
/// at least one. Returns how many were removed.
pub fn trim_to_bounds(picks: &mut Vec<Pick>, max_seconds: u64, log: &mut EventLog) -> usize {
    let mut total: u64 = picks.iter().map(Pick::seconds).sum();
    let mut trimmed = 0;

    while total > max_seconds && picks.len() > 1 {
        let Some(dropped) = picks.pop() else {
            break;
        };
        total -= dropped.seconds();
        trimmed += 1;
        log.push(GenerationEvent::TrackTrimmed {
            track_id: dropped.track_id().to_string(),
            total_seconds: total,
        });
    }

    trimmed
}
