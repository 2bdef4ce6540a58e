//! Timestamp reconstruction for periodic multi-sample payloads.
//!
//! Devices report several past samples in one uplink. Sample `i` was taken
//! `i` intervals before the anchor, so index 0 is the anchor itself and the
//! resulting list is ordered most recent first.

use super::bits::interval_to_duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSample<V> {
    pub timestamp: DateTime<Utc>,
    pub value: V,
}

/// Pairs each value with its timestamp, walking backward from `anchor`.
pub fn reconstruct<V>(
    anchor: DateTime<Utc>,
    interval_index: u8,
    values: impl IntoIterator<Item = V>,
) -> Vec<HistoricalSample<V>> {
    let step = interval_to_duration(interval_index);

    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| HistoricalSample {
            timestamp: step
                .checked_mul(i as i32)
                .and_then(|back| anchor.checked_sub_signed(back))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            value,
        })
        .collect()
}
