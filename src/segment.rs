//! The `Segment`: the atomic unit of caching. Pure metadata — no payload
//! lives here, only what the index needs to answer coverage questions and
//! what the store needs to locate the bytes on disk.

use serde::{Deserialize, Serialize};

use crate::types::{DataType, Instant, Symbol};

pub type SegmentId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub symbol: Symbol,
    pub data_type: DataType,
    pub t_start: Instant,
    pub t_end: Instant,
    /// Relative filename under the cache directory, never an absolute
    /// path, so the cache directory as a whole stays relocatable.
    pub file_path: Option<String>,
    pub created_at: Instant,
    pub record_count: usize,
}

impl Segment {
    /// Whether `[t0, t1]` intersects this segment's `[t_start, t_end]`,
    /// covering partial overlap at either end, containment in either
    /// direction, and exact matches.
    pub fn intersects(&self, t0: Instant, t1: Instant) -> bool {
        self.t_start <= t1 && t0 <= self.t_end
    }
}

/// Deterministic, human-readable segment identifier. Collisions would
/// imply two segments claim the identical `(symbol, data_type, t_start,
/// t_end)` tuple, which the index's overlap check already forbids.
pub fn make_segment_id(symbol: &str, data_type: DataType, t_start: Instant, t_end: Instant) -> SegmentId {
    format!("{symbol}_{data_type:?}_{t_start}_{t_end}")
}
