//! Per-`(symbol, data_type)` ordered segment list: overlap enforcement,
//! missing-range computation, and crash-safe persistence (serde_json +
//! temp-file + atomic rename).

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::segment::{make_segment_id, Segment, SegmentId};
use crate::types::{DataType, Instant, Symbol};

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    symbol: Symbol,
    data_type: DataType,
    segments: Vec<Segment>,
}

/// Persistent, in-memory map from `(symbol, data_type)` to its ordered
/// segment list. Not internally synchronized — `Cache` serializes all
/// access behind a single coarse mutex (see `cache.rs`).
pub struct SegmentIndex {
    path: PathBuf,
    segments: HashMap<(Symbol, DataType), Vec<Segment>>,
}

impl SegmentIndex {
    /// Loads the index from `path`, or starts empty if the file doesn't
    /// exist yet (first run against a fresh cache directory).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let segments = match fs::read(&path) {
            Ok(bytes) => {
                let file: IndexFile = serde_json::from_slice(&bytes)?;
                file.entries
                    .into_iter()
                    .map(|e| ((e.symbol, e.data_type), e.segments))
                    .collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, segments })
    }

    fn persist(&self) -> Result<()> {
        let entries: Vec<IndexEntry> = self
            .segments
            .iter()
            .map(|((symbol, data_type), segments)| IndexEntry {
                symbol: symbol.clone(),
                data_type: *data_type,
                segments: segments.clone(),
            })
            .collect();
        let file = IndexFile { entries };
        let data = serde_json::to_vec_pretty(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        let mut handle = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        handle.write_all(&data)?;
        handle.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Inserts a new segment for `(symbol, data_type)`, rejecting it with
    /// `OverlappingSegment` if it shares interior or an endpoint with any
    /// existing segment for the same key. Touching endpoints are *not*
    /// adjacency: two segments must leave a genuine gap between them.
    pub fn add_segment(
        &mut self,
        symbol: &str,
        data_type: DataType,
        t_start: Instant,
        t_end: Instant,
        file_path: Option<String>,
        created_at: Instant,
        record_count: usize,
    ) -> Result<SegmentId> {
        let key = (symbol.to_string(), data_type);
        let existing = self.segments.entry(key.clone()).or_default();

        for s in existing.iter() {
            let overlaps = (t_start <= s.t_start && s.t_start <= t_end)
                || (t_start <= s.t_end && s.t_end <= t_end)
                || (s.t_start <= t_start && s.t_end >= t_end);
            if overlaps {
                return Err(Error::OverlappingSegment {
                    symbol: symbol.to_string(),
                    data_type,
                });
            }
        }

        let id = make_segment_id(symbol, data_type, t_start, t_end);
        let segment = Segment {
            id: id.clone(),
            symbol: symbol.to_string(),
            data_type,
            t_start,
            t_end,
            file_path,
            created_at,
            record_count,
        };

        let insert_at = existing
            .binary_search_by_key(&t_start, |s| s.t_start)
            .unwrap_or_else(|pos| pos);
        existing.insert(insert_at, segment);

        self.persist()?;
        Ok(id)
    }

    /// Patches a segment's `file_path` after the store write that
    /// produced it has succeeded. The segment's position in the sorted
    /// list never changes since `t_start`/`t_end` are immutable.
    pub fn set_file_path(
        &mut self,
        symbol: &str,
        data_type: DataType,
        id: &str,
        file_path: String,
    ) -> Result<()> {
        if let Some(list) = self.segments.get_mut(&(symbol.to_string(), data_type)) {
            if let Some(s) = list.iter_mut().find(|s| s.id == id) {
                s.file_path = Some(file_path);
            }
        }
        self.persist()
    }

    /// Removes a single segment by id, used to roll back a `Cache::put`
    /// whose store write failed after the index insert succeeded.
    pub fn remove_segment(&mut self, symbol: &str, data_type: DataType, id: &str) -> Result<()> {
        let key = (symbol.to_string(), data_type);
        if let Some(list) = self.segments.get_mut(&key) {
            list.retain(|s| s.id != id);
        }
        self.persist()
    }

    /// Every segment intersecting `[t0, t1]`, ascending by `t_start`.
    pub fn get_segments(&self, symbol: &str, data_type: DataType, t0: Instant, t1: Instant) -> Vec<Segment> {
        self.segments
            .get(&(symbol.to_string(), data_type))
            .map(|list| {
                list.iter()
                    .filter(|s| s.intersects(t0, t1))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The ordered, disjoint sub-ranges of `[t0, t1]` not covered by any
    /// stored segment. Walks segments in `t_start` order, advancing a
    /// cursor and emitting a gap whenever a segment starts after it.
    pub fn missing_ranges(
        &self,
        symbol: &str,
        data_type: DataType,
        t0: Instant,
        t1: Instant,
    ) -> Result<Vec<(Instant, Instant)>> {
        if t0 >= t1 {
            return Err(Error::InvalidRange { t0, t1 });
        }

        let empty = Vec::new();
        let list = self
            .segments
            .get(&(symbol.to_string(), data_type))
            .unwrap_or(&empty);

        let mut gaps = Vec::new();
        let mut cursor = t0;
        for s in list.iter() {
            if !s.intersects(t0, t1) {
                continue;
            }
            if s.t_start > cursor {
                gaps.push((cursor, s.t_start));
            }
            cursor = cursor.max(s.t_end);
        }
        if cursor < t1 {
            gaps.push((cursor, t1));
        }
        Ok(gaps)
    }

    /// Drops all metadata for one symbol, or every symbol when `None`.
    pub fn clear(&mut self, symbol: Option<&str>) -> Result<()> {
        match symbol {
            Some(symbol) => self.segments.retain(|(s, _), _| s != symbol),
            None => self.segments.clear(),
        }
        self.persist()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .segments
            .keys()
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn segment_count(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index(dir: &TempDir) -> SegmentIndex {
        SegmentIndex::load(dir.path().join("cache_segments.json")).unwrap()
    }

    #[test]
    fn empty_index_full_miss() {
        let dir = TempDir::new().unwrap();
        let idx = index(&dir);
        let gaps = idx.missing_ranges("AAPL", DataType::Ohlcv, 0, 10).unwrap();
        assert_eq!(gaps, vec![(0, 10)]);
    }

    #[test]
    fn exact_match_has_no_gaps() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.add_segment("AAPL", DataType::Ohlcv, 0, 10, None, 0, 10)
            .unwrap();
        let gaps = idx.missing_ranges("AAPL", DataType::Ohlcv, 0, 10).unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn gap_in_middle() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.add_segment("AAPL", DataType::Ohlcv, 0, 5, None, 0, 5)
            .unwrap();
        idx.add_segment("AAPL", DataType::Ohlcv, 8, 10, None, 0, 2)
            .unwrap();
        let gaps = idx.missing_ranges("AAPL", DataType::Ohlcv, 0, 10).unwrap();
        assert_eq!(gaps, vec![(5, 8)]);
    }

    #[test]
    fn overlap_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.add_segment("AAPL", DataType::Ohlcv, 0, 10, None, 0, 10)
            .unwrap();
        let err = idx
            .add_segment("AAPL", DataType::Ohlcv, 5, 15, None, 0, 10)
            .unwrap_err();
        assert!(matches!(err, Error::OverlappingSegment { .. }));
    }

    #[test]
    fn touching_endpoints_are_rejected_not_adjacent() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.add_segment("AAPL", DataType::Ohlcv, 0, 10, None, 0, 10)
            .unwrap();
        let err = idx
            .add_segment("AAPL", DataType::Ohlcv, 10, 20, None, 0, 10)
            .unwrap_err();
        assert!(matches!(err, Error::OverlappingSegment { .. }));
    }

    #[test]
    fn adjacent_non_touching_segments_are_accepted() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.add_segment("AAPL", DataType::Ohlcv, 0, 10, None, 0, 10)
            .unwrap();
        idx.add_segment("AAPL", DataType::Ohlcv, 11, 20, None, 0, 10)
            .unwrap();
        let gaps = idx.missing_ranges("AAPL", DataType::Ohlcv, 0, 20).unwrap();
        assert_eq!(gaps, vec![(10, 11)]);
    }

    #[test]
    fn invalid_range_rejected() {
        let dir = TempDir::new().unwrap();
        let idx = index(&dir);
        let err = idx.missing_ranges("AAPL", DataType::Ohlcv, 10, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
    }

    #[test]
    fn clear_resets_coverage() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.add_segment("AAPL", DataType::Ohlcv, 0, 10, None, 0, 10)
            .unwrap();
        idx.clear(Some("AAPL")).unwrap();
        let gaps = idx.missing_ranges("AAPL", DataType::Ohlcv, 0, 10).unwrap();
        assert_eq!(gaps, vec![(0, 10)]);

        // idempotent
        idx.clear(Some("AAPL")).unwrap();
        let gaps = idx.missing_ranges("AAPL", DataType::Ohlcv, 0, 10).unwrap();
        assert_eq!(gaps, vec![(0, 10)]);
    }

    #[test]
    fn survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache_segments.json");
        {
            let mut idx = SegmentIndex::load(&path).unwrap();
            idx.add_segment("AAPL", DataType::Ohlcv, 0, 10, Some("a.json".into()), 0, 10)
                .unwrap();
        }
        let idx = SegmentIndex::load(&path).unwrap();
        let segs = idx.get_segments("AAPL", DataType::Ohlcv, 0, 10);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].file_path.as_deref(), Some("a.json"));
    }
}
