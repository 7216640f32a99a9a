//! Composes `SegmentIndex` and `SegmentStore` behind one coarse mutex.
//!
//! `get` has to populate the hot tier on a cold-tier load even on a read
//! path, so a reader/writer split would still need interior mutability
//! inside the "shared" half. One `Mutex<CacheInner>` is the honest match
//! for the single-writer/multi-reader model this crate targets.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::segment::SegmentId;
use crate::segment_index::SegmentIndex;
use crate::segment_store::SegmentStore;
use crate::types::{DataType, Instant, Symbol, TimeSeriesData};

/// The cache directory is the sole runtime parameter; provider
/// credentials and endpoints live with providers, not here.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hot_segment_count: usize,
    pub hot_bytes_est: u64,
    pub cold_segment_count: usize,
    pub cold_bytes: u64,
    pub symbols: Vec<Symbol>,
}

struct CacheInner {
    index: SegmentIndex,
    store: SegmentStore,
}

pub struct Cache {
    inner: Mutex<CacheInner>,
}

impl Cache {
    pub fn open(config: CacheConfig) -> Result<Self> {
        let index_path = config.cache_dir.join("cache_segments.json");
        let index = SegmentIndex::load(index_path)?;
        let store = SegmentStore::new(&config.cache_dir)?;
        Ok(Self {
            inner: Mutex::new(CacheInner { index, store }),
        })
    }

    /// Reserves a non-overlapping slot in the index, writes the segment
    /// to the store, and rolls the index entry back if the store write
    /// fails — a `put` never leaves the index referencing unwritten data.
    ///
    /// Preconditions: `t0 < t1`; `data` non-empty; every record timestamp
    /// lies in `[t0, t1]`; `data.data_type == data_type`.
    pub fn put(
        &self,
        symbol: &str,
        data_type: DataType,
        t0: Instant,
        t1: Instant,
        data: TimeSeriesData,
    ) -> Result<SegmentId> {
        if t0 >= t1 {
            return Err(Error::InvalidRange { t0, t1 });
        }
        if data.is_empty() {
            return Err(Error::ProviderError("cannot cache an empty series".into()));
        }
        if data.data_type != data_type {
            return Err(Error::ProviderError(
                "series data_type does not match requested data_type".into(),
            ));
        }
        for ts in &data.timestamps {
            if *ts < t0 || *ts > t1 {
                return Err(Error::ProviderError(format!(
                    "record timestamp {ts} falls outside requested range [{t0}, {t1}]"
                )));
            }
        }

        let mut guard = self.inner.lock().expect("cache mutex poisoned");
        let record_count = data.len();
        let created_at = now_ms();

        let id = guard
            .index
            .add_segment(symbol, data_type, t0, t1, None, created_at, record_count)?;

        match guard
            .store
            .put_segment(&id, symbol, data_type, t0, t1, data)
        {
            Ok(file_path) => {
                // Record the file path now that the write succeeded. The
                // index already has the segment at the correct sorted
                // position; we only need to patch its file_path in place.
                guard.index.set_file_path(symbol, data_type, &id, file_path)?;
                Ok(id)
            }
            Err(err) => {
                guard.index.remove_segment(symbol, data_type, &id)?;
                Err(err)
            }
        }
    }

    /// Gathers every segment intersecting `[t0, t1]`, loads each from the
    /// store, filters to `[t0, t1]`, and concatenates in ascending order.
    /// Fails with `MissingRanges` if coverage has gaps.
    pub fn get(&self, symbol: &str, data_type: DataType, t0: Instant, t1: Instant) -> Result<TimeSeriesData> {
        let mut guard = self.inner.lock().expect("cache mutex poisoned");

        let gaps = guard.index.missing_ranges(symbol, data_type, t0, t1)?;
        if !gaps.is_empty() {
            return Err(Error::MissingRanges { ranges: gaps });
        }

        let segments = guard.index.get_segments(symbol, data_type, t0, t1);
        let mut parts = Vec::with_capacity(segments.len());
        for segment in &segments {
            let data = guard.store.get_segment(segment)?;
            parts.push(data.filter_range(t0, t1));
        }
        Ok(TimeSeriesData::concat(parts))
    }

    pub fn clear(&self, symbol: Option<&str>) -> Result<()> {
        let mut guard = self.inner.lock().expect("cache mutex poisoned");
        match symbol {
            Some(symbol) => {
                let segments = guard.index.get_segments(symbol, DataType::Ohlcv, Instant::MIN, Instant::MAX);
                let segments_of = guard.index.get_segments(symbol, DataType::OrderFlow, Instant::MIN, Instant::MAX);
                for segment in segments.into_iter().chain(segments_of) {
                    guard.store.delete_segment(&segment)?;
                }
                guard.index.clear(Some(symbol))
            }
            None => {
                guard.store.clear()?;
                guard.index.clear(None)
            }
        }
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let guard = self.inner.lock().expect("cache mutex poisoned");
        let (cold_segment_count, cold_bytes) = guard.store.cold_stats()?;
        Ok(CacheStats {
            hot_segment_count: guard.store.hot_segment_count(),
            hot_bytes_est: guard.store.hot_bytes_est(),
            cold_segment_count,
            cold_bytes,
            symbols: guard.index.symbols(),
        })
    }

    /// Exposed for the orchestrator, which needs the index's view of
    /// coverage without going through `get`'s all-or-nothing contract.
    pub fn missing_ranges(
        &self,
        symbol: &str,
        data_type: DataType,
        t0: Instant,
        t1: Instant,
    ) -> Result<Vec<(Instant, Instant)>> {
        let guard = self.inner.lock().expect("cache mutex poisoned");
        guard.index.missing_ranges(symbol, data_type, t0, t1)
    }
}

fn now_ms() -> Instant {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Instant)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OhlcvBar, Record};
    use tempfile::TempDir;

    fn series(start: Instant, count: i64) -> TimeSeriesData {
        let records = (0..count)
            .map(|i| {
                Record::Ohlcv(OhlcvBar {
                    timestamp: start + i,
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: Some(10.0),
                })
            })
            .collect();
        TimeSeriesData::new(DataType::Ohlcv, records).unwrap()
    }

    #[test]
    fn round_trip_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
        let data = series(0, 10);

        cache.put("AAPL", DataType::Ohlcv, 0, 9, data.clone()).unwrap();
        let out = cache.get("AAPL", DataType::Ohlcv, 0, 9).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn get_with_gap_reports_missing_ranges() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
        cache.put("AAPL", DataType::Ohlcv, 0, 4, series(0, 5)).unwrap();
        cache.put("AAPL", DataType::Ohlcv, 8, 9, series(8, 2)).unwrap();

        let err = cache.get("AAPL", DataType::Ohlcv, 0, 9).unwrap_err();
        match err {
            Error::MissingRanges { ranges } => assert_eq!(ranges, vec![(4, 8)]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sub_range_read_filters_exactly() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
        cache.put("AAPL", DataType::Ohlcv, 0, 9, series(0, 10)).unwrap();

        let out = cache.get("AAPL", DataType::Ohlcv, 3, 5).unwrap();
        assert_eq!(out.timestamps, vec![3, 4, 5]);
    }

    #[test]
    fn overlapping_put_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
        cache.put("AAPL", DataType::Ohlcv, 0, 9, series(0, 10)).unwrap();

        let err = cache
            .put("AAPL", DataType::Ohlcv, 5, 14, series(5, 10))
            .unwrap_err();
        assert!(matches!(err, Error::OverlappingSegment { .. }));
    }

    #[test]
    fn clear_one_symbol_resets_coverage() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
        cache.put("AAPL", DataType::Ohlcv, 0, 9, series(0, 10)).unwrap();

        cache.clear(Some("AAPL")).unwrap();
        let gaps = cache.missing_ranges("AAPL", DataType::Ohlcv, 0, 9).unwrap();
        assert_eq!(gaps, vec![(0, 9)]);

        // idempotent
        cache.clear(Some("AAPL")).unwrap();
        let gaps = cache.missing_ranges("AAPL", DataType::Ohlcv, 0, 9).unwrap();
        assert_eq!(gaps, vec![(0, 9)]);
    }

    #[test]
    fn rejects_put_outside_declared_range() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
        let err = cache
            .put("AAPL", DataType::Ohlcv, 0, 5, series(0, 10))
            .unwrap_err();
        assert!(matches!(err, Error::ProviderError(_)));
    }

    #[test]
    fn survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
            cache.put("AAPL", DataType::Ohlcv, 0, 9, series(0, 10)).unwrap();
        }
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
        let out = cache.get("AAPL", DataType::Ohlcv, 0, 9).unwrap();
        assert_eq!(out.len(), 10);
    }
}
