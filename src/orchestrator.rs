//! Satisfies caller requests against a `Provider`, minimizing vendor
//! calls: diff the request against the index, fetch only the gaps (with
//! retry and pagination), write them, then serve the merged range from
//! the cache.

use std::sync::atomic::AtomicBool;

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::provider::{DataConfig, Provider};
use crate::retry::{call_with_retry, RetryConfig};
use crate::types::{Instant, Symbol, TimeSeriesData};

/// Vendors paginate; 50,000 records is a common page size for bar/tick
/// APIs. Overridable per call via `FetchOptions::page_limit`.
pub const DEFAULT_PAGE_LIMIT: usize = 50_000;

/// The smallest representable gap between two instants, used to advance
/// past the last record of a full page without re-requesting it.
const MIN_DELTA: Instant = 1;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// When `true`, a request that still has gaps after every sub-range
    /// has been attempted returns whatever data could be assembled
    /// alongside the still-missing ranges instead of failing. Exposed as
    /// a flag rather than a second entry point, since the two modes
    /// differ only in policy, not in the shape of what they return.
    pub lenient: bool,
    pub page_limit: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            lenient: false,
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Result of a lenient fetch: the best data assembled so far plus any
/// ranges that remain uncovered.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub data: TimeSeriesData,
    pub missing: Vec<(Instant, Instant)>,
}

pub struct FetchOrchestrator<'a, P: Provider> {
    cache: &'a Cache,
    provider: P,
    retry_config: RetryConfig,
}

impl<'a, P: Provider> FetchOrchestrator<'a, P> {
    pub fn new(cache: &'a Cache, provider: P, retry_config: RetryConfig) -> Self {
        Self {
            cache,
            provider,
            retry_config,
        }
    }

    /// Runs the full algorithm in §4.4: compute gaps, fill each via the
    /// provider (clamped to the requested sub-range, paginated, retried),
    /// write what came back, then read the merged range from the cache.
    pub fn fetch(
        &self,
        symbol: &Symbol,
        t0: Instant,
        t1: Instant,
        config: &DataConfig,
        options: &FetchOptions,
        cancel: Option<&AtomicBool>,
    ) -> Result<FetchResult> {
        let data_type = config.data_type();
        let gaps = self.cache.missing_ranges(symbol, data_type, t0, t1)?;

        if gaps.is_empty() {
            let data = self.cache.get(symbol, data_type, t0, t1)?;
            return Ok(FetchResult { data, missing: Vec::new() });
        }

        for (m0, m1) in gaps {
            let fetched = self.fetch_range_paginated(symbol, m0, m1, config, options, cancel)?;
            if let Some(fetched) = fetched {
                self.store_fetched_range(symbol, data_type, m0, m1, fetched)?;
            }
            // Empty response: the range is abandoned for this request so
            // a future call can retry it.
        }

        let remaining = self.cache.missing_ranges(symbol, data_type, t0, t1)?;
        if remaining.is_empty() {
            let data = self.cache.get(symbol, data_type, t0, t1)?;
            return Ok(FetchResult { data, missing: Vec::new() });
        }

        if options.lenient {
            let mut parts = Vec::new();
            for (a, b) in covered_intervals(t0, t1, &remaining) {
                if a < b {
                    parts.push(self.cache.get(symbol, data_type, a, b)?);
                }
            }
            let data = if parts.is_empty() {
                TimeSeriesData::new(data_type, Vec::new())?
            } else {
                TimeSeriesData::concat(parts)
            };
            Ok(FetchResult { data, missing: remaining })
        } else {
            Err(Error::PartialData { missing: remaining })
        }
    }

    /// Calls the provider for `[m0, m1]` repeatedly, advancing past the
    /// last returned timestamp whenever a page returns `page_limit`
    /// records (a full page, implying more data may follow), clamping
    /// every page to `[m0, m1]` to preserve the non-overlap invariant.
    /// Returns `None` if every page was empty (nothing to cache).
    fn fetch_range_paginated(
        &self,
        symbol: &Symbol,
        m0: Instant,
        m1: Instant,
        config: &DataConfig,
        options: &FetchOptions,
        cancel: Option<&AtomicBool>,
    ) -> Result<Option<TimeSeriesData>> {
        let mut cursor = m0;
        let mut collected: Vec<TimeSeriesData> = Vec::new();

        loop {
            if cursor > m1 {
                break;
            }
            let page = call_with_retry(&self.retry_config, cancel, || {
                self.provider.fetch(symbol, cursor, m1, config)
            })?;

            let page_len = page.len();
            let clamped = page.filter_range(m0, m1);
            let clamped_empty = clamped.is_empty();
            let last_ts = clamped.t_end();

            if !clamped_empty {
                collected.push(clamped);
            }

            if page_len < options.page_limit {
                break;
            }
            match last_ts {
                Some(ts) if ts < m1 => cursor = ts + MIN_DELTA,
                _ => break,
            }
        }

        if collected.is_empty() {
            Ok(None)
        } else {
            Ok(Some(TimeSeriesData::concat(collected)))
        }
    }

    /// Writes `fetched` (already clamped to `[m0, m1]`) as a new segment,
    /// using the data's own bounds rather than the raw gap bounds:
    /// `missing_ranges` reports a gap's edges as the adjoining segments'
    /// own `t_end`/`t_start` (the cursor walk advances to exactly
    /// `S.t_end` and stops at exactly the next segment's `t_start`), so a
    /// provider that legitimately returns a record at `m0` or `m1` would
    /// otherwise re-claim an instant a neighbor already owns and trip the
    /// strict non-touching overlap rule. If that happens, whichever
    /// boundary record actually caused it (the leading record if it sits
    /// at `m0`, else the trailing record if it sits at `m1`) is dropped
    /// — the neighbor already has that instant — and the put is retried.
    /// A single-record result has no `[t0, t1)` span of its own, so it's
    /// widened by `MIN_DELTA` to satisfy `Cache::put`'s `t0 < t1`
    /// precondition — nudged backward instead of forward when a forward
    /// nudge would land exactly on `m1` (and a right neighbor may own
    /// it), as long as there's room on that side of the gap.
    fn store_fetched_range(
        &self,
        symbol: &Symbol,
        data_type: crate::types::DataType,
        m0: Instant,
        m1: Instant,
        mut fetched: TimeSeriesData,
    ) -> Result<()> {
        loop {
            if fetched.is_empty() {
                return Ok(());
            }

            let ts0 = fetched.t_start().expect("checked non-empty above");
            let ts1 = fetched.t_end().expect("checked non-empty above");
            let (seg_t0, seg_t1) = if ts0 == ts1 {
                if ts0 + MIN_DELTA == m1 && ts0 - MIN_DELTA > m0 {
                    (ts0 - MIN_DELTA, ts0)
                } else {
                    (ts0, ts0 + MIN_DELTA)
                }
            } else {
                (ts0, ts1)
            };

            match self.cache.put(symbol, data_type, seg_t0, seg_t1, fetched.clone()) {
                Ok(_) => return Ok(()),
                Err(Error::OverlappingSegment { .. }) => {
                    let mut records = fetched.records.clone();
                    if records.first().map(crate::types::Record::timestamp) == Some(m0) {
                        records.remove(0);
                    } else if records.last().map(crate::types::Record::timestamp) == Some(m1) {
                        records.pop();
                    } else {
                        // Neither boundary record explains the conflict:
                        // a genuine, unexpected overlap. Propagate rather
                        // than loop forever.
                        return Err(Error::OverlappingSegment {
                            symbol: symbol.clone(),
                            data_type,
                        });
                    }
                    let timestamps = records.iter().map(crate::types::Record::timestamp).collect();
                    fetched = TimeSeriesData {
                        data_type,
                        timestamps,
                        records,
                    };
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// The complement of `gaps` within `[t0, t1]`: the sub-ranges that *are*
/// covered, used by lenient mode to assemble whatever data the cache can
/// already serve without going through `Cache::get`'s all-or-nothing gate.
fn covered_intervals(t0: Instant, t1: Instant, gaps: &[(Instant, Instant)]) -> Vec<(Instant, Instant)> {
    let mut covered = Vec::new();
    let mut cursor = t0;
    for (g0, g1) in gaps {
        if *g0 > cursor {
            covered.push((cursor, *g0));
        }
        cursor = cursor.max(*g1);
    }
    if cursor < t1 {
        covered.push((cursor, t1));
    }
    covered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::provider::OhlcvConfig;
    use crate::types::{DataType, OhlcvBar, Record};
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct StubProvider {
        calls: RefCell<u32>,
        bars: Vec<(Instant, Instant)>, // (t0, t1) ranges served wholesale, 1 bar/ms
    }

    impl StubProvider {
        fn full_range(t0: Instant, t1: Instant) -> Self {
            Self {
                calls: RefCell::new(0),
                bars: vec![(t0, t1)],
            }
        }
    }

    impl Provider for StubProvider {
        fn fetch(
            &self,
            _symbol: &Symbol,
            t0: Instant,
            t1: Instant,
            _config: &DataConfig,
        ) -> Result<TimeSeriesData> {
            *self.calls.borrow_mut() += 1;
            let records: Vec<Record> = (t0..=t1)
                .filter(|ts| self.bars.iter().any(|(a, b)| ts >= a && ts <= b))
                .map(|ts| {
                    Record::Ohlcv(OhlcvBar {
                        timestamp: ts,
                        open: 1.0,
                        high: 1.0,
                        low: 1.0,
                        close: 1.0,
                        volume: Some(1.0),
                    })
                })
                .collect();
            TimeSeriesData::new(DataType::Ohlcv, records)
        }
    }

    #[test]
    fn orchestrator_backfills_empty_index() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
        let provider = StubProvider::full_range(0, 9);
        let orchestrator = FetchOrchestrator::new(&cache, provider, RetryConfig::default());

        let config = DataConfig::Ohlcv(OhlcvConfig::default());
        let result = orchestrator
            .fetch(&"AAPL".to_string(), 0, 9, &config, &FetchOptions::default(), None)
            .unwrap();

        assert_eq!(result.data.len(), 10);
        assert!(result.missing.is_empty());

        let gaps = cache.missing_ranges("AAPL", DataType::Ohlcv, 0, 9).unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn orchestrator_only_fetches_gaps() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();

        // Pre-existing coverage for an unrelated range. The orchestrator
        // must not re-fetch or disturb it while filling [0, 9].
        let prefill: Vec<Record> = (100..=104)
            .map(|ts| {
                Record::Ohlcv(OhlcvBar {
                    timestamp: ts,
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: Some(1.0),
                })
            })
            .collect();
        cache
            .put("AAPL", DataType::Ohlcv, 100, 104, TimeSeriesData::new(DataType::Ohlcv, prefill).unwrap())
            .unwrap();

        let provider = StubProvider::full_range(0, 9);
        let orchestrator = FetchOrchestrator::new(&cache, provider, RetryConfig::default());
        let config = DataConfig::Ohlcv(OhlcvConfig::default());

        let result = orchestrator
            .fetch(&"AAPL".to_string(), 0, 9, &config, &FetchOptions::default(), None)
            .unwrap();
        assert_eq!(result.data.len(), 10);
        assert_eq!(*orchestrator.provider.calls.borrow(), 1);

        // The unrelated prefilled range is still intact and untouched.
        let gaps = cache.missing_ranges("AAPL", DataType::Ohlcv, 100, 104).unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn strict_mode_fails_on_empty_provider_response() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();
        let provider = StubProvider {
            calls: RefCell::new(0),
            bars: vec![], // serves nothing
        };
        let orchestrator = FetchOrchestrator::new(&cache, provider, RetryConfig::default());
        let config = DataConfig::Ohlcv(OhlcvConfig::default());

        let err = orchestrator
            .fetch(&"AAPL".to_string(), 0, 9, &config, &FetchOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::PartialData { .. }));

        // Abandoned range leaves no segment behind, so a retry is possible.
        let gaps = cache.missing_ranges("AAPL", DataType::Ohlcv, 0, 9).unwrap();
        assert_eq!(gaps, vec![(0, 9)]);
    }

    #[test]
    fn lenient_mode_returns_partial_data() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();

        // Pre-existing coverage splits [0, 19] into two gaps: (0, 8) and (11, 19).
        let prefill: Vec<Record> = (8..=11)
            .map(|ts| {
                Record::Ohlcv(OhlcvBar {
                    timestamp: ts,
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: Some(1.0),
                })
            })
            .collect();
        cache
            .put("AAPL", DataType::Ohlcv, 8, 11, TimeSeriesData::new(DataType::Ohlcv, prefill).unwrap())
            .unwrap();

        // The provider only has data for the first gap; the second comes
        // back empty and is abandoned.
        let provider = StubProvider::full_range(0, 7);
        let orchestrator = FetchOrchestrator::new(&cache, provider, RetryConfig::default());
        let config = DataConfig::Ohlcv(OhlcvConfig::default());
        let options = FetchOptions { lenient: true, ..Default::default() };

        let result = orchestrator
            .fetch(&"AAPL".to_string(), 0, 19, &config, &options, None)
            .unwrap();
        assert_eq!(result.data.len(), 12); // 8 bars from the filled gap + 4 prefilled
        // The filled segment covers [0, 7] (the provider's actual data),
        // immediately adjacent to but not touching the prefilled [8, 11]
        // segment. missing_ranges still reports the single-tick boundary
        // between them (7, 8) as nominally uncovered: strict
        // non-touching adjacency and the inclusive-endpoint gap walk
        // mean two independently stored segments can never fully erase
        // that one-tick seam, even when every real instant is covered.
        // (11, 19) is the genuine, still-unfilled remainder.
        assert_eq!(result.missing, vec![(7, 8), (11, 19)]);
    }

    /// A provider that returns a record at a single fixed instant,
    /// regardless of the requested range — models a vendor with sparse
    /// coverage inside an otherwise-empty gap.
    struct SingleRecordProvider {
        ts: Instant,
    }

    impl Provider for SingleRecordProvider {
        fn fetch(
            &self,
            _symbol: &Symbol,
            t0: Instant,
            t1: Instant,
            _config: &DataConfig,
        ) -> Result<TimeSeriesData> {
            let records = if self.ts >= t0 && self.ts <= t1 {
                vec![Record::Ohlcv(OhlcvBar {
                    timestamp: self.ts,
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: Some(1.0),
                })]
            } else {
                Vec::new()
            };
            TimeSeriesData::new(DataType::Ohlcv, records)
        }
    }

    #[test]
    fn provider_data_touching_a_left_neighbor_is_trimmed_not_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();

        // Existing coverage ends at t=5; the gap to fill is (5, 10), whose
        // own m0 is the left neighbor's t_end.
        cache
            .put("AAPL", DataType::Ohlcv, 0, 5, StubProvider::full_range(0, 5).fetch(&"AAPL".to_string(), 0, 5, &DataConfig::Ohlcv(OhlcvConfig::default())).unwrap())
            .unwrap();

        // The provider legitimately returns a record at t=5, the exact
        // instant the left neighbor already owns.
        let provider = StubProvider::full_range(5, 10);
        let orchestrator = FetchOrchestrator::new(&cache, provider, RetryConfig::default());
        let config = DataConfig::Ohlcv(OhlcvConfig::default());
        let options = FetchOptions { lenient: true, ..Default::default() };

        let result = orchestrator
            .fetch(&"AAPL".to_string(), 0, 10, &config, &options, None)
            .unwrap();

        // No OverlappingSegment/InvalidRange ever escapes; the duplicate
        // leading record at t=5 is dropped and the rest is stored as
        // [6, 10]. The usual one-tick seam (5, 6) is the only remaining
        // gap, not the whole (5, 10) range.
        assert_eq!(result.missing, vec![(5, 6)]);

        let gaps = cache.missing_ranges("AAPL", DataType::Ohlcv, 6, 10).unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn single_record_gap_is_widened_to_satisfy_puts_strict_range() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();

        let provider = SingleRecordProvider { ts: 5 };
        let orchestrator = FetchOrchestrator::new(&cache, provider, RetryConfig::default());
        let config = DataConfig::Ohlcv(OhlcvConfig::default());
        let options = FetchOptions { lenient: true, ..Default::default() };

        // A single-record fetch would otherwise trip Cache::put's t0 < t1
        // precondition (seg_t0 == seg_t1 == 5) and escape as InvalidRange.
        let result = orchestrator
            .fetch(&"AAPL".to_string(), 0, 9, &config, &options, None)
            .unwrap();
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data.timestamps, vec![5]);

        // The lone record is stored as a [5, 6] segment.
        let gaps = cache.missing_ranges("AAPL", DataType::Ohlcv, 5, 6).unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn single_record_gap_widens_backward_when_forward_would_touch_a_right_neighbor() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(CacheConfig::new(dir.path())).unwrap();

        // A neighbor already owns [10, 15]; filling [0, 15] leaves a gap
        // of (0, 10) whose m1 is exactly that neighbor's t_start.
        cache
            .put(
                "AAPL",
                DataType::Ohlcv,
                10,
                15,
                StubProvider::full_range(10, 15)
                    .fetch(&"AAPL".to_string(), 10, 15, &DataConfig::Ohlcv(OhlcvConfig::default()))
                    .unwrap(),
            )
            .unwrap();

        // The provider's lone record sits at t=9: widening forward would
        // land the new segment at [9, 10], touching the neighbor's t_start.
        let provider = SingleRecordProvider { ts: 9 };
        let orchestrator = FetchOrchestrator::new(&cache, provider, RetryConfig::default());
        let config = DataConfig::Ohlcv(OhlcvConfig::default());
        let options = FetchOptions { lenient: true, ..Default::default() };

        let result = orchestrator
            .fetch(&"AAPL".to_string(), 0, 15, &config, &options, None)
            .unwrap();
        assert_eq!(result.data.timestamps, vec![9, 10, 11, 12, 13, 14, 15]);

        // The lone record was stored at [8, 9] (widened backward), not
        // [9, 10] (which would have collided with the existing neighbor).
        let gaps = cache.missing_ranges("AAPL", DataType::Ohlcv, 8, 9).unwrap();
        assert!(gaps.is_empty());
    }
}
