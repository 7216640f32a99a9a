//! Time-range-indexed cache for financial time-series data (bars, trades).
//!
//! Sits between an upstream vendor `Provider` and downstream backtest /
//! execution consumers: a `SegmentIndex` tracks which `[t_start, t_end]`
//! ranges are already cached per `(symbol, data_type)`, a `SegmentStore`
//! holds the actual `TimeSeriesData` across a hot in-memory tier and a
//! cold on-disk tier, `Cache` composes the two behind one coarse lock, and
//! `FetchOrchestrator` fills gaps from a `Provider` on demand.

pub mod cache;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod segment;
pub mod segment_index;
pub mod segment_store;
pub mod types;

pub use cache::{Cache, CacheConfig, CacheStats};
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::{FetchOptions, FetchOrchestrator, FetchResult, DEFAULT_PAGE_LIMIT};
pub use provider::{DataConfig, OhlcvConfig, OrderFlowConfig, Provider};
pub use retry::{call_with_retry, RetryConfig};
pub use segment::{Segment, SegmentId};
pub use segment_index::SegmentIndex;
pub use segment_store::SegmentStore;
pub use types::{
    DataType, Instant, OhlcvBar, OrderBookLevel, OrderBookSnapshot, Record, Side, Symbol,
    TimeSeriesData, TradeFlags,
};
