//! Core value types shared by every layer of the cache: instants, symbols,
//! the closed `DataType` tag, the concrete record shapes, and the
//! `TimeSeriesData` payload that carries them across every interface.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A point on the monotonic UTC timeline, in milliseconds since the Unix
/// epoch. The cache never normalizes time zones; every instant is treated
/// as an opaque, totally-ordered value.
pub type Instant = i64;

/// Opaque ticker identifier, matched exactly.
pub type Symbol = String;

/// Closed enumeration of payload shapes the cache is polymorphic over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Ohlcv,
    OrderFlow,
}

/// Buy/sell side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Per-trade flag bundle: `is_buy`, `is_sell`, `is_aggressive`,
/// `is_passive`, `is_cross`, `is_auction`, kept as named booleans rather
/// than an opaque integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TradeFlags {
    pub is_buy: bool,
    pub is_sell: bool,
    pub is_aggressive: bool,
    pub is_passive: bool,
    pub is_cross: bool,
    pub is_auction: bool,
}

/// A single OHLCV bar. `volume` may be absent for venues that don't report it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub timestamp: Instant,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: Instant,
    pub price: f64,
    pub size: f64,
    pub side: Side,
    pub flags: TradeFlags,
}

/// One price level of an order-book snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub size: f64,
}

/// A full order-book snapshot at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub timestamp: Instant,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

/// A single payload record. An order-flow series carries exactly one of
/// `Trade`/`OrderBookSnapshot` across its whole length (never a mix):
/// `DataType::OrderFlow` covers both shapes, but a given series is always
/// homogeneous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Ohlcv(OhlcvBar),
    Trade(Trade),
    OrderBookSnapshot(OrderBookSnapshot),
}

impl Record {
    pub fn timestamp(&self) -> Instant {
        match self {
            Record::Ohlcv(bar) => bar.timestamp,
            Record::Trade(trade) => trade.timestamp,
            Record::OrderBookSnapshot(snap) => snap.timestamp,
        }
    }

    fn matches(&self, data_type: DataType) -> bool {
        matches!(
            (self, data_type),
            (Record::Ohlcv(_), DataType::Ohlcv)
                | (Record::Trade(_), DataType::OrderFlow)
                | (Record::OrderBookSnapshot(_), DataType::OrderFlow)
        )
    }

    /// The order-flow variant discriminant, used to enforce that a series
    /// never mixes `Trade` and `OrderBookSnapshot` records.
    fn variant_tag(&self) -> u8 {
        match self {
            Record::Ohlcv(_) => 0,
            Record::Trade(_) => 1,
            Record::OrderBookSnapshot(_) => 2,
        }
    }
}

/// Immutable unit of payload exchanged across every interface: an
/// ordered list of timestamps parallel to a list of records, tagged with
/// the `DataType` the caller must interpret the records as.
///
/// Constructed once by a provider or by slicing a cached segment, and
/// never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesData {
    pub data_type: DataType,
    pub timestamps: Vec<Instant>,
    pub records: Vec<Record>,
}

impl TimeSeriesData {
    /// Builds a series from records, deriving the parallel timestamp
    /// array and checking every invariant: equal lengths (by
    /// construction), non-decreasing timestamps, each record's own
    /// timestamp matching its slot, matching `data_type`, and — for
    /// order-flow — a single record variant across the whole series.
    pub fn new(data_type: DataType, records: Vec<Record>) -> Result<Self> {
        let mut timestamps = Vec::with_capacity(records.len());
        let mut last: Option<Instant> = None;
        let mut variant_tag: Option<u8> = None;

        for record in &records {
            if !record.matches(data_type) {
                return Err(Error::ProviderError(format!(
                    "record does not match declared data_type {data_type:?}"
                )));
            }
            let ts = record.timestamp();
            if let Some(prev) = last {
                if ts < prev {
                    return Err(Error::ProviderError(
                        "records are not ordered by non-decreasing timestamp".into(),
                    ));
                }
            }
            last = Some(ts);
            timestamps.push(ts);

            if data_type == DataType::OrderFlow {
                let tag = record.variant_tag();
                match variant_tag {
                    None => variant_tag = Some(tag),
                    Some(prev_tag) if prev_tag != tag => {
                        return Err(Error::ProviderError(
                            "order-flow series mixes trade and order-book-snapshot records".into(),
                        ));
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            data_type,
            timestamps,
            records,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn t_start(&self) -> Option<Instant> {
        self.timestamps.first().copied()
    }

    pub fn t_end(&self) -> Option<Instant> {
        self.timestamps.last().copied()
    }

    /// Returns a new series containing only records whose timestamp lies
    /// in `[t0, t1]`, preserving order.
    pub fn filter_range(&self, t0: Instant, t1: Instant) -> Self {
        let records: Vec<Record> = self
            .records
            .iter()
            .filter(|r| {
                let ts = r.timestamp();
                ts >= t0 && ts <= t1
            })
            .cloned()
            .collect();
        let timestamps = records.iter().map(Record::timestamp).collect();
        Self {
            data_type: self.data_type,
            timestamps,
            records,
        }
    }

    /// Concatenates series in order, without re-validating cross-series
    /// ordering beyond what the caller already guarantees (callers
    /// concatenate non-overlapping, ascending segments).
    pub fn concat(parts: Vec<Self>) -> Self {
        let data_type = parts
            .first()
            .map(|p| p.data_type)
            .unwrap_or(DataType::Ohlcv);
        let mut timestamps = Vec::new();
        let mut records = Vec::new();
        for part in parts {
            timestamps.extend(part.timestamps);
            records.extend(part.records);
        }
        Self {
            data_type,
            timestamps,
            records,
        }
    }
}
