//! Contract the `FetchOrchestrator` consumes: an abstract upstream data
//! source. Vendor wire protocols are out of scope; this module only
//! defines the seam.

use crate::error::Result;
use crate::types::{Instant, Symbol, TimeSeriesData};

/// OHLCV request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvConfig {
    pub timeframe: String,
    pub adjust_splits: bool,
    pub adjust_dividends: bool,
    pub include_volume: bool,
}

impl Default for OhlcvConfig {
    fn default() -> Self {
        Self {
            timeframe: "5m".to_string(),
            adjust_splits: true,
            adjust_dividends: true,
            include_volume: true,
        }
    }
}

/// Order-flow request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFlowConfig {
    pub order_types: Option<Vec<String>>,
    pub min_size: Option<f64>,
    pub max_size: Option<f64>,
    pub include_cancellations: bool,
    pub include_modifications: bool,
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self {
            order_types: None,
            min_size: None,
            max_size: None,
            include_cancellations: true,
            include_modifications: true,
        }
    }
}

/// Sum type of request parameters, selecting which payload shape a
/// `Provider::fetch` call should return.
#[derive(Debug, Clone, PartialEq)]
pub enum DataConfig {
    Ohlcv(OhlcvConfig),
    OrderFlow(OrderFlowConfig),
}

impl DataConfig {
    pub fn data_type(&self) -> crate::types::DataType {
        match self {
            DataConfig::Ohlcv(_) => crate::types::DataType::Ohlcv,
            DataConfig::OrderFlow(_) => crate::types::DataType::OrderFlow,
        }
    }
}

/// Abstract upstream vendor. Implementations MUST return records ordered
/// by timestamp and SHOULD cap a single page at some vendor-dependent
/// limit, signaling throttling with `Error::RateLimit` and any other
/// failure with `Error::ProviderError`.
pub trait Provider {
    fn fetch(
        &self,
        symbol: &Symbol,
        t0: Instant,
        t1: Instant,
        config: &DataConfig,
    ) -> Result<TimeSeriesData>;
}
