// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shared floating tolerance for quantity/cash comparisons.
pub const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side { Buy, Sell }
impl Side {
    pub fn sign(&self) -> f64 { match self { Side::Buy => 1.0, Side::Sell => -1.0 } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

/// One trade print from a feed; `side` is the aggressor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation { pub symbol: String, pub price: f64, pub size: f64, pub side: Side, pub ts: DateTime<Utc> }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal { pub symbol: String, pub score: f64, pub reason: String, pub ts: DateTime<Utc> }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order { pub symbol: String, pub side: Side, pub qty: f64, pub px: f64 }
impl Order {
    pub fn notional(&self) -> f64 { self.qty * self.px }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    /// Execution price minus reference price.
    pub slippage: f64,
    pub latency_ms: u64,
    pub ts: DateTime<Utc>,
}
