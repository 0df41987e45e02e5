// ===============================
// src/execution.rs (paper execution simulator)
// ===============================
//
// Turns an accepted Order into 1..=max_partial_fills Fills with sampled
// partial splits, slippage and latency. The random source is injected so
// tests can seed it; nothing here touches account state.
//
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::info;

use crate::domain::{Fill, Order, Side};
use crate::metrics::ORDERS;

#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub max_latency_ms: u64,
    pub slippage_bps: f64,
    pub partial_fill_probability: f64,
    pub max_partial_fills: u32,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self { max_latency_ms: 150, slippage_bps: 5.0, partial_fill_probability: 0.0, max_partial_fills: 1 }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecError {
    #[error("order quantity must be positive, got {0}")]
    InvalidQuantity(f64),
}

pub struct Simulator<R: Rng = StdRng> {
    cfg: ExecConfig,
    rng: R,
}

impl Simulator<StdRng> {
    pub fn from_entropy(cfg: ExecConfig) -> Self {
        Self::new(cfg, StdRng::from_entropy())
    }

    pub fn seeded(cfg: ExecConfig, seed: u64) -> Self {
        Self::new(cfg, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Simulator<R> {
    pub fn new(cfg: ExecConfig, rng: R) -> Self {
        Self { cfg, rng }
    }

    pub fn config(&self) -> &ExecConfig { &self.cfg }

    pub fn submit(&mut self, order: &Order) -> Result<Vec<Fill>, ExecError> {
        if order.qty <= 0.0 || !order.qty.is_finite() {
            return Err(ExecError::InvalidQuantity(order.qty));
        }
        ORDERS.with_label_values(&[order.symbol.as_str(), order.side.as_str()]).inc();

        let fills = self.generate_fills(order);
        for f in &fills {
            info!(
                symbol = %order.symbol,
                side = order.side.as_str(),
                qty = f.qty,
                px = order.px,
                fill_px = f.price,
                slippage = f.slippage,
                latency_ms = f.latency_ms,
                "paper order filled"
            );
        }
        Ok(fills)
    }

    fn generate_fills(&mut self, order: &Order) -> Vec<Fill> {
        let parts = self.sample_parts();
        let weights: Vec<f64> = (0..parts)
            .map(|_| {
                let w: f64 = self.rng.gen();
                if w <= 0.0 { 1e-6 } else { w }
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let mut fills = Vec::with_capacity(parts);
        let mut allocated = 0.0;
        for (i, w) in weights.iter().enumerate() {
            // last slice takes the exact remainder
            let qty = if i == parts - 1 { order.qty - allocated } else { order.qty * (w / total) };
            allocated += qty;

            let latency_ms = self.sample_latency();
            let price = self.apply_slippage(order.px, order.side);
            fills.push(Fill {
                symbol: order.symbol.clone(),
                side: order.side,
                qty,
                price,
                slippage: price - order.px,
                latency_ms,
                ts: Utc::now() + ChronoDuration::milliseconds(latency_ms as i64),
            });
        }
        fills
    }

    fn sample_parts(&mut self) -> usize {
        let max = self.cfg.max_partial_fills;
        if max < 2 || self.cfg.partial_fill_probability <= 0.0 {
            return 1;
        }
        if self.rng.gen::<f64>() >= self.cfg.partial_fill_probability {
            return 1;
        }
        self.rng.gen_range(1..=max) as usize
    }

    fn sample_latency(&mut self) -> u64 {
        match self.cfg.max_latency_ms {
            0 => 0,
            max => self.rng.gen_range(0..=max),
        }
    }

    // Buy pays up, Sell receives down.
    fn apply_slippage(&mut self, px: f64, side: Side) -> f64 {
        let bps = self.cfg.slippage_bps;
        if px <= 0.0 || bps <= 0.0 {
            return px;
        }
        let magnitude = self.rng.gen_range(-1.0..=1.0) * bps / 10_000.0;
        px * (1.0 + side.sign() * magnitude)
    }
}
