// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Core trading metrics --------
pub static OBSERVATIONS_BY_SYMBOL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("observations_total", "market observations ingested per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static SIGNALS_BY: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "signals_total_by",
            "strategy signals by strategy & symbol (labels: strategy, symbol)",
        ),
        &["strategy", "symbol"],
    )
    .unwrap()
});

pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_total", "orders submitted to the paper executor"),
        &["symbol", "side"],
    )
    .unwrap()
});

pub static FILLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("fills_total", "fills applied to the account"), &["side"]).unwrap()
});

pub static REJECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("rejects_total", "orders or fills rejected (label: reason)"),
        &["reason"],
    )
    .unwrap()
});

pub static HALTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("halts_total", "risk halts (label: reason)"), &["reason"]).unwrap()
});

// -------- Paper account --------
pub static PAPER_EQUITY: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("paper_equity", "paper account equity, mark-to-market").unwrap());

pub static PAPER_REALIZED: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("paper_realized_pnl", "paper account realized PnL").unwrap());

pub static PAPER_POSITION: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("paper_position", "paper position size per symbol"), &["symbol"]).unwrap()
});

// ---- Config visibility ----
pub static CONFIG_STRATEGY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_strategy_active", "active strategy (label: strategy)"),
        &["strategy"],
    )
    .unwrap()
});

pub static CONFIG_SYMBOLS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_symbols", "number of configured symbols").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(OBSERVATIONS_BY_SYMBOL.clone())),
        REGISTRY.register(Box::new(SIGNALS_BY.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(REJECTS.clone())),
        REGISTRY.register(Box::new(HALTS.clone())),
        REGISTRY.register(Box::new(PAPER_EQUITY.clone())),
        REGISTRY.register(Box::new(PAPER_REALIZED.clone())),
        REGISTRY.register(Box::new(PAPER_POSITION.clone())),
        REGISTRY.register(Box::new(CONFIG_STRATEGY.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOLS.clone())),
    ] {
        // double registration (tests, restarts) is harmless
        let _ = m;
    }
}

/// Encode all metrics in Prometheus text format
pub fn encode() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_contains_registered_families() {
        init();
        let text = String::from_utf8(encode()).unwrap();
        assert!(text.contains("# TYPE paper_equity gauge"));
        assert!(text.contains("config_symbols"));
    }
}
