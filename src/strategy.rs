// ===============================
// src/strategy.rs
// ===============================
//
// Two strategies are available:
// 1) OBI momentum (default)  -> ObiMomentum
// 2) Trend follower          -> TrendFollower
//
// Both keep a per-symbol, time-bounded window of observations. The engine owns
// the strategy exclusively, so windows need no lock of their own; symbols that
// go quiet for longer than the lookback are dropped from the book.
//

use std::collections::VecDeque;

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::domain::{Observation, Side, Signal};

const DEFAULT_OBI_THRESHOLD: f64 = 0.25;
const DEFAULT_OBI_WINDOW_SECS: i64 = 60;
const DEFAULT_TREND_THRESHOLD: f64 = 0.05;
const DEFAULT_TREND_WINDOW_SECS: i64 = 180;

// Idle-symbol sweep cadence (in pushes).
const EVICT_EVERY: u64 = 256;

/// Time-ordered observations for one symbol, bounded by `span`.
#[derive(Debug, Clone)]
pub struct FeatureWindow {
    obs: VecDeque<Observation>,
    span: Duration,
}

impl FeatureWindow {
    pub fn new(span: Duration) -> Self {
        Self { obs: VecDeque::new(), span }
    }

    /// Append and drop everything at or before `latest.ts - span`.
    pub fn push(&mut self, o: Observation) {
        let cutoff = o.ts - self.span;
        self.obs.push_back(o);
        while let Some(front) = self.obs.front() {
            if front.ts > cutoff {
                break;
            }
            self.obs.pop_front();
        }
    }

    pub fn oldest(&self) -> Option<&Observation> { self.obs.front() }
    pub fn latest(&self) -> Option<&Observation> { self.obs.back() }

    /// (buy - sell) / (buy + sell) by aggressor size, clamped; 0 without volume.
    pub fn imbalance(&self) -> f64 {
        let (mut buy, mut sell) = (0.0_f64, 0.0_f64);
        for o in &self.obs {
            match o.side {
                Side::Buy => buy += o.size.abs(),
                Side::Sell => sell += o.size.abs(),
            }
        }
        let total = buy + sell;
        if total > 0.0 {
            ((buy - sell) / total).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Sum of |price * size| over the window.
    pub fn notional(&self) -> f64 {
        self.obs.iter().map(|o| (o.price * o.size).abs()).sum()
    }
}

/// Per-symbol windows sharing one lookback.
#[derive(Debug)]
struct WindowBook {
    span: Duration,
    windows: HashMap<String, FeatureWindow>,
    pushes: u64,
}

impl WindowBook {
    fn new(span: Duration) -> Self {
        Self { span, windows: HashMap::new(), pushes: 0 }
    }

    fn push(&mut self, o: &Observation) -> &FeatureWindow {
        self.pushes = self.pushes.wrapping_add(1);
        if self.pushes % EVICT_EVERY == 0 {
            self.evict_idle(o.ts);
        }
        let span = self.span;
        let win = self
            .windows
            .entry(o.symbol.clone())
            .or_insert_with(|| FeatureWindow::new(span));
        win.push(o.clone());
        win
    }

    fn evict_idle(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.span;
        self.windows
            .retain(|_, w| w.latest().map_or(false, |l| l.ts > cutoff));
    }

    fn tracked(&self) -> usize { self.windows.len() }
}

// -----------------------------------------------------------------------------
// 1) OBI MOMENTUM (default)
//    score = 0.6 * imbalance + 0.4 * momentum
//      imbalance: aggressor volume imbalance over the window, in [-1, 1]
//      momentum : tanh(3 * pct change from the oldest retained price)
//    A signal is emitted only when |score| >= threshold.
// -----------------------------------------------------------------------------
#[derive(Debug)]
pub struct ObiMomentum {
    threshold: f64,
    book: WindowBook,
}

impl ObiMomentum {
    pub fn new(threshold: f64, window_secs: i64) -> Self {
        let threshold = if threshold > 0.0 { threshold } else { DEFAULT_OBI_THRESHOLD };
        let window_secs = if window_secs > 0 { window_secs } else { DEFAULT_OBI_WINDOW_SECS };
        Self { threshold, book: WindowBook::new(Duration::seconds(window_secs)) }
    }

    pub fn on_observation(&mut self, o: &Observation) -> Option<Signal> {
        if o.symbol.is_empty() {
            return None;
        }
        let win = self.book.push(o);
        let anchor = win.oldest()?.price;
        if anchor <= 0.0 {
            return None;
        }
        let obi = win.imbalance();
        let momentum = (3.0 * (o.price - anchor) / anchor).tanh().clamp(-1.0, 1.0);
        let score = 0.6 * obi + 0.4 * momentum;
        if score.abs() < self.threshold {
            return None;
        }
        Some(Signal {
            symbol: o.symbol.clone(),
            score,
            reason: format!("obi={obi:.2} momentum={momentum:.2}"),
            ts: o.ts,
        })
    }
}

// -----------------------------------------------------------------------------
// 2) TREND FOLLOWER
//    change = (latest - oldest) / oldest over the window; score = change.
//    Filters: |change| >= threshold and, when min_volume > 0, window notional
//    must reach min_volume.
// -----------------------------------------------------------------------------
#[derive(Debug)]
pub struct TrendFollower {
    threshold: f64,
    min_volume: f64,
    book: WindowBook,
}

impl TrendFollower {
    pub fn new(threshold: f64, window_secs: i64, min_volume: f64) -> Self {
        let threshold = if threshold > 0.0 { threshold } else { DEFAULT_TREND_THRESHOLD };
        let window_secs = if window_secs > 0 { window_secs } else { DEFAULT_TREND_WINDOW_SECS };
        Self {
            threshold,
            min_volume: min_volume.max(0.0),
            book: WindowBook::new(Duration::seconds(window_secs)),
        }
    }

    pub fn on_observation(&mut self, o: &Observation) -> Option<Signal> {
        if o.symbol.is_empty() || o.price <= 0.0 {
            return None;
        }
        let win = self.book.push(o);
        let oldest = win.oldest()?.price;
        let latest = win.latest()?.price;
        if oldest <= 0.0 {
            return None;
        }
        let change = (latest - oldest) / oldest;
        if change.abs() < self.threshold {
            return None;
        }
        let volume = win.notional();
        if self.min_volume > 0.0 && volume < self.min_volume {
            return None;
        }
        Some(Signal {
            symbol: o.symbol.clone(),
            score: change,
            reason: format!("Δ={:.2}% volume={volume:.0}", change * 100.0),
            ts: o.ts,
        })
    }
}

// ===== Selection =====
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyMode {
    ObiMomentum,
    TrendFollower,
}

impl StrategyMode {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "obi" | "obi_momentum" => Some(StrategyMode::ObiMomentum),
            "trend" | "trend_follow" | "trend_follower" => Some(StrategyMode::TrendFollower),
            _ => None,
        }
    }

    /// Unrecognised modes fall back to OBI momentum. That fallback can hide a
    /// misspelt mode, so it is at least logged here.
    pub fn from_mode(s: &str) -> Self {
        Self::parse_one(s).unwrap_or_else(|| {
            warn!(mode = %s, "unknown strategy mode, falling back to obi_momentum");
            StrategyMode::ObiMomentum
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyMode::ObiMomentum => "obi_momentum",
            StrategyMode::TrendFollower => "trend_follower",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StrategyParams {
    pub obi_threshold: f64,
    pub obi_window_secs: i64,
    pub trend_threshold: f64,
    pub trend_window_secs: i64,
    pub trend_min_volume: f64,
}

#[derive(Debug)]
pub enum Strategy {
    ObiMomentum(ObiMomentum),
    TrendFollower(TrendFollower),
}

impl Strategy {
    pub fn build(mode: StrategyMode, p: &StrategyParams) -> Self {
        match mode {
            StrategyMode::ObiMomentum => {
                Strategy::ObiMomentum(ObiMomentum::new(p.obi_threshold, p.obi_window_secs))
            }
            StrategyMode::TrendFollower => Strategy::TrendFollower(TrendFollower::new(
                p.trend_threshold,
                p.trend_window_secs,
                p.trend_min_volume,
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ObiMomentum(_) => StrategyMode::ObiMomentum.as_str(),
            Strategy::TrendFollower(_) => StrategyMode::TrendFollower.as_str(),
        }
    }

    pub fn on_observation(&mut self, o: &Observation) -> Option<Signal> {
        match self {
            Strategy::ObiMomentum(s) => s.on_observation(o),
            Strategy::TrendFollower(s) => s.on_observation(o),
        }
    }

    /// Number of symbols currently holding a window.
    pub fn tracked_symbols(&self) -> usize {
        match self {
            Strategy::ObiMomentum(s) => s.book.tracked(),
            Strategy::TrendFollower(s) => s.book.tracked(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(sym: &str, px: f64, size: f64, side: Side, secs: i64) -> Observation {
        Observation {
            symbol: sym.to_string(),
            price: px,
            size,
            side,
            ts: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn obi_rising_buys_give_positive_score() {
        let mut st = ObiMomentum::new(0.1, 30);
        let mut last = None;
        for (i, px) in [100.0, 101.0, 102.0].into_iter().enumerate() {
            last = st.on_observation(&obs("BTCUSDT", px, 1.0, Side::Buy, i as i64));
        }
        let sig = last.expect("signal");
        assert!(sig.score > 0.0);
        assert_eq!(sig.symbol, "BTCUSDT");
    }

    #[test]
    fn obi_balanced_flow_stays_quiet() {
        let mut st = ObiMomentum::new(0.25, 60);
        assert!(st.on_observation(&obs("X", 10.0, 1.0, Side::Buy, 0)).is_some());
        // equal sell volume, flat price -> score 0
        assert!(st.on_observation(&obs("X", 10.0, 1.0, Side::Sell, 1)).is_none());
    }

    #[test]
    fn obi_ignores_empty_symbol_and_bad_anchor() {
        let mut st = ObiMomentum::new(0.1, 30);
        assert!(st.on_observation(&obs("", 100.0, 1.0, Side::Buy, 0)).is_none());
        assert!(st.on_observation(&obs("Z", 0.0, 1.0, Side::Buy, 0)).is_none());
    }

    #[test]
    fn obi_defaults_apply_for_non_positive_config() {
        let st = ObiMomentum::new(0.0, -5);
        assert_eq!(st.threshold, DEFAULT_OBI_THRESHOLD);
        assert_eq!(st.book.span, Duration::seconds(DEFAULT_OBI_WINDOW_SECS));
    }

    #[test]
    fn window_evicts_entries_outside_lookback() {
        let mut w = FeatureWindow::new(Duration::seconds(10));
        w.push(obs("A", 1.0, 1.0, Side::Buy, 0));
        w.push(obs("A", 2.0, 1.0, Side::Sell, 5));
        w.push(obs("A", 3.0, 1.0, Side::Sell, 10));
        assert_eq!(w.obs.len(), 2);
        assert_eq!(w.oldest().map(|o| o.price), Some(2.0));
        assert!(w.imbalance() < 0.0);
    }

    #[test]
    fn trend_emits_long_and_short() {
        let mut st = TrendFollower::new(0.02, 120, 100.0);
        let mut sig = None;
        for (px, t) in [(0.01, -90), (0.0105, -60), (0.011, 0)] {
            sig = st.on_observation(&obs("WIF", px, 5000.0, Side::Buy, t));
        }
        assert!(sig.expect("long").score > 0.0);

        let mut sig = None;
        for (px, t) in [(0.02, -90), (0.0195, -60), (0.018, 0)] {
            sig = st.on_observation(&obs("BODEN", px, 4000.0, Side::Sell, t));
        }
        assert!(sig.expect("short").score < 0.0);
    }

    #[test]
    fn trend_respects_min_volume() {
        let mut st = TrendFollower::new(0.02, 120, 1000.0);
        assert!(st.on_observation(&obs("LOW", 1.0, 1.0, Side::Buy, -30)).is_none());
        assert!(st.on_observation(&obs("LOW", 1.03, 1.0, Side::Buy, 0)).is_none());
    }

    #[test]
    fn trend_below_threshold_is_silent() {
        let mut st = TrendFollower::new(0.05, 60, 0.0);
        st.on_observation(&obs("T", 100.0, 1.0, Side::Buy, 0));
        assert!(st.on_observation(&obs("T", 104.0, 1.0, Side::Buy, 1)).is_none());
        let sig = st.on_observation(&obs("T", 106.0, 1.0, Side::Buy, 2)).expect("signal");
        assert!((sig.score - 0.06).abs() < 1e-12);
    }

    #[test]
    fn mode_parsing_and_fallback() {
        assert_eq!(StrategyMode::parse_one(" TREND "), Some(StrategyMode::TrendFollower));
        assert_eq!(StrategyMode::parse_one("obi_momentum"), Some(StrategyMode::ObiMomentum));
        assert_eq!(StrategyMode::parse_one("bogus"), None);
        assert_eq!(StrategyMode::from_mode("bogus"), StrategyMode::ObiMomentum);
        let st = Strategy::build(StrategyMode::from_mode("Trend_Follower"), &StrategyParams::default());
        assert_eq!(st.name(), "trend_follower");
    }

    #[test]
    fn idle_symbols_are_dropped() {
        let mut st = Strategy::build(StrategyMode::ObiMomentum, &StrategyParams {
            obi_threshold: 0.1,
            obi_window_secs: 10,
            ..Default::default()
        });
        st.on_observation(&obs("OLD", 1.0, 1.0, Side::Buy, 0));
        for i in 0..EVICT_EVERY as i64 {
            st.on_observation(&obs("NEW", 1.0, 1.0, Side::Buy, 100 + i));
        }
        assert_eq!(st.tracked_symbols(), 1);
    }
}
