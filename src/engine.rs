// ===============================
// src/engine.rs (paper trading loop)
// ===============================
//
// Single consumer of the observation queue. Each observation runs to
// completion (marks -> halt checks -> strategy -> sizing/risk -> executor ->
// account) before the next one is taken, so account mutations are totally
// ordered. A risk halt flattens every open position once and ends the loop.
//
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::account::{Account, LedgerError, Snapshot};
use crate::domain::{Fill, Observation, Order, Side, EPSILON};
use crate::execution::{ExecError, Simulator};
use crate::history::{FillHistory, FillSink};
use crate::metrics::{
    FILLS, HALTS, OBSERVATIONS_BY_SYMBOL, PAPER_EQUITY, PAPER_POSITION, PAPER_REALIZED, REJECTS,
    SIGNALS_BY,
};
use crate::risk::{self, Limits, RiskBreach};
use crate::strategy::Strategy;

/// Latest trade price per symbol, shared with the read endpoints.
pub type Marks = Arc<RwLock<HashMap<String, f64>>>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Rejection {
    #[error("risk: {0}")]
    Risk(#[from] RiskBreach),
    #[error("executor: {0}")]
    Exec(#[from] ExecError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

impl Rejection {
    fn label(&self) -> &'static str {
        match self {
            Rejection::Risk(b) => b.label(),
            Rejection::Exec(_) => "invalid_order",
            Rejection::Ledger(e) => e.label(),
        }
    }
}

/// What one observation led to.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Non-positive price, or trading already halted.
    Ignored,
    NoSignal,
    /// Signal present but sizing left nothing to trade.
    Skipped(&'static str),
    Rejected(Rejection),
    Filled { side: Side, qty: f64 },
    Halted(RiskBreach),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunExit {
    Shutdown,
    FeedClosed,
    Halted(RiskBreach),
}

pub struct Engine<R: Rng = StdRng> {
    strategy: Strategy,
    limits: Limits,
    simulator: Simulator<R>,
    account: Arc<Account>,
    history: Arc<FillHistory>,
    sinks: Vec<Arc<dyn FillSink>>,
    marks: Marks,
    peak_equity: f64,
    halted: bool,
}

impl<R: Rng> Engine<R> {
    pub fn new(
        strategy: Strategy,
        limits: Limits,
        simulator: Simulator<R>,
        account: Arc<Account>,
        history: Arc<FillHistory>,
        marks: Marks,
    ) -> Self {
        let peak_equity = account.starting_cash();
        Self {
            strategy,
            limits,
            simulator,
            account,
            history,
            sinks: Vec::new(),
            marks,
            peak_equity,
            halted: false,
        }
    }

    /// Extra fill consumer (e.g. the JSONL recorder).
    pub fn with_sink(mut self, sink: Arc<dyn FillSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn account(&self) -> &Arc<Account> { &self.account }
    pub fn history(&self) -> &Arc<FillHistory> { &self.history }
    pub fn is_halted(&self) -> bool { self.halted }

    pub fn snapshot(&self) -> Snapshot {
        self.account.snapshot(&self.marks.read())
    }

    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Observation>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunExit {
        let exec = self.simulator.config();
        info!(
            strategy = self.strategy.name(),
            slippage_bps = exec.slippage_bps,
            max_latency_ms = exec.max_latency_ms,
            max_partial_fills = exec.max_partial_fills,
            "paper engine started"
        );
        loop {
            if *shutdown.borrow() {
                return RunExit::Shutdown;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(tracked_symbols = self.strategy.tracked_symbols(), "shutting down");
                        return RunExit::Shutdown;
                    }
                }
                maybe_obs = rx.recv() => {
                    let Some(obs) = maybe_obs else {
                        warn!("observation queue closed");
                        return RunExit::FeedClosed;
                    };
                    if let Outcome::Halted(breach) = self.on_observation(obs) {
                        return RunExit::Halted(breach);
                    }
                }
            }
        }
    }

    pub fn on_observation(&mut self, obs: Observation) -> Outcome {
        if !obs.price.is_finite() || obs.price <= 0.0 {
            return Outcome::Ignored;
        }
        OBSERVATIONS_BY_SYMBOL.with_label_values(&[obs.symbol.as_str()]).inc();
        self.marks.write().insert(obs.symbol.clone(), obs.price);
        if self.halted {
            return Outcome::Ignored;
        }

        let snap = self.snapshot();
        self.peak_equity = self.peak_equity.max(snap.equity);
        if let Err(breach) = self.limits.check_halt(
            self.account.starting_cash(),
            self.peak_equity,
            snap.equity,
            snap.realized_pnl,
        ) {
            self.halt(breach);
            return Outcome::Halted(breach);
        }

        let Some(sig) = self.strategy.on_observation(&obs) else {
            return Outcome::NoSignal;
        };
        SIGNALS_BY.with_label_values(&[self.strategy.name(), sig.symbol.as_str()]).inc();

        let side = if sig.score < 0.0 { Side::Sell } else { Side::Buy };
        let qty = match side {
            Side::Buy => match self.size_buy(&obs.symbol, obs.price) {
                Ok(q) => q,
                Err(why) => {
                    debug!(symbol = %obs.symbol, reason = why, "buy skipped");
                    return Outcome::Skipped(why);
                }
            },
            Side::Sell => self.account.position(&obs.symbol),
        };
        if qty <= 0.0 {
            return Outcome::Skipped("nothing_to_trade");
        }

        let order = Order { symbol: obs.symbol.clone(), side, qty, px: obs.price };
        if side == Side::Buy {
            let gross = risk::exposure(&snap.quantities(), &self.marks.read()).gross;
            if let Err(breach) = self.limits.check_buy(gross, order.notional()) {
                return self.reject(&order, breach.into());
            }
        }

        let (filled, last_err) = match self.execute(&order) {
            Ok(res) => res,
            Err(e) => return self.reject(&order, e.into()),
        };
        if filled <= 0.0 {
            return match last_err {
                Some(e) => Outcome::Rejected(e.into()),
                None => Outcome::Skipped("no_fills"),
            };
        }

        let snap = self.snapshot();
        self.publish(&snap, Some(order.symbol.as_str()));
        let exp = risk::exposure(&snap.quantities(), &self.marks.read());
        let (position, avg_cost) = snap
            .positions
            .get(&order.symbol)
            .map_or((0.0, 0.0), |p| (p.qty, p.avg_cost));
        info!(
            symbol = %order.symbol,
            side = side.as_str(),
            qty = filled,
            signal_score = sig.score,
            reason = %sig.reason,
            cash = snap.cash,
            equity = snap.equity,
            realized = snap.realized_pnl,
            unrealized = snap.unrealized(),
            gross_exposure = exp.gross,
            net_exposure = exp.net,
            position,
            avg_cost,
            "paper fills processed"
        );

        self.peak_equity = self.peak_equity.max(snap.equity);
        let after = if self.limits.breached(self.account.starting_cash(), snap.equity) {
            Some(RiskBreach::Drawdown)
        } else if self.limits.daily_loss_breached(snap.realized_pnl) {
            Some(RiskBreach::DailyLoss)
        } else {
            None
        };
        if let Some(breach) = after {
            self.halt(breach);
            return Outcome::Halted(breach);
        }
        Outcome::Filled { side, qty: filled }
    }

    /// Buy quantity: per-trade notional (or all cash when uncapped), bounded
    /// by free cash and the per-symbol caps.
    fn size_buy(&self, symbol: &str, price: f64) -> Result<f64, &'static str> {
        let cash = self.account.available_cash();
        if cash <= 0.0 {
            warn!("paper account out of cash; waiting for positions to unwind");
            return Err("out_of_cash");
        }
        let cap = self.limits.max_notional_per_trade;
        let notional = if cap > 0.0 { cap.min(cash) } else { cash };
        let capacity = self.account.max_additional_long(symbol, price);
        if capacity <= 0.0 {
            return Err("position_cap");
        }
        Ok((notional / price).min(capacity))
    }

    /// Submit and apply every fill; returns (filled qty, last ledger rejection).
    fn execute(&mut self, order: &Order) -> Result<(f64, Option<LedgerError>), ExecError> {
        let fills = self.simulator.submit(order)?;
        let mut filled = 0.0;
        let mut last_err = None;
        for mut fill in fills {
            if fill.price <= 0.0 {
                fill.price = order.px;
            }
            match self.account.apply_fill(&order.symbol, order.side, fill.qty, fill.price) {
                Ok(()) => {
                    filled += fill.qty;
                    self.record(&fill);
                }
                Err(e) => {
                    warn!(symbol = %order.symbol, error = %e, "paper fill rejected");
                    REJECTS.with_label_values(&[e.label()]).inc();
                    last_err = Some(e);
                }
            }
        }
        Ok((filled, last_err))
    }

    fn record(&self, fill: &Fill) {
        FILLS.with_label_values(&[fill.side.as_str()]).inc();
        self.history.record(fill);
        for sink in &self.sinks {
            sink.record(fill);
        }
    }

    fn reject(&self, order: &Order, why: Rejection) -> Outcome {
        warn!(symbol = %order.symbol, side = order.side.as_str(), qty = order.qty, reason = %why, "order rejected");
        REJECTS.with_label_values(&[why.label()]).inc();
        Outcome::Rejected(why)
    }

    /// One-shot: flatten everything and stop trading.
    fn halt(&mut self, breach: RiskBreach) {
        if self.halted {
            return;
        }
        self.halted = true;
        HALTS.with_label_values(&[breach.label()]).inc();
        warn!(reason = %breach, "risk limit triggered; flattening positions and pausing trading");
        self.flatten();
        let snap = self.snapshot();
        self.publish(&snap, None);
        self.peak_equity = snap.equity;
    }

    fn flatten(&mut self) {
        let snap = self.snapshot();
        for (sym, pos) in snap.positions {
            if pos.qty <= EPSILON {
                continue;
            }
            let mark = self.marks.read().get(&sym).copied().unwrap_or(0.0);
            let px = if mark > 0.0 {
                mark
            } else if pos.avg_cost > 0.0 {
                pos.avg_cost
            } else {
                1.0
            };
            let order = Order { symbol: sym.clone(), side: Side::Sell, qty: pos.qty, px };
            match self.execute(&order) {
                Ok((filled, _)) => info!(symbol = %sym, qty = filled, px, "flattened"),
                Err(e) => warn!(symbol = %sym, error = %e, "flatten submit failed"),
            }
            self.marks.write().insert(sym, px);
        }
    }

    fn publish(&self, snap: &Snapshot, touched: Option<&str>) {
        PAPER_EQUITY.set(snap.equity);
        PAPER_REALIZED.set(snap.realized_pnl);
        for (sym, pos) in &snap.positions {
            PAPER_POSITION.with_label_values(&[sym.as_str()]).set(pos.qty);
        }
        match touched {
            Some(sym) if !snap.positions.contains_key(sym) => {
                PAPER_POSITION.with_label_values(&[sym]).set(0.0);
            }
            None => {
                for sym in self.marks.read().keys() {
                    if !snap.positions.contains_key(sym) {
                        PAPER_POSITION.with_label_values(&[sym.as_str()]).set(0.0);
                    }
                }
            }
            _ => {}
        }
    }
}
