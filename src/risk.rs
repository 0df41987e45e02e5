// ===============================
// src/risk.rs
// ===============================
//
// Stateless guard-rails. Every limit <= 0 means "disabled", never "always breach".
//
use ahash::AHashMap as HashMap;
use serde::Serialize;
use thiserror::Error;

#[derive(Clone, Debug, Default)]
pub struct Limits {
    pub max_notional_per_trade: f64,
    pub max_portfolio_notional: f64,
    pub max_drawdown_pct: f64,
    pub intra_trade_drawdown_pct: f64,
    pub max_daily_loss: f64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum RiskBreach {
    #[error("trade notional {notional:.2} over per-trade limit")]
    TradeNotional { notional: f64 },
    #[error("projected portfolio notional {projected:.2} over limit")]
    PortfolioNotional { projected: f64 },
    #[error("drawdown limit reached")]
    Drawdown,
    #[error("intratrade drawdown reached")]
    IntraTradeDrawdown,
    #[error("daily loss limit reached")]
    DailyLoss,
}

impl RiskBreach {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RiskBreach::TradeNotional { .. } => "trade_notional",
            RiskBreach::PortfolioNotional { .. } => "portfolio_notional",
            RiskBreach::Drawdown => "drawdown",
            RiskBreach::IntraTradeDrawdown => "intratrade_drawdown",
            RiskBreach::DailyLoss => "daily_loss",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Exposure {
    pub gross: f64,
    pub net: f64,
}

impl Limits {
    pub fn allow(&self, notional: f64) -> bool {
        notional <= self.max_notional_per_trade || self.max_notional_per_trade <= 0.0
    }

    /// Equity decline from the starting bankroll. Skipped when either side is non-positive.
    pub fn breached(&self, starting_cash: f64, current_equity: f64) -> bool {
        if self.max_drawdown_pct <= 0.0 || starting_cash <= 0.0 || current_equity <= 0.0 {
            return false;
        }
        (starting_cash - current_equity) / starting_cash >= self.max_drawdown_pct
    }

    /// Equity decline from the session peak.
    pub fn intra_trade_breached(&self, peak_equity: f64, current_equity: f64) -> bool {
        if self.intra_trade_drawdown_pct <= 0.0 || peak_equity <= 0.0 || current_equity <= 0.0 {
            return false;
        }
        (peak_equity - current_equity) / peak_equity >= self.intra_trade_drawdown_pct
    }

    pub fn daily_loss_breached(&self, realized_pnl: f64) -> bool {
        self.max_daily_loss > 0.0 && -realized_pnl >= self.max_daily_loss
    }

    /// Over the cap and growing. A trade that lowers gross exposure always passes.
    pub fn portfolio_breached(&self, current_gross: f64, projected_gross: f64) -> bool {
        self.max_portfolio_notional > 0.0
            && projected_gross > self.max_portfolio_notional
            && projected_gross > current_gross
    }

    /// Session-level checks evaluated around every tick, in priority order.
    pub fn check_halt(
        &self,
        starting_cash: f64,
        peak_equity: f64,
        equity: f64,
        realized_pnl: f64,
    ) -> Result<(), RiskBreach> {
        if self.daily_loss_breached(realized_pnl) {
            return Err(RiskBreach::DailyLoss);
        }
        if self.breached(starting_cash, equity) {
            return Err(RiskBreach::Drawdown);
        }
        if self.intra_trade_breached(peak_equity, equity) {
            return Err(RiskBreach::IntraTradeDrawdown);
        }
        Ok(())
    }

    /// Per-trade checks for a proposed Buy.
    pub fn check_buy(&self, current_gross: f64, notional: f64) -> Result<(), RiskBreach> {
        let projected = current_gross + notional;
        if self.portfolio_breached(current_gross, projected) {
            return Err(RiskBreach::PortfolioNotional { projected });
        }
        if !self.allow(notional) {
            return Err(RiskBreach::TradeNotional { notional });
        }
        Ok(())
    }
}

/// Gross = sum |qty * mark|, net = sum qty * mark. Symbols without a mark count as zero.
pub fn exposure(positions: &HashMap<String, f64>, marks: &HashMap<String, f64>) -> Exposure {
    let mut out = Exposure::default();
    for (sym, qty) in positions {
        let mark = marks.get(sym).copied().unwrap_or(0.0);
        let value = qty * mark;
        out.gross += value.abs();
        out.net += value;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_respects_per_trade_cap() {
        let lim = Limits { max_notional_per_trade: 50.0, ..Default::default() };
        assert!(lim.allow(49.9));
        assert!(!lim.allow(50.1));
        let open = Limits::default();
        assert!(open.allow(1e12));
    }

    #[test]
    fn drawdown_from_starting_cash() {
        let lim = Limits { max_drawdown_pct: 0.2, ..Default::default() };
        assert!(lim.breached(1000.0, 750.0));
        assert!(!lim.breached(1000.0, 900.0));
        assert!(!lim.breached(0.0, 10.0));
        assert!(!lim.breached(1000.0, 0.0));
        assert!(!lim.breached(1000.0, -5.0));
        assert!(!Limits::default().breached(1000.0, 1.0));
    }

    #[test]
    fn intratrade_from_peak() {
        let lim = Limits { intra_trade_drawdown_pct: 0.1, ..Default::default() };
        assert!(lim.intra_trade_breached(1200.0, 1080.0));
        assert!(!lim.intra_trade_breached(1200.0, 1100.0));
        assert!(!lim.intra_trade_breached(0.0, 1100.0));
        assert!(!lim.intra_trade_breached(1000.0, 0.0));
    }

    #[test]
    fn daily_loss_uses_realized_only() {
        let lim = Limits { max_daily_loss: 100.0, ..Default::default() };
        assert!(lim.daily_loss_breached(-100.0));
        assert!(!lim.daily_loss_breached(-99.0));
        assert!(!lim.daily_loss_breached(500.0));
        assert!(!Limits::default().daily_loss_breached(-1e9));
    }

    #[test]
    fn portfolio_allows_derisking_over_cap() {
        let lim = Limits { max_portfolio_notional: 1000.0, ..Default::default() };
        assert!(lim.portfolio_breached(900.0, 1100.0));
        assert!(!lim.portfolio_breached(1500.0, 1200.0));
        assert!(!lim.portfolio_breached(100.0, 1000.0));
    }

    #[test]
    fn halt_checks_report_first_breach() {
        let lim = Limits { max_drawdown_pct: 0.2, max_daily_loss: 50.0, ..Default::default() };
        assert_eq!(lim.check_halt(1000.0, 1000.0, 700.0, -60.0), Err(RiskBreach::DailyLoss));
        assert_eq!(lim.check_halt(1000.0, 1000.0, 700.0, 0.0), Err(RiskBreach::Drawdown));
        assert_eq!(lim.check_halt(1000.0, 1000.0, 990.0, 0.0), Ok(()));
        let intra = Limits { intra_trade_drawdown_pct: 0.1, ..lim };
        assert_eq!(intra.check_halt(1000.0, 1500.0, 1300.0, 0.0), Err(RiskBreach::IntraTradeDrawdown));
    }

    #[test]
    fn exposure_sums_gross_and_net() {
        let mut pos = HashMap::new();
        pos.insert("A".to_string(), 2.0);
        pos.insert("B".to_string(), 1.0);
        pos.insert("C".to_string(), 3.0);
        let mut marks = HashMap::new();
        marks.insert("A".to_string(), 10.0);
        marks.insert("B".to_string(), 5.0);
        let e = exposure(&pos, &marks);
        assert!((e.gross - 25.0).abs() < 1e-12);
        assert!((e.net - 25.0).abs() < 1e-12);
    }
}
