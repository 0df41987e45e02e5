// ===============================
// src/account.rs (paper account: cash, positions, PnL)
// ===============================
//
// Long-only accumulation ledger. All state sits behind one mutex: the engine
// applies fills while the HTTP endpoint may read snapshots concurrently.
//
use std::collections::BTreeMap;

use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{Side, EPSILON};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(f64),
    #[error("price must be positive, got {0}")]
    NonPositivePrice(f64),
    #[error("insufficient cash for buy: need {needed:.4}, have {available:.4}")]
    InsufficientCash { needed: f64, available: f64 },
    #[error("position limit exceeded: {resulting:.6} > {limit:.6}")]
    PositionLimit { resulting: f64, limit: f64 },
    #[error("insufficient position to sell: want {requested:.6}, hold {held:.6}")]
    InsufficientPosition { requested: f64, held: f64 },
}

impl LedgerError {
    pub fn label(&self) -> &'static str {
        match self {
            LedgerError::NonPositiveQuantity(_) => "non_positive_qty",
            LedgerError::NonPositivePrice(_) => "non_positive_price",
            LedgerError::InsufficientCash { .. } => "insufficient_cash",
            LedgerError::PositionLimit { .. } => "position_limit",
            LedgerError::InsufficientPosition { .. } => "insufficient_position",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccountConfig {
    pub starting_cash: f64,
    /// Max quantity held per symbol; <= 0 disables.
    pub max_position_per_symbol: f64,
    /// Max cost-basis notional per symbol; <= 0 disables. Used for sizing only.
    pub max_position_notional: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position {
    qty: f64,
    avg_cost: f64,
}

#[derive(Debug, Default)]
struct Book {
    cash: f64,
    realized_pnl: f64,
    positions: HashMap<String, Position>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PositionSnapshot {
    pub qty: f64,
    pub avg_cost: f64,
    pub market_value: f64,
    pub unrealized: f64,
}

/// Point-in-time view, marked to the supplied prices.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub cash: f64,
    pub realized_pnl: f64,
    pub equity: f64,
    pub positions: BTreeMap<String, PositionSnapshot>,
}

impl Snapshot {
    pub fn unrealized(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized).sum()
    }

    pub fn quantities(&self) -> HashMap<String, f64> {
        self.positions.iter().map(|(s, p)| (s.clone(), p.qty)).collect()
    }
}

#[derive(Debug)]
pub struct Account {
    cfg: AccountConfig,
    book: Mutex<Book>,
}

impl Account {
    pub fn new(cfg: AccountConfig) -> Self {
        let book = Book { cash: cfg.starting_cash, ..Default::default() };
        Self { cfg, book: Mutex::new(book) }
    }

    pub fn starting_cash(&self) -> f64 { self.cfg.starting_cash }

    /// Apply one market fill. Rejections leave the account untouched.
    pub fn apply_fill(&self, symbol: &str, side: Side, qty: f64, price: f64) -> Result<(), LedgerError> {
        if qty.is_nan() || qty <= 0.0 {
            return Err(LedgerError::NonPositiveQuantity(qty));
        }
        if price.is_nan() || price <= 0.0 {
            return Err(LedgerError::NonPositivePrice(price));
        }

        let mut book = self.book.lock();
        let held = book.positions.get(symbol).copied().unwrap_or_default();
        let notional = qty * price;

        match side {
            Side::Buy => {
                if notional > book.cash + EPSILON {
                    return Err(LedgerError::InsufficientCash { needed: notional, available: book.cash });
                }
                let new_qty = held.qty + qty;
                let limit = self.cfg.max_position_per_symbol;
                if limit > 0.0 && new_qty > limit + EPSILON {
                    return Err(LedgerError::PositionLimit { resulting: new_qty, limit });
                }
                let avg_cost = (held.avg_cost * held.qty + notional) / new_qty;
                // exact debit; a sub-epsilon overdraw shows as a tiny negative balance
                book.cash -= notional;
                book.positions.insert(symbol.to_string(), Position { qty: new_qty, avg_cost });
            }
            Side::Sell => {
                if held.qty <= 0.0 || held.qty + EPSILON < qty {
                    return Err(LedgerError::InsufficientPosition { requested: qty, held: held.qty });
                }
                book.realized_pnl += (price - held.avg_cost) * qty;
                book.cash += notional;
                let rest = held.qty - qty;
                if rest <= EPSILON {
                    book.positions.remove(symbol);
                } else {
                    book.positions.insert(symbol.to_string(), Position { qty: rest, avg_cost: held.avg_cost });
                }
            }
        }
        Ok(())
    }

    /// Missing or non-positive marks contribute zero rather than stale values.
    pub fn snapshot(&self, marks: &HashMap<String, f64>) -> Snapshot {
        let book = self.book.lock();
        let mut positions = BTreeMap::new();
        let mut equity = book.cash;
        for (sym, pos) in &book.positions {
            let (market_value, unrealized) = match marks.get(sym).copied() {
                Some(mark) if mark > 0.0 => (pos.qty * mark, (mark - pos.avg_cost) * pos.qty),
                _ => (0.0, 0.0),
            };
            equity += market_value;
            positions.insert(
                sym.clone(),
                PositionSnapshot { qty: pos.qty, avg_cost: pos.avg_cost, market_value, unrealized },
            );
        }
        Snapshot { cash: book.cash, realized_pnl: book.realized_pnl, equity, positions }
    }

    pub fn available_cash(&self) -> f64 { self.book.lock().cash }

    pub fn realized_pnl(&self) -> f64 { self.book.lock().realized_pnl }

    pub fn position(&self, symbol: &str) -> f64 {
        self.book.lock().positions.get(symbol).map_or(0.0, |p| p.qty)
    }

    pub fn positions(&self) -> HashMap<String, f64> {
        self.book.lock().positions.iter().map(|(s, p)| (s.clone(), p.qty)).collect()
    }

    /// Remaining buy capacity (quantity) under the per-symbol quantity and
    /// notional caps. Unbounded when both caps are disabled.
    pub fn max_additional_long(&self, symbol: &str, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        let held = self.book.lock().positions.get(symbol).copied().unwrap_or_default();
        let mut capacity = f64::INFINITY;
        if self.cfg.max_position_per_symbol > 0.0 {
            capacity = capacity.min(self.cfg.max_position_per_symbol - held.qty);
        }
        if self.cfg.max_position_notional > 0.0 {
            let used = held.qty * held.avg_cost;
            capacity = capacity.min((self.cfg.max_position_notional - used) / price);
        }
        capacity.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYM: &str = "BTCUSDT";

    fn account(cash: f64, cap: f64) -> Account {
        Account::new(AccountConfig { starting_cash: cash, max_position_per_symbol: cap, max_position_notional: 0.0 })
    }

    fn marks(px: f64) -> HashMap<String, f64> {
        let mut m = HashMap::new();
        m.insert(SYM.to_string(), px);
        m
    }

    #[test]
    fn buy_buy_sell_tracks_avg_cost_and_pnl() {
        let acct = account(1000.0, 1.0);
        acct.apply_fill(SYM, Side::Buy, 0.5, 1000.0).unwrap();
        acct.apply_fill(SYM, Side::Buy, 0.25, 1100.0).unwrap();

        let snap = acct.snapshot(&marks(1150.0));
        let pos = &snap.positions[SYM];
        assert!((pos.qty - 0.75).abs() < 1e-9);
        assert!((pos.avg_cost - 3100.0 / 3.0).abs() < 1e-6);
        assert!(snap.equity > 0.0);

        acct.apply_fill(SYM, Side::Sell, 0.25, 1200.0).unwrap();
        let realized = acct.realized_pnl();
        assert!(realized > 0.0);
        assert!((realized - (1200.0 - 3100.0 / 3.0) * 0.25).abs() < 1e-9);

        let snap = acct.snapshot(&marks(1180.0));
        assert!((snap.cash + snap.positions[SYM].market_value - snap.equity).abs() < 1e-9);
    }

    #[test]
    fn avg_cost_is_notional_weighted_mean() {
        let acct = account(1_000_000.0, 0.0);
        let buys = [(1.0, 10.0), (2.5, 12.0), (0.75, 9.5), (4.0, 11.25)];
        for (q, p) in buys {
            acct.apply_fill(SYM, Side::Buy, q, p).unwrap();
        }
        let qty: f64 = buys.iter().map(|(q, _)| q).sum();
        let cost: f64 = buys.iter().map(|(q, p)| q * p).sum();
        let pos = &acct.snapshot(&HashMap::new()).positions[SYM];
        assert!((pos.avg_cost - cost / qty).abs() < 1e-9);
        assert!((acct.available_cash() - (1_000_000.0 - cost)).abs() < 1e-6);
    }

    #[test]
    fn rejects_buy_over_cash() {
        let acct = account(10.0, 1.0);
        let err = acct.apply_fill(SYM, Side::Buy, 0.1, 200.0).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCash { .. }));
        assert_eq!(acct.available_cash(), 10.0);
    }

    #[test]
    fn sub_epsilon_overdraw_is_debited_exactly() {
        let acct = account(1.0, 0.0);
        let px = 1.000_000_000_5;
        acct.apply_fill(SYM, Side::Buy, 1.0, px).unwrap();
        assert_eq!(acct.available_cash(), 1.0 - px);
        assert!(acct.available_cash() < 0.0);
        let pos = &acct.snapshot(&HashMap::new()).positions[SYM];
        assert_eq!(acct.available_cash() + pos.qty * pos.avg_cost, 1.0);
    }

    #[test]
    fn rejects_buy_over_position_cap() {
        let acct = account(1000.0, 0.1);
        let err = acct.apply_fill(SYM, Side::Buy, 0.2, 1000.0).unwrap_err();
        assert!(matches!(err, LedgerError::PositionLimit { .. }));
        assert_eq!(acct.position(SYM), 0.0);
    }

    #[test]
    fn rejects_sell_without_position() {
        let acct = account(1000.0, 1.0);
        let err = acct.apply_fill(SYM, Side::Sell, 0.01, 1000.0).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientPosition { .. }));

        acct.apply_fill(SYM, Side::Buy, 0.5, 100.0).unwrap();
        assert!(acct.apply_fill(SYM, Side::Sell, 0.5 + 1e-6, 100.0).is_err());
        assert!(acct.apply_fill(SYM, Side::Sell, 0.5 + 1e-12, 100.0).is_ok());
        assert!(acct.snapshot(&HashMap::new()).positions.is_empty());
    }

    #[test]
    fn rejects_non_positive_inputs_without_mutation() {
        let acct = account(1000.0, 0.0);
        assert_eq!(acct.apply_fill(SYM, Side::Buy, 0.0, 10.0), Err(LedgerError::NonPositiveQuantity(0.0)));
        assert_eq!(acct.apply_fill(SYM, Side::Buy, 1.0, -1.0), Err(LedgerError::NonPositivePrice(-1.0)));
        assert!(acct.apply_fill(SYM, Side::Buy, f64::NAN, 10.0).is_err());
        assert_eq!(acct.available_cash(), 1000.0);
    }

    #[test]
    fn full_sell_removes_position() {
        let acct = account(1000.0, 0.0);
        acct.apply_fill(SYM, Side::Buy, 2.0, 100.0).unwrap();
        acct.apply_fill(SYM, Side::Sell, 2.0, 90.0).unwrap();
        assert!(acct.positions().is_empty());
        assert!((acct.realized_pnl() + 20.0).abs() < 1e-9);
        assert!((acct.available_cash() - 980.0).abs() < 1e-9);
    }

    #[test]
    fn equity_reconciles_for_any_marks() {
        let acct = account(5000.0, 0.0);
        acct.apply_fill("A", Side::Buy, 3.0, 100.0).unwrap();
        acct.apply_fill("B", Side::Buy, 7.0, 50.0).unwrap();
        acct.apply_fill("C", Side::Buy, 1.0, 10.0).unwrap();
        let mut m = HashMap::new();
        m.insert("A".to_string(), 123.45);
        m.insert("B".to_string(), 0.0);
        // C has no mark at all
        let snap = acct.snapshot(&m);
        let mut expected = snap.cash;
        for (sym, qty) in acct.positions() {
            let mark = m.get(&sym).copied().unwrap_or(0.0);
            expected += qty * mark;
        }
        assert!((snap.equity - expected).abs() < 1e-9);
        assert_eq!(snap.positions["C"].market_value, 0.0);
        assert_eq!(snap.positions["C"].unrealized, 0.0);
    }

    #[test]
    fn additional_long_capacity_honours_both_caps() {
        let acct = Account::new(AccountConfig {
            starting_cash: 10_000.0,
            max_position_per_symbol: 5.0,
            max_position_notional: 300.0,
        });
        assert!((acct.max_additional_long(SYM, 100.0) - 3.0).abs() < 1e-12);
        acct.apply_fill(SYM, Side::Buy, 2.0, 100.0).unwrap();
        assert!((acct.max_additional_long(SYM, 100.0) - 1.0).abs() < 1e-12);
        assert!((acct.max_additional_long(SYM, 10.0) - 3.0).abs() < 1e-12);
        assert_eq!(acct.max_additional_long(SYM, 0.0), 0.0);
        assert!(account(1.0, 0.0).max_additional_long(SYM, 1.0).is_infinite());
    }
}
