use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use paper_engine::{
    account::{Account, AccountConfig},
    domain::{Observation, Side, EPSILON},
    engine::{Engine, Marks, RunExit},
    execution::{ExecConfig, Simulator},
    history::FillHistory,
    risk::{Limits, RiskBreach},
    strategy::{Strategy, StrategyMode, StrategyParams},
};
use tokio::sync::{mpsc, watch};

fn print(symbol: &str, price: f64, size: f64, side: Side, secs: i64) -> Observation {
    Observation {
        symbol: symbol.into(),
        price,
        size,
        side,
        ts: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs),
    }
}

fn setup(limits: Limits, exec: ExecConfig, seed: u64) -> (Engine, Arc<Account>, Arc<FillHistory>, Marks) {
    let account = Arc::new(Account::new(AccountConfig { starting_cash: 1000.0, ..Default::default() }));
    let history = Arc::new(FillHistory::new(256));
    let marks = Marks::default();
    let params = StrategyParams { obi_threshold: 0.1, obi_window_secs: 30, ..Default::default() };
    let engine = Engine::new(
        Strategy::build(StrategyMode::ObiMomentum, &params),
        limits,
        Simulator::seeded(exec, seed),
        account.clone(),
        history.clone(),
        marks.clone(),
    );
    (engine, account, history, marks)
}

#[tokio::test]
async fn round_trip_conserves_cash_and_reconciles_equity() {
    let exec = ExecConfig {
        max_latency_ms: 5,
        slippage_bps: 10.0,
        partial_fill_probability: 1.0,
        max_partial_fills: 3,
    };
    let limits = Limits { max_notional_per_trade: 200.0, ..Default::default() };
    let (engine, account, history, marks) = setup(limits, exec, 42);

    let (tx, rx) = mpsc::channel(4);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(engine.run(rx, stop_rx));

    tx.send(print("BTCUSDT", 100.0, 2.0, Side::Buy, 0)).await.unwrap();
    for i in 1..5 {
        tx.send(print("BTCUSDT", 100.0 - i as f64, 20.0, Side::Sell, i)).await.unwrap();
    }
    drop(tx);
    assert_eq!(task.await.unwrap(), RunExit::FeedClosed);

    let fills = history.snapshot();
    assert!(fills.len() >= 2, "expected a buy and a closing sell");
    let mut cash = 1000.0;
    for f in &fills {
        assert!(f.latency_ms <= 5);
        assert!(f.qty > 0.0);
        cash -= f.side.sign() * f.qty * f.price;
    }
    assert!((account.available_cash() - cash).abs() < 1e-6);
    assert!(account.position("BTCUSDT").abs() <= EPSILON);

    let snap = account.snapshot(&marks.read());
    let mv: f64 = snap.positions.values().map(|p| p.market_value).sum();
    assert!((snap.equity - (snap.cash + mv)).abs() < 1e-9);
    assert!(snap.realized_pnl < 0.0);
}

#[tokio::test]
async fn kill_switch_flattens_and_ends_run() {
    let exec = ExecConfig { max_latency_ms: 0, slippage_bps: 0.0, partial_fill_probability: 0.0, max_partial_fills: 1 };
    let limits = Limits { max_drawdown_pct: 0.1, ..Default::default() };
    let (engine, account, history, _marks) = setup(limits, exec, 7);

    let (tx, rx) = mpsc::channel(8);
    let (_stop_tx, stop_rx) = watch::channel(false);
    tx.send(print("ETHUSDT", 50.0, 1.0, Side::Buy, 0)).await.unwrap();
    tx.send(print("ETHUSDT", 40.0, 1.0, Side::Buy, 1)).await.unwrap();
    let exit = engine.run(rx, stop_rx).await;

    assert_eq!(exit, RunExit::Halted(RiskBreach::Drawdown));
    assert!(account.positions().is_empty());
    assert!((account.available_cash() - 800.0).abs() < 1e-6);
    let last = history.snapshot().pop().unwrap();
    assert_eq!(last.side, Side::Sell);
    assert_eq!(last.price, 40.0);
}
