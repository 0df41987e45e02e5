// ===============================
// src/main.rs
// ===============================
/*
 # account and recent fills while running
 curl -s localhost:8081/paper/account | jq .
 curl -s localhost:8081/paper/fills | jq 'length'

 # equity and halts
 curl -s localhost:8081/metrics | egrep '^(paper_equity|halts_total)'
*/
/*
=============================================================================
Project : paper_engine — async paper trading engine in Rust
Module  : main.rs
Version : 0.5.0
License : MIT (see LICENSE)

Summary : Streams trade prints (mock/Binance), derives OBI-momentum or
          trend signals, gates orders through risk limits, simulates fills
          with partials/slippage/latency, keeps a virtual account, exposes
          Prometheus metrics and paper read endpoints, records JSONL fills.
=============================================================================
*/
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use paper_engine::{
    account::Account,
    api::{self, ApiState},
    config::{self, FeedMode},
    domain::Observation,
    engine::{Engine, Marks, RunExit},
    execution::Simulator,
    feed,
    history::FillHistory,
    metrics, recorder,
    strategy::{Strategy, StrategyMode},
};

#[tokio::main]
async fn main() {
    // ---- Load config ----
    let args = config::load();

    // ---- Logging (RUST_LOG wins) ----
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let symbols = args.symbols();
    if symbols.is_empty() {
        error!("no symbols configured (SYMBOLS)");
        return;
    }
    let mode = StrategyMode::from_mode(&args.strategy_mode);
    let limits = args.limits();
    let exec_cfg = args.exec_config();

    // ---- Metrics + startup info ----
    metrics::init();
    metrics::CONFIG_STRATEGY.with_label_values(&[mode.as_str()]).set(1);
    metrics::CONFIG_SYMBOLS.set(symbols.len() as i64);
    info!(
        feed_mode = args.feed_mode.as_str(),
        symbols = ?symbols,
        strategy = mode.as_str(),
        starting_cash = args.starting_cash,
        max_notional_per_trade = limits.max_notional_per_trade,
        max_portfolio_notional = limits.max_portfolio_notional,
        kill_switch = limits.max_drawdown_pct,
        intratrade = limits.intra_trade_drawdown_pct,
        max_daily_loss = limits.max_daily_loss,
        slippage_bps = exec_cfg.slippage_bps,
        max_latency_ms = exec_cfg.max_latency_ms,
        "startup config"
    );

    // ---- Shared state ----
    let account = Arc::new(Account::new(args.account_config()));
    let history = Arc::new(FillHistory::new(args.fill_history_capacity));
    let marks = Marks::default();
    let (stop_tx, stop_rx) = watch::channel(false);

    // ---- HTTP ----
    if args.http_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
        let state = ApiState { account: account.clone(), history: history.clone(), marks: marks.clone() };
        let rx = stop_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(addr, state, rx).await {
                error!(?e, "http server failed");
            }
        });
    }

    // ---- Engine ----
    let strategy = Strategy::build(mode, &args.strategy_params());
    let mut engine = Engine::new(
        strategy,
        limits,
        Simulator::from_entropy(exec_cfg),
        account.clone(),
        history.clone(),
        marks.clone(),
    );

    // ---- Recorder (optional) ----
    let mut recorder_task = None;
    if let Some(path) = args.fills_path.clone() {
        match recorder::spawn(&path, 8192).await {
            Ok((rec, task)) => {
                engine = engine.with_sink(Arc::new(rec));
                recorder_task = Some(task);
            }
            Err(e) => warn!(%path, error = %e, "cannot open fills file; recording disabled"),
        }
    }

    // ---- FEED ----
    let (obs_tx, obs_rx) = mpsc::channel::<Observation>(args.queue_capacity.max(1));
    for sym in symbols {
        let tx = obs_tx.clone();
        let rx = stop_rx.clone();
        let stop = stop_tx.clone();
        let mode = args.feed_mode;
        let base = args.binance_ws_url.clone();
        let interval = Duration::from_millis(args.mock_interval_ms.max(1));
        tokio::spawn(async move {
            let res = match mode {
                FeedMode::Mock => feed::run_mock(tx, rx, sym.clone(), interval).await,
                FeedMode::Binance => feed::run_binance(tx, rx, sym.clone(), base).await,
            };
            if let Err(e) = res {
                error!(symbol = %sym, error = %e, "feed failed; stopping");
                let _ = stop.send(true);
            }
        });
    }
    drop(obs_tx);

    // ---- Ctrl-C ----
    {
        let stop = stop_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received");
                let _ = stop.send(true);
            }
        });
    }

    let exit = engine.run(obs_rx, stop_rx).await;
    let _ = stop_tx.send(true);
    match exit {
        RunExit::Halted(reason) => warn!(%reason, "trading halted"),
        RunExit::FeedClosed => warn!("all feeds ended"),
        RunExit::Shutdown => {}
    }

    if let Some(task) = recorder_task {
        // engine (and its sink handle) is gone; wait for the final flush
        let _ = task.await;
    }

    let snap = account.snapshot(&marks.read());
    info!(
        cash = snap.cash,
        realized = snap.realized_pnl,
        unrealized = snap.unrealized(),
        equity = snap.equity,
        positions = snap.positions.len(),
        fills = history.len(),
        "final paper account"
    );
}
