// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : paper_engine — async paper trading engine in Rust
Module  : config.rs
Version : 0.5.0
License : MIT (see LICENSE)

Summary : Streams trade prints (mock/Binance), derives OBI-momentum or
          trend signals, gates orders through risk limits, simulates fills
          with partials/slippage/latency, keeps a virtual account, exposes
          Prometheus metrics and paper read endpoints, records JSONL fills.
=============================================================================
*/
use clap::{Parser, ValueEnum};
use dotenvy::dotenv;

use crate::account::AccountConfig;
use crate::execution::ExecConfig;
use crate::risk::Limits;
use crate::strategy::StrategyParams;

/// Source of market observations
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FeedMode {
    Mock,
    Binance,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Mock => "mock",
            FeedMode::Binance => "binance",
        }
    }
}

/// Every flag can also come from the environment (or `.env`).
#[derive(Clone, Debug, Parser)]
#[command(name = "paper_engine", version, about = "Paper trading engine")]
pub struct Args {
    // ===== Logging / HTTP =====
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
    /// Port for /metrics, /paper/fills and /paper/account (0 disables)
    #[arg(long, env = "HTTP_PORT", default_value_t = 8081)]
    pub http_port: u16,

    // ===== Feed =====
    #[arg(long, env = "FEED_MODE", value_enum, ignore_case = true, default_value = "mock")]
    pub feed_mode: FeedMode,
    /// Comma separated, e.g. BTCUSDT,ETHUSDT
    #[arg(long, env = "SYMBOLS", value_delimiter = ',', default_value = "BTCUSDT")]
    pub symbols: Vec<String>,
    #[arg(long, env = "BINANCE_WS_URL", default_value = "wss://stream.binance.com:9443/ws")]
    pub binance_ws_url: String,
    #[arg(long, env = "MOCK_INTERVAL_MS", default_value_t = 500)]
    pub mock_interval_ms: u64,
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    // ===== Strategy =====
    /// obi | obi_momentum | trend | trend_follow | trend_follower
    #[arg(long, env = "STRATEGY_MODE", default_value = "obi")]
    pub strategy_mode: String,
    #[arg(long, env = "OBI_THRESHOLD", default_value_t = 0.25)]
    pub obi_threshold: f64,
    #[arg(long, env = "OBI_WINDOW_SECS", default_value_t = 60)]
    pub obi_window_secs: i64,
    #[arg(long, env = "TREND_THRESHOLD", default_value_t = 0.05)]
    pub trend_threshold: f64,
    #[arg(long, env = "TREND_WINDOW_SECS", default_value_t = 180)]
    pub trend_window_secs: i64,
    #[arg(long, env = "TREND_MIN_VOLUME_USD", default_value_t = 0.0)]
    pub trend_min_volume: f64,

    // ===== Risk =====
    #[arg(long, env = "MAX_NOTIONAL_PER_TRADE", default_value_t = 100.0)]
    pub max_notional_per_trade: f64,
    #[arg(long, env = "MAX_PORTFOLIO_NOTIONAL", default_value_t = 0.0)]
    pub max_portfolio_notional: f64,
    #[arg(long, env = "KILL_SWITCH_DRAWDOWN", default_value_t = 0.2)]
    pub kill_switch_drawdown: f64,
    /// Defaults to half the kill switch when unset
    #[arg(long, env = "INTRATRADE_DRAWDOWN")]
    pub intratrade_drawdown: Option<f64>,
    #[arg(long, env = "MAX_DAILY_LOSS", default_value_t = 0.0)]
    pub max_daily_loss: f64,

    // ===== Paper account / execution =====
    #[arg(long, env = "STARTING_CASH", default_value_t = 1000.0)]
    pub starting_cash: f64,
    #[arg(long, env = "MAX_POSITION_PER_SYMBOL", default_value_t = 0.0)]
    pub max_position_per_symbol: f64,
    #[arg(long, env = "MAX_POSITION_NOTIONAL_USD", default_value_t = 0.0)]
    pub max_position_notional: f64,
    #[arg(long, env = "SLIPPAGE_BPS", default_value_t = 5.0)]
    pub slippage_bps: f64,
    #[arg(long, env = "MAX_LATENCY_MS", default_value_t = 150)]
    pub max_latency_ms: u64,
    #[arg(long, env = "PARTIAL_FILL_PROBABILITY", default_value_t = 0.0)]
    pub partial_fill_probability: f64,
    #[arg(long, env = "MAX_PARTIAL_FILLS", default_value_t = 1)]
    pub max_partial_fills: u32,
    /// JSONL fill log; recording is off when unset
    #[arg(long, env = "FILLS_PATH")]
    pub fills_path: Option<String>,
    #[arg(long, env = "FILL_HISTORY_CAPACITY", default_value_t = 2048)]
    pub fill_history_capacity: usize,
}

impl Args {
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .symbols
            .iter()
            .map(|x| x.trim().to_ascii_uppercase())
            .filter(|x| !x.is_empty())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            obi_threshold: self.obi_threshold,
            obi_window_secs: self.obi_window_secs,
            trend_threshold: self.trend_threshold,
            trend_window_secs: self.trend_window_secs,
            trend_min_volume: self.trend_min_volume,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_notional_per_trade: self.max_notional_per_trade,
            max_portfolio_notional: self.max_portfolio_notional,
            max_drawdown_pct: self.kill_switch_drawdown,
            intra_trade_drawdown_pct: self
                .intratrade_drawdown
                .unwrap_or(self.kill_switch_drawdown / 2.0),
            max_daily_loss: self.max_daily_loss,
        }
    }

    pub fn exec_config(&self) -> ExecConfig {
        ExecConfig {
            max_latency_ms: self.max_latency_ms,
            slippage_bps: self.slippage_bps,
            partial_fill_probability: self.partial_fill_probability,
            max_partial_fills: self.max_partial_fills,
        }
    }

    pub fn account_config(&self) -> AccountConfig {
        AccountConfig {
            starting_cash: self.starting_cash,
            max_position_per_symbol: self.max_position_per_symbol,
            max_position_notional: self.max_position_notional,
        }
    }
}

pub fn load() -> Args {
    // Make sure .env is read (FILLS_PATH, SYMBOLS, etc.)
    let _ = dotenv();
    Args::parse()
}
