// ===============================
// src/feed.rs
// ===============================
//
// Observation producers:
// - run_mock    : random-walk trade prints, one task per symbol
// - run_binance : Binance public `<symbol>@trade` websocket stream
//
// Producers push into the bounded observation queue with `send().await`, so a
// slow engine backpressures them. All loops watch the shared shutdown signal
// and return promptly when it flips.
//

use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::StreamExt; // for .next()
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use url::Url;

use crate::domain::{Observation, Side};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("bad websocket url {url}: {source}")]
    BadUrl { url: String, source: url::ParseError },
}

async fn publish(
    tx: &mpsc::Sender<Observation>,
    shutdown: &mut watch::Receiver<bool>,
    obs: Observation,
) -> bool {
    tokio::select! {
        res = tx.send(obs) => res.is_ok(),
        _ = shutdown.changed() => false,
    }
}

/// Mock trade generator (random walk around 100.0).
pub async fn run_mock(
    tx: mpsc::Sender<Observation>,
    mut shutdown: watch::Receiver<bool>,
    symbol: String,
    interval: Duration,
) -> Result<(), FeedError> {
    let mut px: f64 = 100.0;
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        // do not hold ThreadRng across .await
        let obs = {
            let mut rng = rand::thread_rng();
            px = (px * (1.0 + rng.gen_range(-0.002..=0.002))).max(1.0);
            Observation {
                symbol: symbol.clone(),
                price: px,
                size: rng.gen_range(0.01..5.0),
                side: if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell },
                ts: Utc::now(),
            }
        };
        if !publish(&tx, &mut shutdown, obs).await {
            return Ok(());
        }
        tokio::select! {
            _ = sleep(interval) => {}
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

// Example payload:
// {"e":"trade","E":1672515782136,"s":"BNBBTC","t":12345,"p":"0.001","q":"100","T":1672515782136,"m":true,"M":true}
#[derive(Debug, Deserialize)]
struct TradeMsg {
    #[serde(rename = "s", default)]
    symbol: Option<String>,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    qty: String,
    #[serde(rename = "T", default)]
    trade_time: Option<i64>,
    #[serde(rename = "m", default)]
    buyer_is_maker: bool,
}

/// Parse one `@trade` frame. A buyer-maker print means the aggressor sold.
pub fn parse_trade(txt: &str, fallback_symbol: &str) -> Option<Observation> {
    let msg: TradeMsg = serde_json::from_str(txt).ok()?;
    let price: f64 = msg.price.parse().ok()?;
    let size: f64 = msg.qty.parse().ok()?;
    if price <= 0.0 || !price.is_finite() || size < 0.0 || !size.is_finite() {
        return None;
    }
    let ts = msg
        .trade_time
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);
    Some(Observation {
        symbol: msg.symbol.unwrap_or_else(|| fallback_symbol.to_string()).to_ascii_uppercase(),
        price,
        size,
        side: if msg.buyer_is_maker { Side::Sell } else { Side::Buy },
        ts,
    })
}

/// Adapter to Binance WS (read-only) trade prints.
///
/// - `ws_base` from config, e.g. wss://stream.binance.com:9443/ws
/// - `symbol` is the domain symbol (e.g. "BTCUSDT"), lower-cased for the topic.
pub async fn run_binance(
    tx: mpsc::Sender<Observation>,
    mut shutdown: watch::Receiver<bool>,
    symbol: String,
    ws_base: String,
) -> Result<(), FeedError> {
    let topic = format!("{}@trade", symbol.to_lowercase());
    let ws_url = format!("{}/{}", ws_base.trim_end_matches('/'), topic);
    let url = Url::parse(&ws_url).map_err(|source| FeedError::BadUrl { url: ws_url.clone(), source })?;

    let mut attempt: u32 = 0;
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        info!(%ws_url, "connecting binance trade stream");
        let connected = tokio::select! {
            res = connect_async(url.as_str()) => res,
            _ = shutdown.changed() => return Ok(()),
        };
        match connected {
            Ok((mut ws, _resp)) => {
                info!(%symbol, "connected to trade stream");
                attempt = 0; // reset backoff

                loop {
                    let frame = tokio::select! {
                        f = ws.next() => f,
                        _ = shutdown.changed() => return Ok(()),
                    };
                    let Some(frame) = frame else { break };
                    match frame {
                        Ok(m) if m.is_text() => {
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            match parse_trade(&txt, &symbol) {
                                Some(obs) => {
                                    if !publish(&tx, &mut shutdown, obs).await {
                                        return Ok(());
                                    }
                                }
                                None => warn!(%symbol, "invalid trade payload from binance"),
                            }
                        }
                        Ok(_) => {
                            // ignore non-text frames (ping/pong handled by tungstenite)
                        }
                        Err(e) => {
                            error!(?e, "ws read error");
                            break;
                        }
                    }
                }
                info!("trade stream disconnected, will reconnect…");
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }

        // Exponential backoff + jitter
        attempt = attempt.saturating_add(1);
        let shift = attempt.min(6);                  // 0..=6
        let factor = 1u64 << shift;                  // 1,2,4,...,64
        let base_ms = 500u64.saturating_mul(factor); // 0.5s..32s
        let jitter = rand::thread_rng().gen_range(0..=250);
        tokio::select! {
            _ = sleep(Duration::from_millis(base_ms + jitter)) => {}
            _ = shutdown.changed() => return Ok(()),
        }
    }
}
