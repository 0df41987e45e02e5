// ===============================
// src/api.rs (read-only HTTP endpoints)
// ===============================
//
//   GET /metrics        Prometheus text
//   GET /paper/fills    JSON array of recent fills
//   GET /paper/account  JSON account snapshot marked to the latest prices
//
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::account::Account;
use crate::engine::Marks;
use crate::history::FillHistory;
use crate::metrics;

/// Everything the handlers read. Cheap to clone.
#[derive(Clone)]
pub struct ApiState {
    pub account: Arc<Account>,
    pub history: Arc<FillHistory>,
    pub marks: Marks,
}

fn json<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(e) => {
            error!(?e, "api: serialize failed");
            status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn status(code: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = code;
    resp
}

pub async fn handle(state: ApiState, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED));
    }
    let resp = match req.uri().path() {
        "/metrics" => Response::builder()
            .header(CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(metrics::encode()))
            .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR)),
        "/paper/fills" => json(&state.history.snapshot()),
        "/paper/account" => {
            let snap = state.account.snapshot(&state.marks.read());
            json(&snap)
        }
        _ => status(StatusCode::NOT_FOUND),
    };
    Ok(resp)
}

/// Serve until `shutdown` flips (or its sender is dropped).
pub async fn serve(
    addr: SocketAddr,
    state: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(state.clone(), req))) }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(%addr, "http: /metrics /paper/fills /paper/account");
    server
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
