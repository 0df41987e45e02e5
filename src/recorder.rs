// ===============================
// src/recorder.rs
// ===============================
//
// JSONL fill recorder:
// - Each accepted Fill becomes one JSON line (append).
// - BufWriter, flushed every 1s and every 1000 fills.
// - Parent directory is created when missing.
// - A failed write triggers one reopen attempt; failing that, the fill is dropped.
// - If the file cannot be opened at startup, recording is disabled (caller decides).
//
// ENV: set `FILLS_PATH=/path/to/fills.jsonl` to enable (see config.rs).
//
use std::path::{Path, PathBuf};

use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::Fill;
use crate::history::FillSink;

const FLUSH_EVERY_N_FILLS: u32 = 1000;

async fn open_writer(path: &Path) -> std::io::Result<BufWriter<fs::File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

/// Cloneable handle feeding the writer task. Never blocks the caller.
#[derive(Clone, Debug)]
pub struct JsonlRecorder {
    tx: mpsc::Sender<Fill>,
}

impl FillSink for JsonlRecorder {
    fn record(&self, fill: &Fill) {
        if let Err(e) = self.tx.try_send(fill.clone()) {
            warn!(error = %e, "recorder: queue full or closed, fill not persisted");
        }
    }
}

/// Opens `path` and spawns the writer task. Drop every handle to stop it;
/// the returned JoinHandle resolves after the final flush.
pub async fn spawn(path: impl Into<PathBuf>, queue: usize) -> std::io::Result<(JsonlRecorder, JoinHandle<()>)> {
    let path = path.into();
    let writer = open_writer(&path).await?;
    let (tx, rx) = mpsc::channel(queue.max(1));
    let task = tokio::spawn(run(rx, path, writer));
    Ok((JsonlRecorder { tx }, task))
}

async fn run(mut rx: mpsc::Receiver<Fill>, path: PathBuf, mut writer: BufWriter<fs::File>) {
    info!(path = %path.display(), "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_fill = rx.recv() => {
                let Some(fill) = maybe_fill else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let mut line = match serde_json::to_vec(&fill) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip fill");
                        continue;
                    }
                };
                line.push(b'\n');

                if let Err(e) = writer.write_all(&line).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, drop fill");
                            continue;
                        }
                    }
                    if let Err(e2) = writer.write_all(&line).await {
                        error!(?e2, "recorder: write failed again after reopen, drop fill");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_FILLS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}
