// ===============================
// src/history.rs (fill history)
// ===============================
use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::domain::Fill;

/// Append-only consumer of accepted fills.
pub trait FillSink: Send + Sync {
    fn record(&self, fill: &Fill);
}

/// Bounded in-memory ring; the oldest fill is dropped once full.
#[derive(Debug)]
pub struct FillHistory {
    cap: usize,
    fills: Mutex<VecDeque<Fill>>,
}

impl FillHistory {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self { cap, fills: Mutex::new(VecDeque::with_capacity(cap)) }
    }

    pub fn snapshot(&self) -> Vec<Fill> {
        self.fills.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize { self.fills.lock().len() }

    pub fn is_empty(&self) -> bool { self.fills.lock().is_empty() }

    pub fn reset(&self) {
        self.fills.lock().clear();
    }
}

impl FillSink for FillHistory {
    fn record(&self, fill: &Fill) {
        let mut fills = self.fills.lock();
        if fills.len() == self.cap {
            fills.pop_front();
        }
        fills.push_back(fill.clone());
    }
}
