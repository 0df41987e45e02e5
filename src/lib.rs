// ===============================
// src/lib.rs
// ===============================
pub mod account;
pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod execution;
pub mod feed;
pub mod history;
pub mod metrics;
pub mod recorder;
pub mod risk;
pub mod strategy;
