//! Signalmeter
//!
//! Ingests buy/sell trading alerts, deduplicates them, keeps daily buy/sell
//! counters and measures each accepted signal's price performance at fixed
//! checkpoints after entry.

pub mod config;
pub mod core;
pub mod db;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod signals;
