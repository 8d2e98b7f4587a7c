//! Corridor behavior classification and change signals.
//!
//! Relation aggregates between address pairs are classified into bundles
//! (accumulation, distribution, flow, wash, rotation), and a periodic cycle
//! turns meaningful bundle changes into deduplicated signals.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod consistency;
pub mod db;
pub mod dedup;
pub mod detector;
pub mod emitter;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod refresh;
pub mod store;
