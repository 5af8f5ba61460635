#![warn(missing_docs)]
//! Sensor-side relay for Snort3 alerts.
//!
//! Tails the IDS alert file, coalesces structurally identical alerts within
//! a short window into single events carrying a metrics array, and streams
//! the batches to the aggregation service over a long-lived client-streaming
//! RPC.

pub mod config;
pub mod metrics;
pub mod models;
pub mod pb;
pub mod processor;
pub mod queue;
pub mod stream;
pub mod supervisor;
pub mod tailer;
