//! File system helpers for entry payloads and the live data directory.

pub mod ownership;
pub mod walker;
