//! clawd library
//!
//! Provisions one isolated agent runtime container per tenant from a durable
//! job queue.

pub mod app;
pub mod canary;
pub mod channel;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod redact;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
