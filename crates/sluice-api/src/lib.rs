//! HTTP surface for Sluice.
//!
//! Exposes the ingest/replay/rule-CRUD API, the live-update WebSocket,
//! and the service wiring used by the `sluice` binary.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod server;
mod ws;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::{router, serve, AppState};
