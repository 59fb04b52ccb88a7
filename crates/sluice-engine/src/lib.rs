//! The Sluice processing engine: rule evaluation, action dispatch,
//! worker loops, and live-update fan-out.
//!
//! Persistence is reached only through the
//! [`EngineStore`](sluice_core::ports::EngineStore) port, so the whole
//! pipeline runs hermetically in tests.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod broadcast;
pub mod dispatch;
pub mod engine;
pub mod metrics;
pub mod worker;

pub use broadcast::{EventBroadcaster, EventUpdate};
pub use dispatch::{ActionDispatcher, EmailMode};
pub use engine::RuleEngine;
pub use worker::{run_stuck_sweeper, Worker, WorkerConfig};
