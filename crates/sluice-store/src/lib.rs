//! Postgres persistence for Sluice.
//!
//! Adapters are newtypes wrapping a shared [`sqlx::PgPool`]. All SQL is
//! runtime-checked so builds do not require a live database. The claim
//! primitive (`FOR UPDATE SKIP LOCKED` on the oldest pending event) is
//! the single concurrency mechanism that makes multiple workers safe
//! against one store.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

mod engine_store;
pub mod events;
pub mod pool;
mod rows;
pub mod rules;

pub use events::{
    AttemptWithExecutions, EventFilter, EventStats, EventStore, ExecutionRecord, Page,
};
pub use pool::{connect, migrate, ping};
pub use rules::{NewRule, RuleFilter, RulePatch, RuleStore};
