//! Core domain model for Sluice, an asynchronous event-processing
//! platform with a pluggable rules engine and conscious replay.
//!
//! This crate holds the pieces every other crate agrees on: the event
//! and rule model, the whitelisted condition expression language, the
//! typed action model, the error taxonomy, and the persistence port
//! the engine drives.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod action;
pub mod condition;
pub mod error;
pub mod event;
pub mod observability;
pub mod ports;
pub mod rule;

pub use action::{Action, LogLevel, WebhookMethod};
pub use error::{Error, Result};
pub use event::{AttemptOutcome, AttemptStatus, Event, EventAttempt, EventState};
pub use ports::{ClaimedEvent, EngineStore};
pub use rule::{ActiveRule, ExecutionResult, Rule, RuleExecution, RuleVersion};
