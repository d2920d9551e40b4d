//! Controllable traffic generator.
//!
//! One process, one task at a time: the [`scheduler::Scheduler`] either issues GET
//! requests against a target URL on random intervals (server-driven mode) or
//! broadcasts timed instructions for connected observers to open short-lived
//! replicas of it (browser-delegated mode). Every log line and status change is
//! fanned out to all observers through [`broadcast::Broadcaster`].

pub mod api;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod delay;
pub mod errors;
pub mod events;
pub mod fetch;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod task;
pub mod utils;
