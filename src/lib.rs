//! FundedTrader backend library.
//!
//! Exposes every module shared between the two binaries (`fundedtrader-core`,
//! `fundedtrader-fanout`) and used directly by the test suite: the domain
//! model, the collaborator ports (cache/db/events/oracle/payment) and their
//! adapters, the sagas and periodic workers that implement spec.md §4, the
//! per-assessment concurrency primitive, and the HTTP/WebSocket handler
//! modules for each binary.

pub mod api;
pub mod auth;
pub mod cache;
pub mod concurrency;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod fanout;
pub mod middleware;
pub mod oracle;
pub mod payment;
pub mod sagas;
pub mod workers;
