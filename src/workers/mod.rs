//! Periodic workers (spec.md §4.5, §4.10): each owns its own `tokio::spawn`
//! loop over a fixed interval, mirroring the teacher's per-concern spawn
//! functions (`VaultEngine::spawn`, the latency/throughput snapshot tasks
//! in `main.rs`) rather than a single scheduler abstraction.

pub mod persistence;
pub mod rule_checks_persistence;
pub mod rules_monitor;
