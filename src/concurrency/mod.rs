//! Per-assessment serialization (spec.md §5).
//!
//! "No two effects may interleave between a snapshot read and its
//! corresponding write" is implemented here with a per-assessment-id
//! async mutex registry rather than optimistic check-and-swap -- the
//! simpler of the two contracts §5 allows, and the one that reads closest
//! to the teacher's own `parking_lot`-guarded per-resource locks
//! (`vault/pool.rs`'s position registry). A `tokio::sync::Mutex` is used
//! (not `parking_lot`) because the guard is held across `.await` points
//! for the whole saga body.

pub mod assessment_lock;

pub use assessment_lock::AssessmentLocks;
