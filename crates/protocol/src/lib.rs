//! Wire and read-model types for fleet.
//!
//! Types in this crate are:
//! - **Pure data**: serde shapes plus small accessors, no I/O
//! - **Shared**: produced by brokers and front ends, consumed by workers and
//!   runtimes, read by health/metrics transports
//!
//! The routing and ownership logic built on these types lives in
//! `fleet-runtime` and `fleet-core`.

pub mod job;
pub mod metrics;
pub mod state;

pub use job::*;
pub use metrics::*;
pub use state::*;
