#![deny(
    trivial_numeric_casts,
    missing_docs,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Dispatch loop and the `LoadBalancer` façade that wires queue, monitor, and
//! dispatcher together.
//!
//! `unsafe_code` is not denied at the crate level here because pinning a
//! worker's OS thread before its payload runs is inherently the kind of
//! low-level concern the `core_affinity` crate exists to hide; no `unsafe`
//! block is written in this crate.

mod dispatcher;
mod load_balancer;
mod selection;

pub use dispatcher::Dispatcher;
pub use load_balancer::LoadBalancer;
pub use selection::select_cpu;

/// Errors a caller of the façade can observe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `submit` was called after (or racing) `stop`; the queue no longer
    /// accepts new tasks.
    #[error("task rejected: the queue is shut down")]
    Rejected,

    /// The task could not be constructed or enqueued for a reason other
    /// than shutdown (e.g. id allocation failure). Rounds out the taxonomy
    /// from spec §6/§7; `TaskIdAllocator` never fails in this implementation
    /// (allocation is an infallible atomic increment), so this variant is
    /// currently unreachable in practice but kept for callers matching
    /// exhaustively on `Error`.
    #[error("failed to allocate task: {reason}")]
    AllocationFailure {
        /// Human-readable cause.
        reason: String,
    },
}
