//! Per-key sequential execution over a shared executor.
//!
//! Tasks submitted under the same key run one at a time in submission
//! order. Tasks under different keys run in parallel on the target.

mod builder;
mod distributor;
mod stripes;
mod submitter;

pub use builder::KeyDistributedBuilder;
pub use distributor::KeyDistributedExecutor;
pub use submitter::KeySubmitter;
