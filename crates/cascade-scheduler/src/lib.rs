//! Job scheduling for Cascade CI.
//!
//! A scheduling run reduces the project dependency graph to the impacted
//! projects, orders it parent-first and materializes one batch of jobs.
//! Completion reports then cascade through the batch, dispatching each
//! job's children once the job succeeds.

pub mod coordinator;
pub mod dag;
pub mod materializer;
pub mod reducer;
pub mod traversal;

pub use coordinator::{CompletionCoordinator, DispatchReport};
pub use dag::{DagBuilder, DagError, DependencyGraph};
pub use materializer::{
    FanInPolicy, JobMaterializer, MaterializeError, MaterializedBatch, MaterializerConfig,
    VertexFailure,
};
pub use reducer::GraphReducer;
pub use traversal::ParentFirstTraversal;
