//! Dispatcher that only logs.

use async_trait::async_trait;
use cascade_core::ports::{DispatchRequest, WorkflowDispatcher};
use tracing::info;

/// Logs dispatch requests instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunDispatcher;

#[async_trait]
impl WorkflowDispatcher for DryRunDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> cascade_core::Result<()> {
        info!(
            repo = %request.repo,
            workflow = %request.workflow_id,
            git_ref = %request.git_ref,
            job_id = %request.inputs.id,
            "Dry run, not dispatching"
        );
        Ok(())
    }
}
