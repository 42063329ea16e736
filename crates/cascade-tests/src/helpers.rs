//! Test helper functions and utilities.

use async_trait::async_trait;
use cascade_core::ports::{DispatchRequest, WorkflowDispatcher};
use std::collections::HashSet;
use std::sync::Mutex;

/// Dispatcher that records requests and can be told to reject some jobs.
#[derive(Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<DispatchRequest>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every dispatch whose payload contains `needle`.
    pub fn reject_payloads_containing(&self, needle: &str) {
        self.rejected
            .lock()
            .expect("lock poisoned")
            .insert(needle.to_string());
    }

    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    /// Dispatched job IDs, in order.
    pub fn job_ids(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.inputs.id).collect()
    }
}

#[async_trait]
impl WorkflowDispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> cascade_core::Result<()> {
        let rejected = self
            .rejected
            .lock()
            .expect("lock poisoned")
            .iter()
            .any(|needle| request.inputs.job.contains(needle.as_str()));
        if rejected {
            return Err(cascade_core::Error::Dispatch("rejected by test".to_string()));
        }
        self.requests
            .lock()
            .expect("lock poisoned")
            .push(request.clone());
        Ok(())
    }
}
