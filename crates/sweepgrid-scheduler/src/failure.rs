//! Launch failure tracking.
//!
//! Counts consecutive agent-launch failures per resource. A resource that
//! reaches the threshold is blacklisted: it receives no new jobs until an
//! operator re-assignment clears it. There is no cool-down.

use std::collections::HashMap;

use tracing::{info, warn};

use sweepgrid_core::Resource;

/// Launch failures before a resource is blacklisted.
pub const FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Default)]
pub struct FailureTracker {
    /// Resource name → consecutive launch failures.
    failures: HashMap<String, u32>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed launch on `resource`. Returns the new count.
    pub fn report_failure(&mut self, resource: &str) -> u32 {
        let count = self.failures.entry(resource.to_string()).or_insert(0);
        *count = count.saturating_add(1);

        if *count == FAILURE_THRESHOLD {
            warn!(
                resource,
                failures = *count,
                "resource blacklisted after repeated launch failures"
            );
        } else {
            warn!(resource, failures = *count, threshold = FAILURE_THRESHOLD, "agent launch failed");
        }
        *count
    }

    pub fn failure_count(&self, resource: &str) -> u32 {
        self.failures.get(resource).copied().unwrap_or(0)
    }

    pub fn is_blacklisted(&self, resource: &str) -> bool {
        self.failure_count(resource) >= FAILURE_THRESHOLD
    }

    /// Drop blacklisted resources from `resources`.
    pub fn filter_eligible(&self, resources: Vec<Resource>) -> Vec<Resource> {
        resources
            .into_iter()
            .filter(|r| !self.is_blacklisted(&r.name))
            .collect()
    }

    /// Forget the failures recorded against `resource`.
    pub fn clear(&mut self, resource: &str) {
        if self.failures.remove(resource).is_some() {
            info!(resource, "launch failures cleared");
        }
    }
}
