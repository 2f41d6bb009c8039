//! Capability bootstrap tracking.
//!
//! Before a resource can run an experiment's jobs it must run the
//! experiment's node-start task once. This tracker remembers, per
//! (resource, experiment) pair, the agent launch requested for that and
//! the bootstrap job in flight, so neither is issued twice.

use tracing::debug;
use uuid::Uuid;

use crate::bimap::BiMap;

/// A (resource, experiment) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetupKey {
    pub resource: String,
    pub experiment: String,
}

impl SetupKey {
    pub fn new(resource: &str, experiment: &str) -> Self {
        Self {
            resource: resource.to_string(),
            experiment: experiment.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SetupTracker {
    /// Launch id ↔ pair it was requested for.
    requested: BiMap<Uuid, SetupKey>,
    /// Bootstrap job id ↔ pair it runs for.
    running: BiMap<Uuid, SetupKey>,
}

impl SetupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `launch_id` was requested to bootstrap the pair.
    /// Returns `false` if the pair already has a request.
    pub fn mark_agent_requested(&mut self, launch_id: Uuid, resource: &str, experiment: &str) -> bool {
        let inserted = self
            .requested
            .insert(launch_id, SetupKey::new(resource, experiment));
        if inserted {
            debug!(%launch_id, resource, experiment, "bootstrap agent requested");
        }
        inserted
    }

    pub fn has_agent_been_requested(&self, resource: &str, experiment: &str) -> bool {
        self.requested
            .contains_right(&SetupKey::new(resource, experiment))
    }

    /// Drop a request whose launch failed.
    pub fn clear_agent_request(&mut self, launch_id: Uuid) -> Option<SetupKey> {
        self.requested.remove_by_left(&launch_id)
    }

    /// Remember that `job_id` is bootstrapping the pair. Returns `false`
    /// if the pair already has a bootstrap job running.
    pub fn mark_running(&mut self, job_id: Uuid, resource: &str, experiment: &str) -> bool {
        let inserted = self.running.insert(job_id, SetupKey::new(resource, experiment));
        if inserted {
            debug!(%job_id, resource, experiment, "bootstrap job running");
        }
        inserted
    }

    pub fn is_setup_running(&self, resource: &str, experiment: &str) -> bool {
        self.running.contains_right(&SetupKey::new(resource, experiment))
    }

    /// The pair a bootstrap job is running for.
    pub fn running_pair(&self, job_id: Uuid) -> Option<&SetupKey> {
        self.running.get_by_left(&job_id)
    }

    /// Clear the bootstrap job and the agent request for its pair, so the
    /// pair can be bootstrapped afresh. Returns the pair.
    pub fn mark_job_done(&mut self, job_id: Uuid) -> Option<SetupKey> {
        let key = self.running.remove_by_left(&job_id)?;
        self.requested.remove_by_right(&key);
        debug!(%job_id, resource = %key.resource, experiment = %key.experiment, "bootstrap job done");
        Some(key)
    }

    pub fn requested_count(&self) -> usize {
        self.requested.len()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_idempotent_per_pair() {
        let mut tracker = SetupTracker::new();
        assert!(tracker.mark_agent_requested(Uuid::new_v4(), "hpc", "sweep"));
        assert!(!tracker.mark_agent_requested(Uuid::new_v4(), "hpc", "sweep"));

        assert!(tracker.has_agent_been_requested("hpc", "sweep"));
        assert_eq!(tracker.requested_count(), 1);
    }

    #[test]
    fn running_is_idempotent_per_pair() {
        let mut tracker = SetupTracker::new();
        assert!(tracker.mark_running(Uuid::new_v4(), "hpc", "sweep"));
        assert!(!tracker.mark_running(Uuid::new_v4(), "hpc", "sweep"));

        assert!(tracker.is_setup_running("hpc", "sweep"));
        assert_eq!(tracker.running_count(), 1);
    }

    #[test]
    fn pairs_are_independent() {
        let mut tracker = SetupTracker::new();
        tracker.mark_agent_requested(Uuid::new_v4(), "hpc", "sweep");
        assert!(!tracker.has_agent_been_requested("hpc", "other"));
        assert!(!tracker.has_agent_been_requested("cloud", "sweep"));
        assert!(tracker.mark_agent_requested(Uuid::new_v4(), "cloud", "sweep"));
    }

    #[test]
    fn job_done_clears_both_entries() {
        let mut tracker = SetupTracker::new();
        let job = Uuid::new_v4();
        tracker.mark_agent_requested(Uuid::new_v4(), "hpc", "sweep");
        tracker.mark_running(job, "hpc", "sweep");

        let key = tracker.mark_job_done(job).unwrap();
        assert_eq!(key, SetupKey::new("hpc", "sweep"));
        assert!(!tracker.is_setup_running("hpc", "sweep"));
        assert!(!tracker.has_agent_been_requested("hpc", "sweep"));

        assert!(tracker.mark_job_done(job).is_none());
    }

    #[test]
    fn job_done_without_request() {
        let mut tracker = SetupTracker::new();
        let job = Uuid::new_v4();
        tracker.mark_running(job, "hpc", "sweep");
        assert!(tracker.mark_job_done(job).is_some());
        assert_eq!(tracker.requested_count(), 0);
    }

    #[test]
    fn failed_launch_request_can_be_cleared() {
        let mut tracker = SetupTracker::new();
        let launch = Uuid::new_v4();
        tracker.mark_agent_requested(launch, "hpc", "sweep");

        assert_eq!(
            tracker.clear_agent_request(launch),
            Some(SetupKey::new("hpc", "sweep"))
        );
        assert!(!tracker.has_agent_been_requested("hpc", "sweep"));
    }
}
