//! Operations the schedulers call out to.
//!
//! The embedding master implements these over the durable store, the
//! agent transport and the per-back-end actuators. Every call returns
//! immediately; slow outcomes come back later as scheduler callbacks.

use uuid::Uuid;

use sweepgrid_core::{
    Agent, CommandResult, Experiment, ExperimentState, FailureReason, Job, JobAttempt, JobStatus,
    NetworkJob, Resource,
};

/// Agent-side operations used by the [`AgentScheduler`](crate::AgentScheduler).
pub trait AgentOperations {
    /// Request `count` agents on `resource`. Returns the ids the agents
    /// will report under; launch outcomes arrive as callbacks.
    fn launch_agents(&mut self, resource: &Resource, count: u32) -> anyhow::Result<Vec<Uuid>>;

    fn terminate_agent(&mut self, agent: Uuid);

    /// Resolve and send a managed job for `attempt` to `agent`.
    fn run_job(&mut self, attempt: &JobAttempt, agent: Uuid) -> anyhow::Result<NetworkJob>;

    /// Send an already-resolved job. Fails if a job with the same id is
    /// already running.
    fn run_unmanaged_job(&mut self, job: NetworkJob, agent: Uuid) -> anyhow::Result<()>;

    fn cancel_current_job(&mut self, agent: Uuid);

    fn get_resources(&self) -> Vec<Resource>;

    fn get_assigned_resources(&self, experiment: &str) -> Vec<Resource>;

    fn get_experiment(&self, name: &str) -> Option<Experiment>;

    fn resolve_transfer_uri(&self, resource: &Resource, experiment: &Experiment) -> Option<String>;

    fn is_resource_capable(&self, resource: &Resource, experiment: &Experiment) -> bool;

    fn add_resource_caps(&mut self, resource: &Resource, experiment: &Experiment);

    fn get_agent_resource(&self, agent: Uuid) -> Option<Resource>;

    fn get_resource_agents(&self, resource: &Resource) -> Vec<Agent>;

    /// Fail an attempt whose agent died or expired under it.
    ///
    /// Nothing else tells the job scheduler; implementations must pass
    /// this on to `JobScheduler::on_job_failure` (the master does it with
    /// an `AttemptFailed` event) or the attempt never gets retried.
    fn report_job_failure(&mut self, attempt: &JobAttempt, agent: Uuid, reason: FailureReason);

    /// Fail an attempt that could not be delivered to its agent.
    ///
    /// Must reach `JobScheduler::on_job_launch_failure`, the same way as
    /// `report_job_failure`.
    fn report_job_launch_failure(&mut self, attempt: &JobAttempt, agent: Uuid, message: &str);
}

/// Store-side operations used by the [`JobScheduler`](crate::JobScheduler).
pub trait JobOperations {
    fn get_experiment(&self) -> Experiment;

    /// Jobs of `experiment` with a status in `statuses` and an index of at
    /// least `start_index`, in index order, at most `limit` of them.
    fn filter_jobs(
        &self,
        experiment: &Experiment,
        statuses: &[JobStatus],
        start_index: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<Job>>;

    fn fetch_job_status(&self, job: Uuid) -> JobStatus;

    /// Create one new attempt per job.
    fn run_jobs(&mut self, jobs: &[Job]) -> anyhow::Result<Vec<JobAttempt>>;

    /// Withdraw an attempt that is no longer needed. Besides updating the
    /// store, implementations must hand the id to
    /// `AgentScheduler::cancel_job` so a dispatched attempt is stopped on
    /// its agent.
    fn cancel_job(&mut self, attempt: Uuid);

    fn update_experiment_state(&mut self, state: ExperimentState);

    fn update_job_started(&mut self, attempt: Uuid, agent: Uuid);

    fn update_job_finished(&mut self, attempt: Uuid, failed: bool);

    fn record_command_result(&mut self, attempt: Uuid, result: &CommandResult, stop: bool);
}
