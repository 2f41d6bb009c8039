//! Job scheduler — buffers jobs from the store, creates attempts and
//! retries failures.
//!
//! ```text
//!  store ──filter_jobs──▶ queue ──run_jobs──▶ attempts ──▶ agent scheduler
//!    ▲                      ▲                                   │
//!    │                      └──── failed, retries left ◀────────┤
//!    └──── record_command_result / update_job_finished ◀────────┘
//! ```
//!
//! Jobs are pulled in index order above a high-water mark, so each job
//! is fetched once; failed jobs come back through the retry path, not
//! through the store.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};
use uuid::Uuid;

use sweepgrid_core::{
    Action, AgentUpdate, CommandResult, CommandStatus, ExperimentState, FailureReason, Job,
    JobAttempt, JobStatus, SchedulerConfig,
};

use crate::error::{SchedulerError, SchedulerResult};
use crate::ops::JobOperations;

/// Statuses of jobs still worth running.
const RUNNABLE: [JobStatus; 2] = [JobStatus::Failed, JobStatus::NotRun];

/// Bookkeeping for a job with attempts in flight or queued for retry.
#[derive(Debug)]
struct JobInfo {
    job: Job,
    retry_count: u32,
    attempts: HashSet<Uuid>,
}

pub struct JobScheduler {
    ops: Option<Box<dyn JobOperations>>,
    queue: VecDeque<Job>,
    jobs: HashMap<Uuid, JobInfo>,
    /// Attempts created and not yet finished.
    running: HashSet<Uuid>,
    /// Attempts that reported at least one result.
    started: HashSet<Uuid>,
    /// Highest job index pulled from the store.
    high_water: Option<u64>,
    /// Attempts created since the last `take_created_attempts`.
    created: Vec<JobAttempt>,
    buffer_size: usize,
    refill_threshold: usize,
    max_retries: u32,
}

impl JobScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            ops: None,
            queue: VecDeque::new(),
            jobs: HashMap::new(),
            running: HashSet::new(),
            started: HashSet::new(),
            high_water: None,
            created: Vec::new(),
            buffer_size: config.buffer_size,
            refill_threshold: config.refill_threshold,
            max_retries: config.max_retries,
        }
    }

    /// Install the operations. May only be called once.
    pub fn set_job_operations(&mut self, ops: Box<dyn JobOperations>) -> SchedulerResult<()> {
        if self.ops.is_some() {
            return Err(SchedulerError::OperationsAlreadySet("job"));
        }
        self.ops = Some(ops);
        Ok(())
    }

    fn with_ops<T>(
        &mut self,
        f: impl FnOnce(&mut Self, &mut dyn JobOperations) -> SchedulerResult<T>,
    ) -> SchedulerResult<T> {
        let mut ops = self
            .ops
            .take()
            .ok_or(SchedulerError::OperationsNotSet("job"))?;
        let result = f(self, &mut *ops);
        self.ops = Some(ops);
        result
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn tracked_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn retry_count(&self, job_id: Uuid) -> Option<u32> {
        self.jobs.get(&job_id).map(|info| info.retry_count)
    }

    pub fn high_water_mark(&self) -> Option<u64> {
        self.high_water
    }

    /// Attempts created by ticks since the last call.
    pub fn take_created_attempts(&mut self) -> Vec<JobAttempt> {
        std::mem::take(&mut self.created)
    }

    /// Refill the buffer and create attempts for everything queued.
    /// Returns whether work remains.
    pub fn tick(&mut self) -> SchedulerResult<bool> {
        self.with_ops(|this, ops| {
            let experiment = ops.get_experiment();
            let in_flight = this.running.len() + this.queue.len();

            let mut pulled = 0;
            let mut pull_failed = false;
            if experiment.state != ExperimentState::Stopped && in_flight < this.refill_threshold {
                let limit = this.buffer_size.saturating_sub(in_flight);
                let start = this.high_water.map_or(0, |h| h + 1);
                match ops.filter_jobs(&experiment, &RUNNABLE, start, limit) {
                    Ok(jobs) => {
                        pulled = jobs.len();
                        for job in jobs {
                            this.enqueue(job);
                        }
                        if pulled > 0 {
                            debug!(pulled, high_water = ?this.high_water, "jobs pulled from store");
                        }
                    }
                    Err(e) => {
                        warn!(experiment = %experiment.name, error = %e, "failed to pull jobs");
                        pull_failed = true;
                    }
                }
            }

            this.submit_queue(ops);

            let has_work = pulled > 0 || !this.queue.is_empty() || !this.running.is_empty();
            if !has_work && !pull_failed && experiment.state == ExperimentState::Started {
                ops.update_experiment_state(ExperimentState::Stopped);
                info!(experiment = %experiment.name, "no jobs left, experiment stopped");
            }
            Ok(has_work)
        })
    }

    fn enqueue(&mut self, job: Job) {
        self.high_water = Some(self.high_water.map_or(job.index, |h| h.max(job.index)));
        if self.jobs.contains_key(&job.id) {
            return;
        }
        self.jobs.insert(
            job.id,
            JobInfo {
                job: job.clone(),
                retry_count: 0,
                attempts: HashSet::new(),
            },
        );
        self.queue.push_back(job);
    }

    fn submit_queue(&mut self, ops: &mut dyn JobOperations) {
        if self.queue.is_empty() {
            return;
        }
        let batch: Vec<Job> = self.queue.drain(..).collect();
        match ops.run_jobs(&batch) {
            Ok(attempts) => {
                debug!(jobs = batch.len(), attempts = attempts.len(), "attempts created");
                for attempt in attempts {
                    if let Some(info) = self.jobs.get_mut(&attempt.job_id) {
                        info.attempts.insert(attempt.id);
                    }
                    self.running.insert(attempt.id);
                    self.created.push(attempt);
                }
            }
            Err(e) => {
                warn!(jobs = batch.len(), error = %e, "failed to create attempts, requeued");
                self.queue.extend(batch);
            }
        }
    }

    /// A result reported by the agent running `attempt`.
    pub fn on_job_update(
        &mut self,
        attempt: &JobAttempt,
        update: &AgentUpdate,
        num_commands: usize,
    ) -> SchedulerResult<()> {
        self.with_ops(|this, ops| {
            if !this.running.contains(&attempt.id) {
                debug!(attempt_id = %attempt.id, "update for a finished attempt ignored");
                return Ok(());
            }
            if this.started.insert(attempt.id) {
                ops.update_job_started(attempt.id, update.agent);
            }

            let stop = update.action == Action::Stop;
            ops.record_command_result(attempt.id, &update.command, stop);
            if !stop {
                return Ok(());
            }

            let failed = update.command.status != CommandStatus::Success;
            debug!(
                attempt_id = %attempt.id,
                index = update.command.index,
                num_commands,
                failed,
                "attempt stopped"
            );
            this.finish_attempt(ops, attempt, failed);
            Ok(())
        })
    }

    /// The agent running `attempt` crashed or expired.
    pub fn on_job_failure(&mut self, attempt: &JobAttempt, reason: FailureReason) -> SchedulerResult<()> {
        let result = CommandResult::synthesized(CommandStatus::Aborted, &reason.to_string());
        self.fail_attempt(attempt, result)
    }

    /// `attempt` could not be delivered to its agent.
    pub fn on_job_launch_failure(&mut self, attempt: &JobAttempt, message: &str) -> SchedulerResult<()> {
        let result = CommandResult::synthesized(CommandStatus::Exception, message);
        self.fail_attempt(attempt, result)
    }

    fn fail_attempt(&mut self, attempt: &JobAttempt, result: CommandResult) -> SchedulerResult<()> {
        self.with_ops(|this, ops| {
            if !this.running.contains(&attempt.id) {
                debug!(attempt_id = %attempt.id, "failure for a finished attempt ignored");
                return Ok(());
            }
            ops.record_command_result(attempt.id, &result, true);
            this.finish_attempt(ops, attempt, true);
            Ok(())
        })
    }

    fn finish_attempt(&mut self, ops: &mut dyn JobOperations, attempt: &JobAttempt, failed: bool) {
        ops.update_job_finished(attempt.id, failed);
        self.running.remove(&attempt.id);
        self.started.remove(&attempt.id);
        self.evaluate(ops, attempt.job_id, attempt.id);
    }

    /// Re-derive a job's status after one of its attempts finished.
    fn evaluate(&mut self, ops: &mut dyn JobOperations, job_id: Uuid, attempt_id: Uuid) {
        let status = ops.fetch_job_status(job_id);
        let Some(info) = self.jobs.get_mut(&job_id) else {
            debug!(%job_id, "finished attempt for an untracked job");
            return;
        };
        info.attempts.remove(&attempt_id);

        match status {
            JobStatus::Completed => {
                info.retry_count += 1;
                let Some(info) = self.jobs.remove(&job_id) else {
                    return;
                };
                for other in info.attempts {
                    self.running.remove(&other);
                    self.started.remove(&other);
                    ops.cancel_job(other);
                }
                info!(%job_id, index = info.job.index, attempts = info.retry_count, "job completed");
            }
            JobStatus::Failed => {
                info.retry_count += 1;
                if info.retry_count > self.max_retries {
                    warn!(%job_id, index = info.job.index, retries = info.retry_count, "job failed, retries exhausted");
                    self.jobs.remove(&job_id);
                } else {
                    info!(%job_id, index = info.job.index, retry = info.retry_count, "job failed, retrying");
                    self.queue.push_back(info.job.clone());
                }
            }
            JobStatus::Running | JobStatus::NotRun => {
                debug!(%job_id, %status, "job still has attempts in flight");
            }
        }
    }
}
