//! The master control loop.
//!
//! One [`Master`] owns both schedulers. Each iteration:
//!
//! ```text
//! 1. apply every queued SchedulerEvent, in order
//! 2. JobScheduler::tick        → refill buffer, create attempts
//! 3. hand created attempts     → AgentScheduler::run_job
//! 4. AgentScheduler::tick      → bootstrap, dispatch, launch agents
//! ```
//!
//! The operations are not `Send`, so a `Master` lives on the task that
//! built it; everything else talks to it through an
//! [`EventSender`](crate::EventSender).

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sweepgrid_core::{AgentUpdate, SweepConfig};
use sweepgrid_scheduler::{AgentOperations, AgentScheduler, JobOperations, JobScheduler};

use crate::error::MasterResult;
use crate::events::{EventReceiver, SchedulerEvent};

pub struct Master {
    agent_scheduler: AgentScheduler,
    job_scheduler: JobScheduler,
    events: EventReceiver,
    tick_interval: Duration,
    idle_interval: Duration,
}

impl Master {
    pub fn new(
        config: &SweepConfig,
        events: EventReceiver,
        agent_ops: Box<dyn AgentOperations>,
        job_ops: Box<dyn JobOperations>,
    ) -> MasterResult<Self> {
        let mut agent_scheduler = AgentScheduler::new(&config.scheduler);
        agent_scheduler.set_agent_operations(agent_ops)?;
        let mut job_scheduler = JobScheduler::new(&config.scheduler);
        job_scheduler.set_job_operations(job_ops)?;

        Ok(Self {
            agent_scheduler,
            job_scheduler,
            events,
            tick_interval: config.master.tick_interval()?,
            idle_interval: config.master.idle_interval()?,
        })
    }

    pub fn agent_scheduler(&self) -> &AgentScheduler {
        &self.agent_scheduler
    }

    pub fn job_scheduler(&self) -> &JobScheduler {
        &self.job_scheduler
    }

    /// Run one iteration. Returns whether the job scheduler has work.
    pub fn iterate(&mut self) -> MasterResult<bool> {
        let applied = self.drain_events();
        let has_work = self.job_scheduler.tick()?;

        let created = self.job_scheduler.take_created_attempts();
        let handed = created.len();
        for attempt in created {
            self.agent_scheduler.run_job(attempt);
        }

        self.agent_scheduler.tick()?;
        debug!(events = applied, attempts = handed, has_work, "iteration complete");
        Ok(has_work)
    }

    /// Iterate until `shutdown` changes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            idle_ms = self.idle_interval.as_millis() as u64,
            "master loop started"
        );

        loop {
            let pause = match self.iterate() {
                Ok(true) => self.tick_interval,
                Ok(false) => self.idle_interval,
                Err(e) => {
                    error!(error = %e, "master iteration failed");
                    self.idle_interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => {
                    info!("master loop shutting down");
                    break;
                }
            }
        }
    }

    fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.events.try_next() {
            if let Err(e) = self.apply(event) {
                error!(error = %e, "event rejected");
            }
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, event: SchedulerEvent) -> MasterResult<()> {
        match event {
            SchedulerEvent::AgentStateChanged {
                agent,
                resource,
                old,
                new,
            } => self
                .agent_scheduler
                .on_agent_state_update(agent, &resource, old, new)?,
            SchedulerEvent::AgentLaunchFailed {
                launch_id,
                resource,
                failure,
            } => self
                .agent_scheduler
                .on_agent_launch_failure(launch_id, &resource, &failure),
            SchedulerEvent::AgentExpired(agent) => self.agent_scheduler.on_agent_expiry(&agent)?,
            SchedulerEvent::JobUpdate(update) => self.route_update(&update)?,
            SchedulerEvent::JobLaunchFailed {
                job_id,
                soft,
                message,
            } => self
                .agent_scheduler
                .on_job_launch_failure(job_id, soft, &message)?,
            SchedulerEvent::AttemptFailed { attempt, reason } => {
                self.job_scheduler.on_job_failure(&attempt, reason)?
            }
            SchedulerEvent::AttemptLaunchFailed { attempt, message } => self
                .job_scheduler
                .on_job_launch_failure(&attempt, &message)?,
            SchedulerEvent::CancelAttempt(attempt) => self.agent_scheduler.cancel_job(attempt)?,
            SchedulerEvent::ResourceAssigned(resource) => {
                self.agent_scheduler.on_resource_assigned(&resource)?
            }
        }
        Ok(())
    }

    /// Send a job result to whichever scheduler owns the network job.
    fn route_update(&mut self, update: &AgentUpdate) -> MasterResult<()> {
        if let Some(run) = self.agent_scheduler.managed_run(update.job_id) {
            let (attempt, count) = (run.attempt.clone(), run.command_count);
            self.job_scheduler.on_job_update(&attempt, update, count)?;
        } else if self.agent_scheduler.is_unmanaged(update.job_id) {
            self.agent_scheduler.on_unmanaged_job_update(update)?;
        } else {
            warn!(job_id = %update.job_id, agent = %update.agent, "update for unknown job dropped");
        }
        Ok(())
    }
}
