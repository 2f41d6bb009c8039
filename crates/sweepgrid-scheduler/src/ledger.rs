//! Assignment ledger — which agent runs which managed job, for which
//! attempt.
//!
//! Two links are kept: network job ↔ attempt and agent ↔ network job.
//! They are only ever installed and removed together.
//!
//! Agent records themselves are not kept here. The agent scheduler owns
//! the agent id → resource map and the READY set; the store owns the
//! full `Agent`.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use sweepgrid_core::{JobAttempt, NetworkJob};

use crate::bimap::BiMap;
use crate::error::{SchedulerError, SchedulerResult};

/// A managed job dispatched to an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub attempt: JobAttempt,
    /// Number of commands in the dispatched network job.
    pub command_count: usize,
}

#[derive(Debug, Default)]
pub struct AssignmentLedger {
    /// Network job id ↔ attempt id.
    jobs: BiMap<Uuid, Uuid>,
    /// Agent id ↔ network job id.
    agents: BiMap<Uuid, Uuid>,
    /// Network job id → run details.
    runs: HashMap<Uuid, Run>,
}

impl AssignmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `agent` is running `job` for `attempt`. Refuses, without
    /// changing anything, if any of the three is already linked.
    pub fn register_run(
        &mut self,
        job: &NetworkJob,
        attempt: JobAttempt,
        agent: Uuid,
    ) -> SchedulerResult<()> {
        if self.agents.contains_left(&agent) {
            return Err(SchedulerError::AgentBusy(agent));
        }
        if self.jobs.contains_left(&job.id) || self.agents.contains_right(&job.id) {
            return Err(SchedulerError::JobAlreadyLinked(job.id));
        }
        if self.jobs.contains_right(&attempt.id) {
            return Err(SchedulerError::AttemptAlreadyLinked(attempt.id));
        }

        self.jobs.insert(job.id, attempt.id);
        self.agents.insert(agent, job.id);
        debug!(%agent, job_id = %job.id, attempt_id = %attempt.id, "run registered");
        self.runs.insert(
            job.id,
            Run {
                attempt,
                command_count: job.num_commands(),
            },
        );
        Ok(())
    }

    /// Release `agent` from its job. Returns the attempt it was running,
    /// or `None` if it had nothing.
    pub fn report_agent_finish(&mut self, agent: Uuid) -> Option<JobAttempt> {
        let job_id = self.agents.remove_by_left(&agent)?;
        self.jobs.remove_by_left(&job_id);
        let run = self.runs.remove(&job_id)?;
        debug!(%agent, %job_id, attempt_id = %run.attempt.id, "run released");
        Some(run.attempt)
    }

    pub fn job_for_agent(&self, agent: Uuid) -> Option<Uuid> {
        self.agents.get_by_left(&agent).copied()
    }

    pub fn agent_for_job(&self, job_id: Uuid) -> Option<Uuid> {
        self.agents.get_by_right(&job_id).copied()
    }

    pub fn attempt_for_job(&self, job_id: Uuid) -> Option<&JobAttempt> {
        self.runs.get(&job_id).map(|r| &r.attempt)
    }

    pub fn run_for_job(&self, job_id: Uuid) -> Option<&Run> {
        self.runs.get(&job_id)
    }

    pub fn agent_for_attempt(&self, attempt_id: Uuid) -> Option<Uuid> {
        let job_id = self.jobs.get_by_right(&attempt_id)?;
        self.agent_for_job(*job_id)
    }

    pub fn is_agent_assigned(&self, agent: Uuid) -> bool {
        self.agents.contains_left(&agent)
    }

    /// Number of dispatched runs.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
