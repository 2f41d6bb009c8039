//! Agent scheduler — agent lifecycle, capability bootstrap and
//! attempt → agent assignment.
//!
//! Attempts enter through [`AgentScheduler::run_job`] and wait in
//! `pending` until a tick assigns them to a resource. If that resource
//! has a free READY agent the attempt is dispatched on the spot;
//! otherwise it is `held` and the resource's demand goes up, which the
//! heuristic turns into agent launches at the end of the tick.
//!
//! A resource must be capable of an experiment before it takes the
//! experiment's jobs. Experiments with a node-start task get one
//! bootstrap agent per (resource, experiment) pair which runs that task
//! as an unmanaged job; success marks the pair capable.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sweepgrid_core::{
    Action, Agent, AgentState, AgentUpdate, CommandStatus, Experiment, FailureReason, JobAttempt,
    LaunchFailure, NetworkJob, Resource, SchedulerConfig,
};

use crate::error::{SchedulerError, SchedulerResult};
use crate::failure::FailureTracker;
use crate::heuristic::DemandHeuristic;
use crate::ledger::{AssignmentLedger, Run};
use crate::ops::AgentOperations;
use crate::placement::{self, Assignment};
use crate::setup::SetupTracker;

/// A node-start job in flight.
#[derive(Debug, Clone, Copy)]
struct BootstrapRun {
    agent: Uuid,
    command_count: usize,
}

pub struct AgentScheduler {
    ops: Option<Box<dyn AgentOperations>>,
    /// Every live agent → the resource it runs on.
    agents: HashMap<Uuid, Resource>,
    ready: IndexSet<Uuid>,
    /// Launch ids that have not said hello yet.
    launching: IndexSet<Uuid>,
    pending: IndexMap<Uuid, JobAttempt>,
    held: IndexMap<Uuid, JobAttempt>,
    /// Bootstrap job id → run.
    bootstraps: HashMap<Uuid, BootstrapRun>,
    ledger: AssignmentLedger,
    heuristic: DemandHeuristic,
    failures: FailureTracker,
    setup: SetupTracker,
}

impl AgentScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            ops: None,
            agents: HashMap::new(),
            ready: IndexSet::new(),
            launching: IndexSet::new(),
            pending: IndexMap::new(),
            held: IndexMap::new(),
            bootstraps: HashMap::new(),
            ledger: AssignmentLedger::new(),
            heuristic: DemandHeuristic::from_config(config),
            failures: FailureTracker::new(),
            setup: SetupTracker::new(),
        }
    }

    /// Install the operations. May only be called once.
    pub fn set_agent_operations(&mut self, ops: Box<dyn AgentOperations>) -> SchedulerResult<()> {
        if self.ops.is_some() {
            return Err(SchedulerError::OperationsAlreadySet("agent"));
        }
        self.ops = Some(ops);
        Ok(())
    }

    /// Run `f` with the operations lent out alongside `self`.
    fn with_ops<T>(
        &mut self,
        f: impl FnOnce(&mut Self, &mut dyn AgentOperations) -> SchedulerResult<T>,
    ) -> SchedulerResult<T> {
        let mut ops = self
            .ops
            .take()
            .ok_or(SchedulerError::OperationsNotSet("agent"))?;
        let result = f(self, &mut *ops);
        self.ops = Some(ops);
        result
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn ledger(&self) -> &AssignmentLedger {
        &self.ledger
    }

    pub fn heuristic(&self) -> &DemandHeuristic {
        &self.heuristic
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    pub fn setup(&self) -> &SetupTracker {
        &self.setup
    }

    /// The managed run behind a network job id.
    pub fn managed_run(&self, job_id: Uuid) -> Option<&Run> {
        self.ledger.run_for_job(job_id)
    }

    /// Whether `job_id` is a bootstrap job in flight.
    pub fn is_unmanaged(&self, job_id: Uuid) -> bool {
        self.bootstraps.contains_key(&job_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn launching_count(&self) -> usize {
        self.launching.len()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    // ── Attempts ───────────────────────────────────────────────────

    /// Queue an attempt for assignment.
    pub fn run_job(&mut self, attempt: JobAttempt) {
        if self.pending.contains_key(&attempt.id)
            || self.held.contains_key(&attempt.id)
            || self.ledger.agent_for_attempt(attempt.id).is_some()
        {
            debug!(attempt_id = %attempt.id, "attempt already scheduled");
            return;
        }
        debug!(attempt_id = %attempt.id, job_id = %attempt.job_id, experiment = %attempt.experiment, "attempt queued");
        self.pending.insert(attempt.id, attempt);
    }

    /// Withdraw an attempt. Undispatched attempts are dropped; a
    /// dispatched one is cancelled on its agent.
    pub fn cancel_job(&mut self, attempt_id: Uuid) -> SchedulerResult<()> {
        if self.pending.shift_remove(&attempt_id).is_some()
            || self.held.shift_remove(&attempt_id).is_some()
        {
            debug!(%attempt_id, "undispatched attempt cancelled");
            return Ok(());
        }

        let Some(agent) = self.ledger.agent_for_attempt(attempt_id) else {
            debug!(%attempt_id, "nothing to cancel");
            return Ok(());
        };
        self.with_ops(|_, ops| {
            ops.cancel_current_job(agent);
            info!(%attempt_id, %agent, "running attempt cancelled");
            Ok(())
        })
    }

    // ── Agent events ───────────────────────────────────────────────

    pub fn on_agent_state_update(
        &mut self,
        agent: Uuid,
        resource: &Resource,
        old: Option<AgentState>,
        new: AgentState,
    ) -> SchedulerResult<()> {
        use AgentState::*;

        if let Some(old) = old
            && !old.can_transition_to(new)
        {
            warn!(%agent, from = %old, to = %new, "ignoring invalid agent transition");
            return Ok(());
        }

        match (old, new) {
            (None, WaitingForHello) => {
                self.agents.insert(agent, resource.clone());
                debug!(%agent, resource = %resource.name, "agent registered");
            }
            (Some(WaitingForHello), Ready) => {
                self.heuristic.on_launch_success(&resource.name);
                self.launching.shift_remove(&agent);
                self.agents.insert(agent, resource.clone());
                self.ready.insert(agent);
                info!(%agent, resource = %resource.name, "agent ready");
            }
            (Some(WaitingForHello), Shutdown) => {
                // Untracked means expiry or a launch failure already
                // accounted for this launch.
                let tracked =
                    self.agents.remove(&agent).is_some() | self.launching.shift_remove(&agent);
                self.setup.clear_agent_request(agent);
                if tracked {
                    self.heuristic.on_launch_failure(resource);
                    warn!(%agent, resource = %resource.name, "agent shut down before hello");
                } else {
                    debug!(%agent, resource = %resource.name, "shutdown of a retired launch");
                }
            }
            (Some(Ready), Busy) => {
                self.ready.shift_remove(&agent);
            }
            (Some(Busy), Ready) => {
                if let Some(attempt) = self.ledger.report_agent_finish(agent) {
                    debug!(%agent, attempt_id = %attempt.id, "agent finished job");
                }
                self.finish_bootstrap_on(agent);
                self.ready.insert(agent);
            }
            (Some(Ready | Busy), Shutdown) => {
                self.with_ops(|this, ops| {
                    this.retire_agent(ops, agent, FailureReason::Crashed);
                    Ok(())
                })?;
            }
            (old, new) => {
                debug!(%agent, ?old, %new, "agent state update ignored");
            }
        }
        Ok(())
    }

    /// An agent launch never produced an agent.
    pub fn on_agent_launch_failure(
        &mut self,
        launch_id: Uuid,
        resource: &Resource,
        failure: &LaunchFailure,
    ) {
        match failure {
            LaunchFailure::ResourceFull => {
                info!(%launch_id, resource = %resource.name, "resource full, launch not counted as a failure");
            }
            LaunchFailure::Failed(message) => {
                warn!(%launch_id, resource = %resource.name, %message, "agent launch failed");
                self.failures.report_failure(&resource.name);
            }
        }
        let tracked =
            self.launching.shift_remove(&launch_id) | self.agents.remove(&launch_id).is_some();
        if tracked {
            self.heuristic.on_launch_failure(resource);
        }
        if let Some(key) = self.setup.clear_agent_request(launch_id) {
            debug!(resource = %key.resource, experiment = %key.experiment, "bootstrap agent request cleared");
        }
    }

    /// An agent outlived its expiry time.
    pub fn on_agent_expiry(&mut self, agent: &Agent) -> SchedulerResult<()> {
        let id = agent.uuid;
        self.with_ops(|this, ops| {
            let resource = this
                .agents
                .get(&id)
                .cloned()
                .or_else(|| ops.get_agent_resource(id));

            if agent.state == AgentState::WaitingForHello {
                let tracked = this.launching.shift_remove(&id) | this.agents.contains_key(&id);
                this.setup.clear_agent_request(id);
                if let (true, Some(resource)) = (tracked, &resource) {
                    this.heuristic.on_launch_failure(resource);
                }
            }

            warn!(agent = %id, resource = ?resource.as_ref().map(|r| &r.name), state = %agent.state, "agent expired");
            this.retire_agent(ops, id, FailureReason::Expired);
            ops.terminate_agent(id);
            Ok(())
        })
    }

    /// Drop an agent that is gone, failing whatever it was running.
    fn retire_agent(&mut self, ops: &mut dyn AgentOperations, agent: Uuid, reason: FailureReason) {
        self.ready.shift_remove(&agent);
        let resource = self.agents.remove(&agent);

        if let Some(attempt) = self.ledger.report_agent_finish(agent) {
            warn!(%agent, attempt_id = %attempt.id, %reason, "agent lost while holding a job");
            ops.report_job_failure(&attempt, agent, reason);
        }
        self.finish_bootstrap_on(agent);

        info!(%agent, resource = ?resource.map(|r| r.name), "agent removed");
    }

    fn finish_bootstrap_on(&mut self, agent: Uuid) {
        let job_id = self
            .bootstraps
            .iter()
            .find(|(_, run)| run.agent == agent)
            .map(|(id, _)| *id);
        if let Some(job_id) = job_id {
            self.bootstraps.remove(&job_id);
            self.setup.mark_job_done(job_id);
            debug!(%agent, %job_id, "bootstrap job ended without a result");
        }
    }

    // ── Job events ─────────────────────────────────────────────────

    /// A progress report for a bootstrap job.
    pub fn on_unmanaged_job_update(&mut self, update: &AgentUpdate) -> SchedulerResult<()> {
        let job_id = update.job_id;
        let Some(run) = self.bootstraps.get(&job_id).copied() else {
            return Err(SchedulerError::UnknownJob(job_id));
        };

        let last = run.command_count.saturating_sub(1);
        let index = update.command.index;
        let succeeded = match update.action {
            Action::Continue if index < last => {
                debug!(%job_id, index, "bootstrap progress");
                return Ok(());
            }
            Action::Continue => false,
            Action::Stop if index < last => false,
            Action::Stop => update.command.status == CommandStatus::Success,
        };

        self.bootstraps.remove(&job_id);
        let Some(key) = self.setup.mark_job_done(job_id) else {
            return Ok(());
        };

        if !succeeded {
            warn!(
                %job_id,
                resource = %key.resource,
                experiment = %key.experiment,
                index,
                status = ?update.command.status,
                message = %update.command.message,
                "node-start task failed, will retry"
            );
            return Ok(());
        }

        self.with_ops(|_, ops| {
            let resource = ops
                .get_resources()
                .into_iter()
                .find(|r| r.name == key.resource);
            match (resource, ops.get_experiment(&key.experiment)) {
                (Some(resource), Some(experiment)) => {
                    ops.add_resource_caps(&resource, &experiment);
                    info!(resource = %key.resource, experiment = %key.experiment, "resource capable");
                }
                _ => warn!(resource = %key.resource, experiment = %key.experiment, "bootstrap finished for an unknown pair"),
            }
            Ok(())
        })
    }

    /// A dispatched job never reached its agent.
    pub fn on_job_launch_failure(&mut self, job_id: Uuid, soft: bool, message: &str) -> SchedulerResult<()> {
        if let Some(agent) = self.ledger.agent_for_job(job_id) {
            let Some(attempt) = self.ledger.report_agent_finish(agent) else {
                return Err(SchedulerError::UnknownJob(job_id));
            };
            if soft {
                warn!(%job_id, %agent, attempt_id = %attempt.id, message, "job launch failed, requeued");
                self.pending.insert(attempt.id, attempt);
                return Ok(());
            }
            warn!(%job_id, %agent, attempt_id = %attempt.id, message, "job launch failed");
            return self.with_ops(|_, ops| {
                ops.report_job_launch_failure(&attempt, agent, message);
                Ok(())
            });
        }

        if self.bootstraps.remove(&job_id).is_some() {
            self.setup.mark_job_done(job_id);
            warn!(%job_id, message, "node-start launch failed, will retry");
            return Ok(());
        }

        Err(SchedulerError::UnknownJob(job_id))
    }

    /// An operator (re)assigned an experiment to `resource`.
    pub fn on_resource_assigned(&mut self, resource: &str) -> SchedulerResult<()> {
        self.with_ops(|this, ops| {
            let Some(found) = ops.get_resources().into_iter().find(|r| r.name == resource) else {
                warn!(resource, "assignment to unknown resource ignored");
                return Ok(());
            };
            this.failures.clear(resource);
            let agents = ops.get_resource_agents(&found).len();
            debug!(resource, agents, "resource assigned");
            Ok(())
        })
    }

    // ── Tick ───────────────────────────────────────────────────────

    pub fn tick(&mut self) -> SchedulerResult<()> {
        self.with_ops(|this, ops| {
            let mut pool = this.free_agents();
            let parked = this.schedule_pending(ops, &mut pool);
            this.launch_agents(ops);
            if this.pending.len() <= parked {
                this.drain_held(ops, pool);
            }
            this.release_held();
            Ok(())
        })
    }

    /// READY agents with nothing dispatched to them.
    fn free_agents(&self) -> IndexSet<Uuid> {
        self.ready
            .iter()
            .filter(|a| !self.ledger.is_agent_assigned(**a))
            .filter(|a| !self.bootstraps.values().any(|run| run.agent == **a))
            .copied()
            .collect()
    }

    fn take_agent(&self, pool: &mut IndexSet<Uuid>, resource: &str) -> Option<Uuid> {
        let agent = pool
            .iter()
            .copied()
            .find(|a| self.agents.get(a).is_some_and(|r| r.name == resource))?;
        pool.shift_remove(&agent);
        Some(agent)
    }

    fn requeue(&mut self, attempts: Vec<JobAttempt>) {
        for attempt in attempts {
            self.pending.insert(attempt.id, attempt);
        }
    }

    /// Place pending attempts. Returns how many went back to pending
    /// because their experiment has nowhere to run yet; those do not keep
    /// held attempts from free agents.
    fn schedule_pending(&mut self, ops: &mut dyn AgentOperations, pool: &mut IndexSet<Uuid>) -> usize {
        let mut parked = 0;
        let mut by_experiment: IndexMap<String, Vec<JobAttempt>> = IndexMap::new();
        for (_, attempt) in std::mem::take(&mut self.pending) {
            by_experiment
                .entry(attempt.experiment.clone())
                .or_default()
                .push(attempt);
        }

        for (name, attempts) in by_experiment {
            let Some(experiment) = ops.get_experiment(&name) else {
                warn!(experiment = %name, "attempts for unknown experiment left pending");
                parked += attempts.len();
                self.requeue(attempts);
                continue;
            };
            let assigned = ops.get_assigned_resources(&name);
            if assigned.is_empty() {
                debug!(experiment = %name, "experiment has no resources");
                parked += attempts.len();
                self.requeue(attempts);
                continue;
            }

            let capable = self.capable_resources(ops, pool, &experiment, assigned);
            let eligible = self.failures.filter_eligible(capable);
            match placement::assign(attempts, &eligible) {
                Ok(assignments) => {
                    for assignment in assignments {
                        self.place(ops, pool, assignment);
                    }
                }
                Err(attempts) => {
                    debug!(experiment = %name, count = attempts.len(), "no eligible resource");
                    parked += attempts.len();
                    self.requeue(attempts);
                }
            }
        }
        parked
    }

    /// Split `assigned` into capable resources (returned) and incapable
    /// ones, which are bootstrapped. Pairs mid-bootstrap are skipped.
    fn capable_resources(
        &mut self,
        ops: &mut dyn AgentOperations,
        pool: &mut IndexSet<Uuid>,
        experiment: &Experiment,
        assigned: Vec<Resource>,
    ) -> Vec<Resource> {
        let mut capable = Vec::new();
        for resource in assigned {
            if self.setup.is_setup_running(&resource.name, &experiment.name) {
                continue;
            }
            if ops.is_resource_capable(&resource, experiment) {
                capable.push(resource);
                continue;
            }
            if !experiment.needs_bootstrap() {
                ops.add_resource_caps(&resource, experiment);
                info!(resource = %resource.name, experiment = %experiment.name, "resource capable, no node-start task");
                capable.push(resource);
                continue;
            }

            if let Some(agent) = self.take_agent(pool, &resource.name) {
                self.start_bootstrap(ops, agent, &resource, experiment);
            } else if !self
                .setup
                .has_agent_been_requested(&resource.name, &experiment.name)
            {
                self.request_bootstrap_agent(ops, &resource, experiment);
            }
        }
        capable
    }

    fn request_bootstrap_agent(
        &mut self,
        ops: &mut dyn AgentOperations,
        resource: &Resource,
        experiment: &Experiment,
    ) {
        match ops.launch_agents(resource, 1) {
            Ok(ids) => {
                let Some(&launch_id) = ids.first() else {
                    warn!(resource = %resource.name, "bootstrap launch returned no agents");
                    return;
                };
                self.setup
                    .mark_agent_requested(launch_id, &resource.name, &experiment.name);
                self.launching.extend(ids);
                info!(%launch_id, resource = %resource.name, experiment = %experiment.name, "bootstrap agent requested");
            }
            Err(e) => {
                warn!(resource = %resource.name, error = %e, "bootstrap agent launch failed");
                self.failures.report_failure(&resource.name);
            }
        }
    }

    fn start_bootstrap(
        &mut self,
        ops: &mut dyn AgentOperations,
        agent: Uuid,
        resource: &Resource,
        experiment: &Experiment,
    ) {
        let Some(task) = &experiment.node_start else {
            return;
        };
        let transfer_uri = ops.resolve_transfer_uri(resource, experiment);
        let job = NetworkJob::resolve(Uuid::new_v4(), 0, task, &HashMap::new(), transfer_uri);
        let job_id = job.id;
        let command_count = job.num_commands();

        match ops.run_unmanaged_job(job, agent) {
            Ok(()) => {
                self.setup
                    .mark_running(job_id, &resource.name, &experiment.name);
                self.bootstraps.insert(job_id, BootstrapRun { agent, command_count });
                info!(%agent, %job_id, resource = %resource.name, experiment = %experiment.name, "node-start task dispatched");
            }
            Err(e) => {
                warn!(%agent, resource = %resource.name, experiment = %experiment.name, error = %e, "node-start dispatch failed");
            }
        }
    }

    fn place(&mut self, ops: &mut dyn AgentOperations, pool: &mut IndexSet<Uuid>, assignment: Assignment) {
        let Assignment { attempt, resource } = assignment;
        match self.take_agent(pool, &resource.name) {
            Some(agent) => self.dispatch(ops, attempt, agent),
            None => {
                debug!(attempt_id = %attempt.id, resource = %resource.name, "no free agent, attempt held");
                self.heuristic.request_launch(&resource);
                self.held.insert(attempt.id, attempt);
            }
        }
    }

    fn dispatch(&mut self, ops: &mut dyn AgentOperations, attempt: JobAttempt, agent: Uuid) {
        let job = match ops.run_job(&attempt, agent) {
            Ok(job) => job,
            Err(e) => {
                warn!(%agent, attempt_id = %attempt.id, error = %e, "job dispatch failed");
                ops.report_job_launch_failure(&attempt, agent, &e.to_string());
                return;
            }
        };

        let job_id = job.id;
        if let Err(e) = self.ledger.register_run(&job, attempt.clone(), agent) {
            error!(%agent, %job_id, attempt_id = %attempt.id, error = %e, "ledger refused run");
            ops.cancel_current_job(agent);
            self.pending.insert(attempt.id, attempt);
            return;
        }
        info!(%agent, %job_id, attempt_id = %attempt.id, "job dispatched");
    }

    fn launch_agents(&mut self, ops: &mut dyn AgentOperations) {
        for request in self.heuristic.compute_launches() {
            let resource = &request.resource;
            match ops.launch_agents(resource, request.count) {
                Ok(ids) => {
                    info!(resource = %resource.name, requested = request.count, launched = ids.len(), "agents launching");
                    let missing = (request.count as usize).saturating_sub(ids.len());
                    if missing > 0 {
                        warn!(resource = %resource.name, missing, "launcher returned fewer agents than requested");
                    }
                    for _ in 0..missing {
                        self.heuristic.on_launch_failure(resource);
                    }
                    self.launching.extend(ids);
                }
                Err(e) => {
                    warn!(resource = %resource.name, count = request.count, error = %e, "agent launch request failed");
                    self.failures.report_failure(&resource.name);
                    for _ in 0..request.count {
                        self.heuristic.on_launch_failure(resource);
                    }
                }
            }
        }
    }

    /// Hand held attempts to whatever agents are still free on a resource
    /// their experiment can use.
    fn drain_held(&mut self, ops: &mut dyn AgentOperations, pool: IndexSet<Uuid>) {
        if self.held.is_empty() || pool.is_empty() {
            return;
        }

        for agent in pool {
            let Some(resource) = self.agents.get(&agent).cloned() else {
                continue;
            };
            let chosen = self
                .held
                .values()
                .find(|a| held_fits(&*ops, &resource, &a.experiment))
                .map(|a| a.id);
            if let Some(attempt) = chosen.and_then(|id| self.held.shift_remove(&id)) {
                debug!(%agent, attempt_id = %attempt.id, "held attempt dispatched");
                self.dispatch(ops, attempt, agent);
            }
        }
    }

    /// Held attempts with no agent alive or on the way can never run;
    /// send them back for reassignment.
    fn release_held(&mut self) {
        if self.held.is_empty() || !self.agents.is_empty() || !self.launching.is_empty() {
            return;
        }
        info!(count = self.held.len(), "no agents left, held attempts returned to pending");
        let held = std::mem::take(&mut self.held);
        self.pending.extend(held);
    }
}

fn held_fits(ops: &dyn AgentOperations, resource: &Resource, experiment: &str) -> bool {
    let Some(experiment) = ops.get_experiment(experiment) else {
        return false;
    };
    ops.get_assigned_resources(&experiment.name)
        .iter()
        .any(|r| r.name == resource.name)
        && ops.is_resource_capable(resource, &experiment)
}
