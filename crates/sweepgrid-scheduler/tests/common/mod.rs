//! In-memory operations for scheduler tests.
//!
//! Both fakes keep their state behind `Rc<RefCell<…>>` so a test can
//! hand a boxed clone to the scheduler and keep inspecting the original.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use uuid::Uuid;

use sweepgrid_core::*;
use sweepgrid_scheduler::{AgentOperations, AgentScheduler, JobOperations, JobScheduler};

pub fn res(name: &str) -> Resource {
    Resource::new(name, "local")
}

pub fn task(commands: usize) -> Task {
    Task::new(
        (0..commands)
            .map(|i| Command::new("run", &[&format!("step-{i}")]))
            .collect(),
    )
}

pub fn attempt(experiment: &str) -> JobAttempt {
    JobAttempt::new(&Job::new(experiment, 0, HashMap::new()))
}

pub fn update(job_id: Uuid, agent: Uuid, index: usize, status: CommandStatus, action: Action) -> AgentUpdate {
    let mut command = CommandResult::success(index, 0.5);
    command.status = status;
    AgentUpdate {
        job_id,
        agent,
        command,
        action,
    }
}

// ── Agent side ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct AgentWorld {
    pub resources: Vec<Resource>,
    pub experiments: HashMap<String, Experiment>,
    /// Experiment → assigned resource names.
    pub assigned: HashMap<String, Vec<String>>,
    /// (resource, experiment) pairs marked capable.
    pub capable: HashSet<(String, String)>,
    /// (resource, count, ids) per launch call.
    pub launches: Vec<(String, u32, Vec<Uuid>)>,
    pub fail_launches: bool,
    /// Cap on agents a single launch call returns.
    pub launch_limit: Option<u32>,
    pub fail_dispatch: bool,
    /// (attempt, agent, job) per managed dispatch.
    pub dispatched: Vec<(Uuid, Uuid, NetworkJob)>,
    /// (job, agent) per unmanaged dispatch.
    pub unmanaged: Vec<(NetworkJob, Uuid)>,
    pub cancelled: Vec<Uuid>,
    pub terminated: Vec<Uuid>,
    pub job_failures: Vec<(Uuid, Uuid, FailureReason)>,
    pub launch_failures: Vec<(Uuid, Uuid, String)>,
}

impl AgentWorld {
    pub fn add_resource(&mut self, name: &str) {
        self.resources.push(res(name));
    }

    pub fn add_experiment(&mut self, experiment: Experiment, resources: &[&str]) {
        self.assigned.insert(
            experiment.name.clone(),
            resources.iter().map(|r| r.to_string()).collect(),
        );
        self.experiments.insert(experiment.name.clone(), experiment);
    }

    pub fn dispatched_to(&self, agent: Uuid) -> usize {
        self.dispatched.iter().filter(|(_, a, _)| *a == agent).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeAgentOps(pub Rc<RefCell<AgentWorld>>);

impl AgentOperations for FakeAgentOps {
    fn launch_agents(&mut self, resource: &Resource, count: u32) -> anyhow::Result<Vec<Uuid>> {
        let mut world = self.0.borrow_mut();
        if world.fail_launches {
            anyhow::bail!("launcher unavailable");
        }
        let count = world.launch_limit.map_or(count, |limit| count.min(limit));
        let ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
        world.launches.push((resource.name.clone(), count, ids.clone()));
        Ok(ids)
    }

    fn terminate_agent(&mut self, agent: Uuid) {
        self.0.borrow_mut().terminated.push(agent);
    }

    fn run_job(&mut self, attempt: &JobAttempt, agent: Uuid) -> anyhow::Result<NetworkJob> {
        let mut world = self.0.borrow_mut();
        if world.fail_dispatch {
            anyhow::bail!("agent queue closed");
        }
        let Some(experiment) = world.experiments.get(&attempt.experiment) else {
            anyhow::bail!("unknown experiment {}", attempt.experiment);
        };
        let job = NetworkJob::resolve(Uuid::new_v4(), 0, &experiment.main, &HashMap::new(), None);
        world.dispatched.push((attempt.id, agent, job.clone()));
        Ok(job)
    }

    fn run_unmanaged_job(&mut self, job: NetworkJob, agent: Uuid) -> anyhow::Result<()> {
        let mut world = self.0.borrow_mut();
        if world.unmanaged.iter().any(|(j, _)| j.id == job.id) {
            anyhow::bail!("job {} already running", job.id);
        }
        world.unmanaged.push((job, agent));
        Ok(())
    }

    fn cancel_current_job(&mut self, agent: Uuid) {
        self.0.borrow_mut().cancelled.push(agent);
    }

    fn get_resources(&self) -> Vec<Resource> {
        self.0.borrow().resources.clone()
    }

    fn get_assigned_resources(&self, experiment: &str) -> Vec<Resource> {
        let world = self.0.borrow();
        world
            .assigned
            .get(experiment)
            .map(|names| {
                world
                    .resources
                    .iter()
                    .filter(|r| names.contains(&r.name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn get_experiment(&self, name: &str) -> Option<Experiment> {
        self.0.borrow().experiments.get(name).cloned()
    }

    fn resolve_transfer_uri(&self, resource: &Resource, experiment: &Experiment) -> Option<String> {
        Some(format!("file:///transfer/{}/{}", resource.name, experiment.name))
    }

    fn is_resource_capable(&self, resource: &Resource, experiment: &Experiment) -> bool {
        self.0
            .borrow()
            .capable
            .contains(&(resource.name.clone(), experiment.name.clone()))
    }

    fn add_resource_caps(&mut self, resource: &Resource, experiment: &Experiment) {
        self.0
            .borrow_mut()
            .capable
            .insert((resource.name.clone(), experiment.name.clone()));
    }

    fn get_agent_resource(&self, _agent: Uuid) -> Option<Resource> {
        None
    }

    fn get_resource_agents(&self, _resource: &Resource) -> Vec<Agent> {
        Vec::new()
    }

    fn report_job_failure(&mut self, attempt: &JobAttempt, agent: Uuid, reason: FailureReason) {
        self.0.borrow_mut().job_failures.push((attempt.id, agent, reason));
    }

    fn report_job_launch_failure(&mut self, attempt: &JobAttempt, agent: Uuid, message: &str) {
        self.0
            .borrow_mut()
            .launch_failures
            .push((attempt.id, agent, message.to_string()));
    }
}

/// An agent scheduler wired to a fresh fake world.
pub fn agent_scheduler() -> (AgentScheduler, FakeAgentOps) {
    let ops = FakeAgentOps::default();
    let mut scheduler = AgentScheduler::new(&SchedulerConfig::default());
    scheduler
        .set_agent_operations(Box::new(ops.clone()))
        .unwrap();
    (scheduler, ops)
}

/// Bring an agent on `resource` through hello to READY.
pub fn ready_agent(scheduler: &mut AgentScheduler, resource: &str) -> Uuid {
    let agent = Uuid::new_v4();
    hello(scheduler, agent, resource);
    agent
}

pub fn hello(scheduler: &mut AgentScheduler, agent: Uuid, resource: &str) {
    scheduler
        .on_agent_state_update(agent, &res(resource), None, AgentState::WaitingForHello)
        .unwrap();
    scheduler
        .on_agent_state_update(
            agent,
            &res(resource),
            Some(AgentState::WaitingForHello),
            AgentState::Ready,
        )
        .unwrap();
}

// ── Job side ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct JobWorld {
    pub experiment: Experiment,
    pub jobs: Vec<Job>,
    /// Job id → its attempts.
    pub attempts: HashMap<Uuid, Vec<JobAttempt>>,
    /// (attempt, result, stop) per recorded result.
    pub results: Vec<(Uuid, CommandResult, bool)>,
    pub started: Vec<(Uuid, Uuid)>,
    pub cancelled: Vec<Uuid>,
    pub states: Vec<ExperimentState>,
    pub fail_pull: bool,
    /// (start_index, limit) per pull.
    pub pulls: Vec<(u64, usize)>,
}

impl JobWorld {
    pub fn new(experiment: Experiment, jobs: usize) -> Self {
        let jobs = (0..jobs as u64)
            .map(|i| Job::new(&experiment.name, i, HashMap::from([("x".to_string(), i.to_string())])))
            .collect();
        Self {
            experiment,
            jobs,
            attempts: HashMap::new(),
            results: Vec::new(),
            started: Vec::new(),
            cancelled: Vec::new(),
            states: Vec::new(),
            fail_pull: false,
            pulls: Vec::new(),
        }
    }

    pub fn status(&self, job_id: Uuid) -> JobStatus {
        JobStatus::derive(
            self.attempts
                .get(&job_id)
                .into_iter()
                .flatten()
                .map(|a| a.status),
        )
    }

    fn attempt_mut(&mut self, attempt_id: Uuid) -> Option<&mut JobAttempt> {
        self.attempts
            .values_mut()
            .flatten()
            .find(|a| a.id == attempt_id)
    }
}

#[derive(Debug, Clone)]
pub struct FakeJobOps(pub Rc<RefCell<JobWorld>>);

impl JobOperations for FakeJobOps {
    fn get_experiment(&self) -> Experiment {
        self.0.borrow().experiment.clone()
    }

    fn filter_jobs(
        &self,
        _experiment: &Experiment,
        statuses: &[JobStatus],
        start_index: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<Job>> {
        let mut world = self.0.borrow_mut();
        if world.fail_pull {
            anyhow::bail!("store unavailable");
        }
        world.pulls.push((start_index, limit));
        Ok(world
            .jobs
            .iter()
            .filter(|j| j.index >= start_index)
            .filter(|j| statuses.contains(&world.status(j.id)))
            .take(limit)
            .cloned()
            .collect())
    }

    fn fetch_job_status(&self, job: Uuid) -> JobStatus {
        self.0.borrow().status(job)
    }

    fn run_jobs(&mut self, jobs: &[Job]) -> anyhow::Result<Vec<JobAttempt>> {
        let mut world = self.0.borrow_mut();
        let attempts: Vec<JobAttempt> = jobs.iter().map(JobAttempt::new).collect();
        for attempt in &attempts {
            world
                .attempts
                .entry(attempt.job_id)
                .or_default()
                .push(attempt.clone());
        }
        Ok(attempts)
    }

    fn cancel_job(&mut self, attempt: Uuid) {
        self.0.borrow_mut().cancelled.push(attempt);
    }

    fn update_experiment_state(&mut self, state: ExperimentState) {
        let mut world = self.0.borrow_mut();
        world.experiment.state = state;
        world.states.push(state);
    }

    fn update_job_started(&mut self, attempt: Uuid, agent: Uuid) {
        let mut world = self.0.borrow_mut();
        world.started.push((attempt, agent));
        if let Some(a) = world.attempt_mut(attempt) {
            a.start(agent, epoch_secs()).unwrap();
        }
    }

    fn update_job_finished(&mut self, attempt: Uuid, failed: bool) {
        let mut world = self.0.borrow_mut();
        if let Some(a) = world.attempt_mut(attempt) {
            a.finish(failed, epoch_secs()).unwrap();
        }
    }

    fn record_command_result(&mut self, attempt: Uuid, result: &CommandResult, stop: bool) {
        self.0
            .borrow_mut()
            .results
            .push((attempt, result.clone(), stop));
    }
}

/// A job scheduler over `jobs` jobs of a single-command experiment.
pub fn job_scheduler(config: &SchedulerConfig, jobs: usize) -> (JobScheduler, FakeJobOps) {
    job_scheduler_for(config, Experiment::new("sweep", task(1)), jobs)
}

pub fn job_scheduler_for(
    config: &SchedulerConfig,
    experiment: Experiment,
    jobs: usize,
) -> (JobScheduler, FakeJobOps) {
    let ops = FakeJobOps(Rc::new(RefCell::new(JobWorld::new(experiment, jobs))));
    let mut scheduler = JobScheduler::new(config);
    scheduler.set_job_operations(Box::new(ops.clone())).unwrap();
    (scheduler, ops)
}
