//! An in-memory grid: one experiment, a job table, resources and the
//! agents dispatched to. Reports go back to the master through its
//! event channel, the way a real transport would send them.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use uuid::Uuid;

use sweepgrid_core::*;
use sweepgrid_master::{EventReceiver, EventSender, Master, channel};
use sweepgrid_scheduler::{AgentOperations, JobOperations};

#[derive(Debug)]
pub struct Grid {
    pub experiment: Experiment,
    pub resources: Vec<Resource>,
    pub capable: HashSet<String>,
    pub jobs: Vec<Job>,
    pub attempts: HashMap<Uuid, Vec<JobAttempt>>,
    pub launches: Vec<Vec<Uuid>>,
    /// Network job id → (attempt id, agent).
    pub dispatched: HashMap<Uuid, (Uuid, Uuid)>,
    pub cancelled: Vec<Uuid>,
    pub states: Vec<ExperimentState>,
}

impl Grid {
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

    /// Network job id of whatever `agent` was last given.
    pub fn job_on(&self, agent: Uuid) -> Option<Uuid> {
        self.dispatched
            .iter()
            .find(|(_, (_, a))| *a == agent)
            .map(|(job, _)| *job)
    }
}

#[derive(Clone)]
pub struct GridOps {
    pub grid: Rc<RefCell<Grid>>,
    pub events: EventSender,
}

impl AgentOperations for GridOps {
    fn launch_agents(&mut self, _resource: &Resource, count: u32) -> anyhow::Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
        self.grid.borrow_mut().launches.push(ids.clone());
        Ok(ids)
    }

    fn terminate_agent(&mut self, _agent: Uuid) {}

    fn run_job(&mut self, attempt: &JobAttempt, agent: Uuid) -> anyhow::Result<NetworkJob> {
        let mut grid = self.grid.borrow_mut();
        let job = NetworkJob::resolve(Uuid::new_v4(), 0, &grid.experiment.main, &HashMap::new(), None);
        grid.dispatched.retain(|_, (_, a)| *a != agent);
        grid.dispatched.insert(job.id, (attempt.id, agent));
        Ok(job)
    }

    fn run_unmanaged_job(&mut self, _job: NetworkJob, _agent: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    fn cancel_current_job(&mut self, _agent: Uuid) {}

    fn get_resources(&self) -> Vec<Resource> {
        self.grid.borrow().resources.clone()
    }

    fn get_assigned_resources(&self, _experiment: &str) -> Vec<Resource> {
        self.grid.borrow().resources.clone()
    }

    fn get_experiment(&self, name: &str) -> Option<Experiment> {
        let grid = self.grid.borrow();
        (grid.experiment.name == name).then(|| grid.experiment.clone())
    }

    fn resolve_transfer_uri(&self, _resource: &Resource, _experiment: &Experiment) -> Option<String> {
        None
    }

    fn is_resource_capable(&self, resource: &Resource, _experiment: &Experiment) -> bool {
        self.grid.borrow().capable.contains(&resource.name)
    }

    fn add_resource_caps(&mut self, resource: &Resource, _experiment: &Experiment) {
        self.grid.borrow_mut().capable.insert(resource.name.clone());
    }

    fn get_agent_resource(&self, _agent: Uuid) -> Option<Resource> {
        None
    }

    fn get_resource_agents(&self, _resource: &Resource) -> Vec<Agent> {
        Vec::new()
    }

    fn report_job_failure(&mut self, attempt: &JobAttempt, _agent: Uuid, reason: FailureReason) {
        self.events.attempt_failed(attempt.clone(), reason).unwrap();
    }

    fn report_job_launch_failure(&mut self, attempt: &JobAttempt, _agent: Uuid, message: &str) {
        self.events
            .attempt_launch_failed(attempt.clone(), message)
            .unwrap();
    }
}

impl JobOperations for GridOps {
    fn get_experiment(&self) -> Experiment {
        self.grid.borrow().experiment.clone()
    }

    fn filter_jobs(
        &self,
        _experiment: &Experiment,
        statuses: &[JobStatus],
        start_index: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<Job>> {
        let grid = self.grid.borrow();
        Ok(grid
            .jobs
            .iter()
            .filter(|j| j.index >= start_index && statuses.contains(&grid.status(j.id)))
            .take(limit)
            .cloned()
            .collect())
    }

    fn fetch_job_status(&self, job: Uuid) -> JobStatus {
        self.grid.borrow().status(job)
    }

    fn run_jobs(&mut self, jobs: &[Job]) -> anyhow::Result<Vec<JobAttempt>> {
        let mut grid = self.grid.borrow_mut();
        let attempts: Vec<JobAttempt> = jobs.iter().map(JobAttempt::new).collect();
        for attempt in &attempts {
            grid.attempts
                .entry(attempt.job_id)
                .or_default()
                .push(attempt.clone());
        }
        Ok(attempts)
    }

    fn cancel_job(&mut self, attempt: Uuid) {
        self.grid.borrow_mut().cancelled.push(attempt);
        self.events.cancel_attempt(attempt).unwrap();
    }

    fn update_experiment_state(&mut self, state: ExperimentState) {
        let mut grid = self.grid.borrow_mut();
        grid.experiment.state = state;
        grid.states.push(state);
    }

    fn update_job_started(&mut self, attempt: Uuid, agent: Uuid) {
        if let Some(a) = self.grid.borrow_mut().attempt_mut(attempt) {
            a.start(agent, epoch_secs()).unwrap();
        }
    }

    fn update_job_finished(&mut self, attempt: Uuid, failed: bool) {
        if let Some(a) = self.grid.borrow_mut().attempt_mut(attempt) {
            a.finish(failed, epoch_secs()).unwrap();
        }
    }

    fn record_command_result(&mut self, _attempt: Uuid, _result: &CommandResult, _stop: bool) {}
}

pub struct Harness {
    pub master: Master,
    pub grid: Rc<RefCell<Grid>>,
    pub events: EventSender,
}

pub fn harness(config: &SweepConfig, jobs: usize) -> Harness {
    let experiment = Experiment::new("sweep", Task::new(vec![Command::new("sim", &["${x}"])]));
    let grid = Rc::new(RefCell::new(Grid {
        jobs: (0..jobs as u64)
            .map(|i| Job::new(&experiment.name, i, HashMap::from([("x".to_string(), i.to_string())])))
            .collect(),
        experiment,
        resources: vec![Resource::new("hpc", "pbs")],
        capable: HashSet::new(),
        attempts: HashMap::new(),
        launches: Vec::new(),
        dispatched: HashMap::new(),
        cancelled: Vec::new(),
        states: Vec::new(),
    }));

    let (events, receiver): (EventSender, EventReceiver) = channel();
    let ops = GridOps {
        grid: grid.clone(),
        events: events.clone(),
    };
    let master = Master::new(config, receiver, Box::new(ops.clone()), Box::new(ops)).unwrap();
    Harness {
        master,
        grid,
        events,
    }
}

impl Harness {
    /// Bring an agent to READY on "hpc".
    pub fn agent_ready(&self, agent: Uuid) {
        let hpc = Resource::new("hpc", "pbs");
        self.events
            .agent_state_changed(agent, hpc.clone(), None, AgentState::WaitingForHello)
            .unwrap();
        self.events
            .agent_state_changed(agent, hpc, Some(AgentState::WaitingForHello), AgentState::Ready)
            .unwrap();
    }

    pub fn agent_moves(&self, agent: Uuid, old: AgentState, new: AgentState) {
        self.events
            .agent_state_changed(agent, Resource::new("hpc", "pbs"), Some(old), new)
            .unwrap();
    }

    /// The agent runs its job to the end with `status`, reporting the
    /// way a real agent does: BUSY, the final result, READY again.
    pub fn agent_finishes(&self, agent: Uuid, status: CommandStatus) {
        let job_id = self
            .grid
            .borrow()
            .job_on(agent)
            .expect("agent has a job");
        self.agent_moves(agent, AgentState::Ready, AgentState::Busy);
        let mut command = CommandResult::success(0, 1.0);
        command.status = status;
        self.events
            .job_update(AgentUpdate {
                job_id,
                agent,
                command,
                action: Action::Stop,
            })
            .unwrap();
        self.agent_moves(agent, AgentState::Busy, AgentState::Ready);
        self.grid.borrow_mut().dispatched.remove(&job_id);
    }
}
