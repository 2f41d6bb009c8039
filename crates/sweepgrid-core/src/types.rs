//! Domain types for SweepGrid.
//!
//! These mirror the records kept by the durable store: experiments and
//! their jobs, job attempts, agents, resources, and the resolved
//! network jobs shipped to agents. All types are serializable so the
//! store and the transport can carry them unchanged.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Name of a compute resource.
pub type ResourceName = String;

/// Name of an experiment.
pub type ExperimentName = String;

// ── Experiment ─────────────────────────────────────────────────────

/// Lifecycle state of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentState {
    Stopped,
    Started,
    /// Started, and never stopped automatically when it runs dry.
    Persistent,
}

/// A single command in a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// An ordered list of commands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Task {
    pub commands: Vec<Command>,
}

impl Task {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }
}

/// A parameter sweep compiled into jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: ExperimentName,
    pub state: ExperimentState,
    /// Declared sweep variables.
    pub variables: Vec<String>,
    /// Runs once per resource to make it capable of this experiment.
    pub node_start: Option<Task>,
    /// Per-job commands.
    pub main: Task,
}

impl Experiment {
    /// Create a started experiment without a node-start task.
    pub fn new(name: &str, main: Task) -> Self {
        Self {
            name: name.to_string(),
            state: ExperimentState::Started,
            variables: Vec::new(),
            node_start: None,
            main,
        }
    }

    pub fn with_node_start(mut self, task: Task) -> Self {
        self.node_start = Some(task);
        self
    }

    pub fn with_state(mut self, state: ExperimentState) -> Self {
        self.state = state;
        self
    }

    /// Whether resources must run a bootstrap task before taking jobs.
    pub fn needs_bootstrap(&self) -> bool {
        self.node_start.is_some()
    }
}

// ── Job ────────────────────────────────────────────────────────────

/// Aggregate status of a job, derived from its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    NotRun,
    Running,
    Failed,
    Completed,
}

impl JobStatus {
    /// Derive a job's status from the statuses of its attempts.
    ///
    /// Any completed attempt wins; otherwise a running attempt; otherwise
    /// a failed one. No attempts, or only unstarted ones, is `NotRun`.
    pub fn derive<I>(attempts: I) -> Self
    where
        I: IntoIterator<Item = AttemptStatus>,
    {
        let mut running = false;
        let mut failed = false;
        for status in attempts {
            match status {
                AttemptStatus::Completed => return JobStatus::Completed,
                AttemptStatus::Running => running = true,
                AttemptStatus::Failed => failed = true,
                AttemptStatus::NotRun => {}
            }
        }

        if running {
            JobStatus::Running
        } else if failed {
            JobStatus::Failed
        } else {
            JobStatus::NotRun
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::NotRun => write!(f, "not_run"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A unit of work: one point of an experiment's parameter sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub experiment: ExperimentName,
    /// Ordinal index within the experiment.
    pub index: u64,
    /// Variable name → value.
    pub bindings: HashMap<String, String>,
    pub created_at: u64,
}

impl Job {
    pub fn new(experiment: &str, index: u64, bindings: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            experiment: experiment.to_string(),
            index,
            bindings,
            created_at: epoch_secs(),
        }
    }
}

// ── Job attempt ────────────────────────────────────────────────────

/// Status of a single execution try of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    NotRun,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::NotRun => write!(f, "not_run"),
            AttemptStatus::Running => write!(f, "running"),
            AttemptStatus::Completed => write!(f, "completed"),
            AttemptStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One timed execution try of a job. Never reused once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub experiment: ExperimentName,
    pub status: AttemptStatus,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    /// Owning agent, set when the attempt starts.
    pub agent: Option<Uuid>,
}

impl JobAttempt {
    pub fn new(job: &Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            experiment: job.experiment.clone(),
            status: AttemptStatus::NotRun,
            created_at: epoch_secs(),
            started_at: None,
            finished_at: None,
            agent: None,
        }
    }

    /// NOT_RUN → RUNNING.
    pub fn start(&mut self, agent: Uuid, now: u64) -> CoreResult<()> {
        if self.status != AttemptStatus::NotRun {
            return Err(CoreError::InvalidAttemptTransition {
                from: self.status,
                to: AttemptStatus::Running,
            });
        }
        self.status = AttemptStatus::Running;
        self.started_at = Some(now);
        self.agent = Some(agent);
        Ok(())
    }

    /// RUNNING → COMPLETED/FAILED, or NOT_RUN → FAILED for an attempt
    /// that never started.
    pub fn finish(&mut self, failed: bool, now: u64) -> CoreResult<()> {
        let to = if failed {
            AttemptStatus::Failed
        } else {
            AttemptStatus::Completed
        };
        let allowed = match self.status {
            AttemptStatus::Running => true,
            AttemptStatus::NotRun => failed,
            AttemptStatus::Completed | AttemptStatus::Failed => false,
        };
        if !allowed {
            return Err(CoreError::InvalidAttemptTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, AttemptStatus::Completed | AttemptStatus::Failed)
    }
}

// ── Agent ──────────────────────────────────────────────────────────

/// Lifecycle state of a remote worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    /// Launched, not yet authenticated.
    WaitingForHello,
    Ready,
    Busy,
    /// Terminal.
    Shutdown,
}

impl AgentState {
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (WaitingForHello, Ready) | (Ready, Busy) | (Busy, Ready) | (WaitingForHello | Ready | Busy, Shutdown)
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::WaitingForHello => write!(f, "waiting_for_hello"),
            AgentState::Ready => write!(f, "ready"),
            AgentState::Busy => write!(f, "busy"),
            AgentState::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Why an agent shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// The host killed the agent with a signal.
    HostSignal,
    /// The master asked it to stop.
    Requested,
    /// The agent outlived its expiry time.
    Expired,
    /// The agent lost contact with the master.
    Falloff,
}

/// A remote worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub uuid: Uuid,
    pub state: AgentState,
    /// Transport queue, known once the agent said hello.
    pub queue: Option<String>,
    pub secret_key: String,
    /// Unix timestamp (seconds) after which the agent is expired.
    pub expiry_time: u64,
    pub shutdown_reason: Option<ShutdownReason>,
    pub shutdown_signal: Option<i32>,
}

impl Agent {
    pub fn new(uuid: Uuid, secret_key: &str, expiry_time: u64) -> Self {
        Self {
            uuid,
            state: AgentState::WaitingForHello,
            queue: None,
            secret_key: secret_key.to_string(),
            expiry_time,
            shutdown_reason: None,
            shutdown_signal: None,
        }
    }

    /// Move to `next`, enforcing the agent state machine.
    pub fn transition(&mut self, next: AgentState) -> CoreResult<AgentState> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidAgentTransition {
                from: self.state,
                to: next,
            });
        }
        let old = self.state;
        self.state = next;
        Ok(old)
    }

    /// Move to SHUTDOWN, recording why.
    pub fn shutdown(&mut self, reason: ShutdownReason, signal: Option<i32>) -> CoreResult<AgentState> {
        let old = self.transition(AgentState::Shutdown)?;
        self.shutdown_reason = Some(reason);
        self.shutdown_signal = signal;
        Ok(old)
    }
}

// ── Resource ───────────────────────────────────────────────────────

/// A named compute target capable of running agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: ResourceName,
    /// Back-end type: "local", "ssh", "pbs", "cloud", ...
    pub kind: String,
    /// Back-end specific configuration.
    pub config: serde_json::Value,
    pub parent: Option<ResourceName>,
}

impl Resource {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            config: serde_json::Value::Null,
            parent: None,
        }
    }
}

// ── Network job ────────────────────────────────────────────────────

/// The resolved, agent-ready command list for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkJob {
    /// Distinct from any attempt id.
    pub id: Uuid,
    pub index: u64,
    pub commands: Vec<Command>,
    pub transfer_uri: Option<String>,
}

impl NetworkJob {
    /// Resolve `task` against variable bindings.
    ///
    /// `${name}` is replaced by the bound value and `${txuri}` by the
    /// transfer URI; unknown references are left untouched.
    pub fn resolve(
        id: Uuid,
        index: u64,
        task: &Task,
        bindings: &HashMap<String, String>,
        transfer_uri: Option<String>,
    ) -> Self {
        let substitute = |s: &str| {
            let mut out = String::with_capacity(s.len());
            let mut rest = s;
            while let Some(start) = rest.find("${") {
                out.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                let Some(end) = after.find('}') else {
                    rest = &rest[start..];
                    break;
                };
                let name = &after[..end];
                let value = bindings.get(name).map(String::as_str).or(match name {
                    "txuri" => transfer_uri.as_deref(),
                    _ => None,
                });
                match value {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            out.push_str(rest);
            out
        };

        let commands = task
            .commands
            .iter()
            .map(|c| Command {
                program: substitute(&c.program),
                args: c.args.iter().map(|a| substitute(a)).collect(),
            })
            .collect();

        Self {
            id,
            index,
            commands,
            transfer_uri,
        }
    }

    pub fn num_commands(&self) -> usize {
        self.commands.len()
    }
}

// ── Results ────────────────────────────────────────────────────────

/// Outcome of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Success,
    Precondition,
    SystemError,
    Exception,
    Aborted,
}

/// Result of a command reported by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Index of the command within its job.
    pub index: usize,
    pub status: CommandStatus,
    /// Wall time in seconds.
    pub time: f64,
    pub retval: i32,
    pub message: String,
    pub error_code: i32,
}

impl CommandResult {
    pub fn success(index: usize, time: f64) -> Self {
        Self {
            index,
            status: CommandStatus::Success,
            time,
            retval: 0,
            message: String::new(),
            error_code: 0,
        }
    }

    /// A result synthesized by the master for a job that never reported.
    pub fn synthesized(status: CommandStatus, message: &str) -> Self {
        Self {
            index: 0,
            status,
            time: 0.0,
            retval: -1,
            message: message.to_string(),
            error_code: 0,
        }
    }
}

/// What the agent does after reporting a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Continue,
    Stop,
}

/// A job progress update sent by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUpdate {
    /// Network job id.
    pub job_id: Uuid,
    pub agent: Uuid,
    pub command: CommandResult,
    pub action: Action,
}

/// Why the master failed an attempt on an agent's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    Expired,
    Crashed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Expired => write!(f, "agent expired"),
            FailureReason::Crashed => write!(f, "agent crashed"),
        }
    }
}

/// Why an agent launch did not produce an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum LaunchFailure {
    /// Back-pressure: the resource has no room. Not counted as a failure.
    ResourceFull,
    Failed(String),
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
