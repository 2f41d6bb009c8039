//! Back-end actuators.
//!
//! An [`Actuator`] starts and stops agent processes on one kind of
//! resource (local processes, SSH hosts, batch queues, cloud VMs). The
//! [`ActuatorRegistry`] picks the actuator by `Resource::kind` and turns
//! launch failures into [`SchedulerEvent::AgentLaunchFailed`] events, so
//! an `AgentOperations` implementation can forward `launch_agents`
//! straight to it.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use sweepgrid_core::{LaunchFailure, Resource};

use crate::error::{MasterError, MasterResult};
use crate::events::EventSender;

/// Agent counts an actuator sees on a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStatus {
    /// Agents running.
    pub active: u32,
    /// Agents submitted but not started (queued jobs, booting VMs).
    pub pending: u32,
}

pub trait Actuator {
    /// The `Resource::kind` this actuator serves.
    fn kind(&self) -> &str;

    /// Start one agent per id in `agents`. The agents report under these
    /// ids.
    fn launch(&mut self, resource: &Resource, agents: &[Uuid]) -> Result<(), LaunchFailure>;

    fn terminate(&mut self, resource: &Resource, agent: Uuid) -> anyhow::Result<()>;

    fn status(&self, resource: &Resource) -> anyhow::Result<ResourceStatus>;
}

pub struct ActuatorRegistry {
    actuators: HashMap<String, Box<dyn Actuator>>,
    events: EventSender,
}

impl ActuatorRegistry {
    pub fn new(events: EventSender) -> Self {
        Self {
            actuators: HashMap::new(),
            events,
        }
    }

    pub fn register(&mut self, actuator: Box<dyn Actuator>) -> MasterResult<()> {
        let kind = actuator.kind().to_string();
        if self.actuators.contains_key(&kind) {
            return Err(MasterError::DuplicateActuator(kind));
        }
        debug!(%kind, "actuator registered");
        self.actuators.insert(kind, actuator);
        Ok(())
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.actuators.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    fn actuator_mut(&mut self, resource: &Resource) -> MasterResult<&mut Box<dyn Actuator>> {
        self.actuators
            .get_mut(&resource.kind)
            .ok_or_else(|| MasterError::NoActuator(resource.kind.clone()))
    }

    /// Launch `count` agents on `resource` and return their ids. A
    /// rejected launch is reported once per id through the event channel.
    pub fn launch(&mut self, resource: &Resource, count: u32) -> MasterResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
        let actuator = self.actuator_mut(resource)?;

        match actuator.launch(resource, &ids) {
            Ok(()) => {
                info!(resource = %resource.name, kind = %resource.kind, count, "agents submitted");
            }
            Err(failure) => {
                warn!(resource = %resource.name, kind = %resource.kind, ?failure, "actuator rejected launch");
                for id in &ids {
                    self.events
                        .agent_launch_failed(*id, resource.clone(), failure.clone())?;
                }
            }
        }
        Ok(ids)
    }

    pub fn terminate(&mut self, resource: &Resource, agent: Uuid) -> MasterResult<()> {
        let actuator = self.actuator_mut(resource)?;
        if let Err(e) = actuator.terminate(resource, agent) {
            warn!(%agent, resource = %resource.name, error = %e, "terminate failed");
        }
        Ok(())
    }

    pub fn status(&self, resource: &Resource) -> MasterResult<Option<ResourceStatus>> {
        let actuator = self
            .actuators
            .get(&resource.kind)
            .ok_or_else(|| MasterError::NoActuator(resource.kind.clone()))?;
        match actuator.status(resource) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!(resource = %resource.name, error = %e, "status query failed");
                Ok(None)
            }
        }
    }
}
