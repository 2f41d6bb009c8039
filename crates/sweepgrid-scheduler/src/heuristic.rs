//! Demand-driven agent spawning.
//!
//! Every time an attempt is assigned to a resource with no free agent,
//! that resource's demand goes up by one. Once per tick the accumulated
//! demand is turned into launch requests:
//!
//! ```text
//! min   = max(1, smallest demand)
//! max   = max(0, largest demand)
//! ratio = min / max
//!
//! for each resource, ascending by demand:
//!     skip if demand <= 0 or launches are still outstanding
//!     n = floor(demand / ratio)
//!     launch n; spawning += n; demand -= n
//! ```
//!
//! Scaling by `ratio` launches more than the raw demand whenever demands
//! differ between resources. Failed launches push demand well below
//! zero, so a failing resource sits out the following rounds.

use indexmap::IndexMap;
use tracing::{debug, info};

use sweepgrid_core::{Resource, SchedulerConfig};

/// A number of agents to launch on one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub resource: Resource,
    pub count: u32,
}

#[derive(Debug)]
struct ResourceDemand {
    resource: Resource,
    /// Unmet demand; negative after launch penalties.
    demand: i64,
    /// Launch requests with no outcome yet.
    spawning: u32,
}

#[derive(Debug)]
pub struct DemandHeuristic {
    /// Resource name → demand state, in first-seen order.
    demands: IndexMap<String, ResourceDemand>,
    spawn_cap: i64,
    penalty: i64,
}

impl DemandHeuristic {
    pub fn new(spawn_cap: i64, penalty: i64) -> Self {
        Self {
            demands: IndexMap::new(),
            spawn_cap,
            penalty,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.spawn_cap, config.launch_penalty)
    }

    /// Sum of all positive demand.
    pub fn total_demand(&self) -> i64 {
        self.demands.values().map(|d| d.demand.max(0)).sum()
    }

    pub fn demand(&self, resource: &str) -> i64 {
        self.demands.get(resource).map_or(0, |d| d.demand)
    }

    pub fn spawning(&self, resource: &str) -> u32 {
        self.demands.get(resource).map_or(0, |d| d.spawning)
    }

    fn entry(&mut self, resource: &Resource) -> &mut ResourceDemand {
        self.demands
            .entry(resource.name.clone())
            .or_insert_with(|| ResourceDemand {
                resource: resource.clone(),
                demand: 0,
                spawning: 0,
            })
    }

    /// Register a need for one more agent on `resource`. Returns `false`
    /// if the spawn cap has been reached and the request was dropped.
    pub fn request_launch(&mut self, resource: &Resource) -> bool {
        let total = self.total_demand();
        if total >= self.spawn_cap {
            debug!(resource = %resource.name, total, cap = self.spawn_cap, "spawn cap reached, launch request dropped");
            return false;
        }
        self.entry(resource).demand += 1;
        true
    }

    /// Turn the accumulated demand into launch requests.
    pub fn compute_launches(&mut self) -> Vec<LaunchRequest> {
        let mut order: Vec<(String, i64)> = self
            .demands
            .iter()
            .map(|(name, d)| (name.clone(), d.demand))
            .collect();
        if order.is_empty() {
            return Vec::new();
        }
        order.sort_by_key(|(_, demand)| *demand);

        let min = order.first().map_or(1, |(_, d)| (*d).max(1));
        let max = order.last().map_or(0, |(_, d)| (*d).max(0));
        if max == 0 {
            return Vec::new();
        }
        let ratio = min as f64 / max as f64;

        let mut launches = Vec::new();
        for (name, _) in order {
            let Some(state) = self.demands.get_mut(&name) else {
                continue;
            };
            if state.demand <= 0 || state.spawning > 0 {
                continue;
            }

            let n = (state.demand as f64 / ratio).floor() as i64;
            if n <= 0 {
                continue;
            }
            state.spawning += n as u32;
            state.demand -= n;

            info!(
                resource = %name,
                count = n,
                demand = state.demand,
                ratio,
                "requesting agents"
            );
            launches.push(LaunchRequest {
                resource: state.resource.clone(),
                count: n as u32,
            });
        }
        launches
    }

    /// An agent launch on `resource` failed.
    pub fn on_launch_failure(&mut self, resource: &Resource) {
        let penalty = self.penalty;
        let state = self.entry(resource);
        state.demand += penalty;
        state.spawning = state.spawning.saturating_sub(1);
        debug!(resource = %resource.name, demand = state.demand, "launch failure penalised");
    }

    /// An agent launched on `resource` said hello.
    pub fn on_launch_success(&mut self, resource: &str) {
        if let Some(state) = self.demands.get_mut(resource) {
            state.spawning = state.spawning.saturating_sub(1);
        }
    }
}

impl Default for DemandHeuristic {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}
