//! sweepgrid.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub scheduler: SchedulerConfig,
    pub master: MasterConfig,
}

/// Tunables for the agent and job schedulers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Launch requests are dropped once the positive demand across all
    /// resources reaches this cap.
    pub spawn_cap: i64,
    /// Demand added to a resource when one of its launches fails.
    pub launch_penalty: i64,
    /// Jobs buffered by the job scheduler.
    pub buffer_size: usize,
    /// Pull more jobs once running + queued drops below this.
    pub refill_threshold: usize,
    /// A job is abandoned once its retry count exceeds this.
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            spawn_cap: 10,
            launch_penalty: -10,
            buffer_size: 1000,
            refill_threshold: 100,
            max_retries: 3,
        }
    }
}

/// Pacing of the master loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Pause between iterations while work remains (e.g. "100ms").
    pub tick_interval: String,
    /// Pause between iterations when idle (e.g. "1s").
    pub idle_interval: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            tick_interval: "100ms".to_string(),
            idle_interval: "1s".to_string(),
        }
    }
}

impl MasterConfig {
    pub fn tick_interval(&self) -> CoreResult<Duration> {
        parse_duration(&self.tick_interval)
    }

    pub fn idle_interval(&self) -> CoreResult<Duration> {
        parse_duration(&self.idle_interval)
    }
}

impl SweepConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: SweepConfig = toml::from_str(content)?;
        config.master.tick_interval()?;
        config.master.idle_interval()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "5s", "500ms", "2m" or a bare number of
/// seconds.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let invalid = || CoreError::InvalidDuration(s.to_string());
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}
