//! Planner settings.

use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};

/// Knobs of the hash-join expansion.
///
/// In a config file this is the `[planner]` table:
/// ```toml
/// [planner]
/// side_input_priority = -1
/// collector_local_parallelism = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Priority of collector -> joiner edges. Must be below the primary
    /// edge's priority (0) so side inputs drain first.
    pub side_input_priority: i32,
    /// Instances per member of every hash-join collector vertex.
    pub collector_local_parallelism: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            side_input_priority: -1,
            collector_local_parallelism: 1,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.side_input_priority >= 0 {
            return Err(PlanError::InvalidConfig(format!(
                "side_input_priority must be negative, got {}",
                self.side_input_priority
            )));
        }
        if self.collector_local_parallelism == 0 {
            return Err(PlanError::InvalidConfig(
                "collector_local_parallelism must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
