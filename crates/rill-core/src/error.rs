//! Planner errors.
//!
//! Every error is structural: it is raised before anything is submitted and
//! retrying cannot help.

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Stages whose output nobody consumes. Lists every offender.
    #[error("these stages have nothing attached to them: {}", .stages.join(", "))]
    PipelineValidation { stages: Vec<String> },

    /// A stage breaks the contract between the pipeline builder and the
    /// planner (wrong number of inputs, unknown upstream, ...).
    #[error("malformed stage {stage}: {reason}")]
    MalformedStage { stage: String, reason: String },

    #[error("stage graph contains a cycle through: {}", .stages.join(", "))]
    CyclicGraph { stages: Vec<String> },

    #[error("invalid planner configuration: {0}")]
    InvalidConfig(String),

    #[error("duplicate vertex name: {0}")]
    DuplicateVertex(String),
}

impl PlanError {
    pub(crate) fn malformed(stage: impl ToString, reason: impl Into<String>) -> Self {
        Self::MalformedStage {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }
}
