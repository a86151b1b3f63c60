use std::path::PathBuf;
use thiserror::Error;

/// Failures the run orchestrator has to tell apart. Everything else travels as
/// a plain `anyhow::Error` with context.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Mandatory task instructions file not found or empty: {}", .0.display())]
    MissingTaskFile(PathBuf),

    #[error("No NetLogo cases found in {}", .0.display())]
    NoCases(PathBuf),

    #[error("Model response is missing the {0} section")]
    MissingMarker(String),

    #[error("Malformed {stage} artifact: {reason}")]
    MalformedArtifact { stage: String, reason: String },

    #[error("Invalid audit verdict: {0}")]
    InvalidVerdict(String),
}

impl PipelineError {
    pub fn malformed(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedArtifact {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}
