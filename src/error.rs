use thiserror::Error;

/// Result type for stage pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by the pipeline machinery itself.
///
/// Producer and transform functions never fail from the pipeline's point of
/// view; a stage that needs to report failure encodes it in the item.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A worker thread could not be spawned during construction
    #[error("Failed to spawn stage thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A worker thread panicked inside its user function
    #[error("Stage {stage} panicked")]
    StagePanicked { stage: usize },

    /// The final link was closed before an item became available
    #[error("Pipeline output is disconnected")]
    Disconnected,
}
