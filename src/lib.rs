//! A fixed-topology staged pipeline built from worker threads and
//! single-slot handoff links.
//!
//! One producer function feeds a chain of transform functions. Each function
//! runs on its own thread, and adjacent stages are joined by a [`Link`] that
//! holds at most one item, so a slow stage holds back everything upstream of
//! it instead of letting items pile up.
//!
//! # Features
//!
//! - Single-slot links with blocking put/take and an explicit closed state
//! - FIFO delivery from the producer to the consumer
//! - Cooperative shutdown that never leaves a worker blocked
//! - Per-stage timing metrics and `tracing` diagnostics
//! - Builder for naming stages and configuring worker threads
//!
//! # Example
//!
//! ```
//! use stage_pipeline::PipelineBuilder;
//!
//! let mut next = 0u32;
//! let pipeline = PipelineBuilder::new(move || {
//!     next += 1;
//!     next
//! })
//! .stage("double", |x| x * 2)
//! .stage("increment", |x| x + 1)
//! .build()?;
//!
//! assert_eq!(pipeline.get_next_result()?, 3);
//! assert_eq!(pipeline.get_next_result()?, 5);
//!
//! let report = pipeline.shutdown()?;
//! assert!(report.total_discarded() <= 6);
//! # Ok::<(), stage_pipeline::PipelineError>(())
//! ```

pub mod error;
pub mod link;
pub mod metrics;
pub mod pipeline;
pub mod stage;

// Re-exports for convenience
pub use error::{PipelineError, Result};
pub use link::{Link, LinkStats};
pub use metrics::{MetricsSnapshot, PercentileTracker, StageMetrics};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig, ShutdownReport};
pub use stage::{Producer, RelayStage, SourceStage, SpawnConfig, Stage, StageHandle, Step, Transform};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
