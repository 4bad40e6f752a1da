use crate::error::{PipelineError, Result};
use crate::link::{Link, LinkStats};
use crate::metrics::StageMetrics;
use crate::stage::{Producer, RelayStage, SourceStage, SpawnConfig, StageHandle, Transform};
use std::sync::Arc;
use std::time::Duration;

/// Settings applied to every stage of a pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pipeline name, used as the worker thread name prefix and in logs
    pub name: String,
    /// Worker stack size in bytes, platform default when `None`
    pub stack_size: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            stack_size: None,
        }
    }
}

/// A transform stage waiting to be spawned
struct StageSpec<T> {
    name: String,
    transform: Transform<T>,
}

/// Builder for constructing pipelines
pub struct PipelineBuilder<T> {
    config: PipelineConfig,
    source_name: String,
    producer: Producer<T>,
    stages: Vec<StageSpec<T>>,
}

impl<T: Send + 'static> PipelineBuilder<T> {
    /// Start a pipeline fed by `producer`
    pub fn new<F>(producer: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        Self {
            config: PipelineConfig::default(),
            source_name: "source".to_string(),
            producer: Box::new(producer),
            stages: Vec::new(),
        }
    }

    /// Set the pipeline name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the stack size of every worker thread
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Name the source stage
    pub fn source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Append a transform stage
    pub fn stage<F>(mut self, name: impl Into<String>, transform: F) -> Self
    where
        F: FnMut(T) -> T + Send + 'static,
    {
        self.stages.push(StageSpec {
            name: name.into(),
            transform: Box::new(transform),
        });
        self
    }

    /// Append an already boxed transform stage
    pub fn boxed_stage(mut self, name: impl Into<String>, transform: Transform<T>) -> Self {
        self.stages.push(StageSpec {
            name: name.into(),
            transform,
        });
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Allocate the links and start every worker.
    ///
    /// Stage 0 is the source; stage `i` takes from link `i - 1` and delivers
    /// into link `i`. The last link is the pipeline's output.
    pub fn build(self) -> Result<Pipeline<T>> {
        let stage_count = self.stages.len() + 1;
        let links: Vec<Arc<Link<T>>> = (0..stage_count).map(|_| Arc::new(Link::new())).collect();
        let spawn = SpawnConfig {
            thread_prefix: self.config.name.clone(),
            stack_size: self.config.stack_size,
        };

        // handles spawned before a failure are stopped and joined on drop
        let mut stages = Vec::with_capacity(stage_count);
        let source = SourceStage::new(self.source_name, self.producer, Arc::clone(&links[0]));
        stages.push(StageHandle::spawn(source, &spawn)?);

        for (i, spec) in self.stages.into_iter().enumerate() {
            let index = i + 1;
            let relay = RelayStage::new(
                index,
                spec.name,
                spec.transform,
                Arc::clone(&links[i]),
                Arc::clone(&links[index]),
            );
            stages.push(StageHandle::spawn(relay, &spawn)?);
        }

        tracing::debug!(pipeline = %self.config.name, stages = stage_count, "pipeline started");

        Ok(Pipeline {
            name: self.config.name,
            links,
            stages,
        })
    }
}

/// What teardown dropped instead of delivering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Items left in each link's slot, indexed by link (0 or 1 each)
    pub link_discards: Vec<u64>,
    /// Items each stage held when its downstream link closed (0 or 1 each)
    pub stage_discards: Vec<u64>,
}

impl ShutdownReport {
    pub fn total_discarded(&self) -> u64 {
        self.link_discards.iter().sum::<u64>() + self.stage_discards.iter().sum::<u64>()
    }
}

/// A running chain of stages.
///
/// Every worker is started by the time construction returns. Items leave the
/// pipeline through [`get_next_result`](Self::get_next_result) in the order
/// the producer created them.
pub struct Pipeline<T> {
    name: String,
    links: Vec<Arc<Link<T>>>,
    stages: Vec<StageHandle<T>>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Build a pipeline from a producer and an ordered list of transforms
    pub fn new<F>(producer: F, transforms: Vec<Transform<T>>) -> Result<Self>
    where
        F: FnMut() -> T + Send + 'static,
    {
        transforms
            .into_iter()
            .enumerate()
            .fold(PipelineBuilder::new(producer), |builder, (i, transform)| {
                builder.boxed_stage(format!("stage-{}", i + 1), transform)
            })
            .build()
    }
}

impl<T> Pipeline<T> {
    fn output(&self) -> &Link<T> {
        // build() always allocates one link per stage
        &self.links[self.links.len() - 1]
    }

    /// Block until the next fully processed item is available
    pub fn get_next_result(&self) -> Result<T> {
        self.output().take().ok_or(PipelineError::Disconnected)
    }

    /// Like [`get_next_result`](Self::get_next_result), but gives up after
    /// `timeout` and returns `Ok(None)`
    pub fn get_next_result_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let output = self.output();
        match output.take_timeout(timeout) {
            Some(item) => Ok(Some(item)),
            None if output.is_closed() => Err(PipelineError::Disconnected),
            None => Ok(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages, source included
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Get metrics for a specific stage
    pub fn stage_metrics(&self, index: usize) -> Option<&StageMetrics> {
        self.stages.get(index).map(|stage| stage.metrics())
    }

    /// Get counters for the link fed by stage `index`
    pub fn link_stats(&self, index: usize) -> Option<LinkStats> {
        self.links.get(index).map(|link| link.stats())
    }

    /// Get a summary of all stage metrics
    pub fn metrics_summary(&self) -> String {
        let mut summary = format!("Pipeline '{}' Metrics Summary:\n", self.name);
        for stage in &self.stages {
            summary.push_str(&format!(
                "  Stage {} ({}): {}\n",
                stage.index(),
                stage.name(),
                stage.metrics().snapshot().format()
            ));
        }
        summary
    }

    /// Stop every stage, join the workers and report discarded items
    pub fn shutdown(mut self) -> Result<ShutdownReport> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<ShutdownReport> {
        let mut stages = std::mem::take(&mut self.stages);
        if stages.is_empty() {
            return Ok(ShutdownReport::default());
        }

        for stage in &stages {
            stage.request_stop();
        }

        let mut first_panic = None;
        for stage in &mut stages {
            if let Err(err) = stage.join() {
                first_panic.get_or_insert(err);
            }
        }

        let link_discards = self
            .links
            .iter()
            .enumerate()
            .map(|(index, link)| {
                if link.discard_staged() {
                    tracing::debug!(pipeline = %self.name, link = index, "discarded staged item");
                }
                link.stats().discarded
            })
            .collect();
        let stage_discards = stages
            .iter()
            .map(|stage| stage.metrics().total_discarded())
            .collect();

        tracing::debug!(pipeline = %self.name, "pipeline stopped");

        match first_panic {
            Some(err) => Err(err),
            None => Ok(ShutdownReport {
                link_discards,
                stage_discards,
            }),
        }
    }
}

impl<T> Drop for Pipeline<T> {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}
