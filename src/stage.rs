use crate::error::{PipelineError, Result};
use crate::link::Link;
use crate::metrics::StageMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Zero-argument function feeding the first stage
pub type Producer<T> = Box<dyn FnMut() -> T + Send>;

/// One-argument function applied by every later stage
pub type Transform<T> = Box<dyn FnMut(T) -> T + Send>;

/// Outcome of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The item was delivered downstream
    Continue,
    /// A neighbouring link is closed; the worker should exit
    Closed,
}

/// A worker that moves one item per iteration into its downstream link
pub trait Stage: Send + 'static {
    type Item: Send + 'static;

    /// Ordinal position in the pipeline, used for diagnostics
    fn index(&self) -> usize;

    /// Human-readable name for diagnostics
    fn name(&self) -> &str;

    /// The link this stage pushes completed items into
    fn downstream(&self) -> &Arc<Link<Self::Item>>;

    /// The link this stage takes items from, if any
    fn upstream(&self) -> Option<&Arc<Link<Self::Item>>> {
        None
    }

    fn metrics(&self) -> &StageMetrics;

    /// Run one iteration: obtain an item, apply the user function, deliver it
    fn step(&mut self) -> Step;
}

/// First stage of a pipeline: calls the producer repeatedly
pub struct SourceStage<T> {
    name: String,
    producer: Producer<T>,
    downstream: Arc<Link<T>>,
    metrics: StageMetrics,
}

impl<T: Send + 'static> SourceStage<T> {
    pub fn new(name: impl Into<String>, producer: Producer<T>, downstream: Arc<Link<T>>) -> Self {
        Self {
            name: name.into(),
            producer,
            downstream,
            metrics: StageMetrics::new(),
        }
    }
}

impl<T: Send + 'static> Stage for SourceStage<T> {
    type Item = T;

    fn index(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn downstream(&self) -> &Arc<Link<T>> {
        &self.downstream
    }

    fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    fn step(&mut self) -> Step {
        tracing::trace!(stage = 0, name = %self.name, "worker start");
        let start = Instant::now();
        let item = (self.producer)();
        let ran = start.elapsed();
        self.metrics.record_run(ran);
        tracing::trace!(
            stage = 0,
            ran_ms = ran.as_secs_f64() * 1000.0,
            "worker done"
        );

        deliver(&self.downstream, item, 0, &self.metrics)
    }
}

/// Intermediate or final stage: takes from upstream, transforms, delivers
pub struct RelayStage<T> {
    index: usize,
    name: String,
    transform: Transform<T>,
    upstream: Arc<Link<T>>,
    downstream: Arc<Link<T>>,
    metrics: StageMetrics,
}

impl<T: Send + 'static> RelayStage<T> {
    pub fn new(
        index: usize,
        name: impl Into<String>,
        transform: Transform<T>,
        upstream: Arc<Link<T>>,
        downstream: Arc<Link<T>>,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            transform,
            upstream,
            downstream,
            metrics: StageMetrics::new(),
        }
    }
}

impl<T: Send + 'static> Stage for RelayStage<T> {
    type Item = T;

    fn index(&self) -> usize {
        self.index
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn downstream(&self) -> &Arc<Link<T>> {
        &self.downstream
    }

    fn upstream(&self) -> Option<&Arc<Link<T>>> {
        Some(&self.upstream)
    }

    fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    fn step(&mut self) -> Step {
        let wait_start = Instant::now();
        let Some(item) = self.upstream.take() else {
            return Step::Closed;
        };
        let waited = wait_start.elapsed();
        self.metrics.record_wait(waited);

        tracing::trace!(
            stage = self.index,
            name = %self.name,
            waited_ms = waited.as_secs_f64() * 1000.0,
            "worker start"
        );
        let start = Instant::now();
        let item = (self.transform)(item);
        let ran = start.elapsed();
        self.metrics.record_run(ran);
        tracing::trace!(
            stage = self.index,
            ran_ms = ran.as_secs_f64() * 1000.0,
            "worker done"
        );

        deliver(&self.downstream, item, self.index, &self.metrics)
    }
}

fn deliver<T>(link: &Link<T>, item: T, index: usize, metrics: &StageMetrics) -> Step {
    match link.put(item) {
        Ok(()) => {
            metrics.record_processed();
            Step::Continue
        }
        Err(rejected) => {
            metrics.record_discarded();
            tracing::debug!(stage = index, "downstream link closed, discarding item");
            drop(rejected);
            Step::Closed
        }
    }
}

/// Thread settings shared by every stage of a pipeline
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Prefix for worker thread names
    pub thread_prefix: String,
    /// Worker stack size, platform default when `None`
    pub stack_size: Option<usize>,
}

/// Closes the adjacent links when the worker exits, panics included
struct CloseOnExit<T> {
    upstream: Option<Arc<Link<T>>>,
    downstream: Arc<Link<T>>,
}

impl<T> Drop for CloseOnExit<T> {
    fn drop(&mut self) {
        self.downstream.close();
        if let Some(upstream) = &self.upstream {
            upstream.close();
        }
    }
}

fn run_stage<S: Stage>(mut stage: S, running: Arc<AtomicBool>) {
    let _close = CloseOnExit {
        upstream: stage.upstream().cloned(),
        downstream: Arc::clone(stage.downstream()),
    };

    tracing::debug!(stage = stage.index(), name = %stage.name(), "stage started");
    while running.load(Ordering::Acquire) {
        if stage.step() == Step::Closed {
            break;
        }
    }
    tracing::debug!(stage = stage.index(), name = %stage.name(), "stage stopped");
}

/// Owner of a running stage's thread.
///
/// Stopping is cooperative: the `running` flag is checked at the top of each
/// iteration, and closing the adjacent links wakes a worker blocked in
/// `put` or `take` so it reaches that check.
pub struct StageHandle<T> {
    index: usize,
    name: String,
    running: Arc<AtomicBool>,
    upstream: Option<Arc<Link<T>>>,
    downstream: Arc<Link<T>>,
    metrics: StageMetrics,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> StageHandle<T> {
    /// Start `stage` on its own thread
    pub fn spawn<S>(stage: S, config: &SpawnConfig) -> Result<Self>
    where
        S: Stage<Item = T>,
    {
        let index = stage.index();
        let name = stage.name().to_string();
        let upstream = stage.upstream().cloned();
        let downstream = Arc::clone(stage.downstream());
        let metrics = stage.metrics().clone();
        let running = Arc::new(AtomicBool::new(true));

        let mut builder =
            thread::Builder::new().name(format!("{}-stage-{}", config.thread_prefix, index));
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        let flag = Arc::clone(&running);
        let thread = builder.spawn(move || run_stage(stage, flag))?;

        Ok(Self {
            index,
            name,
            running,
            upstream,
            downstream,
            metrics,
            thread: Some(thread),
        })
    }
}

impl<T> StageHandle<T> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Whether the worker has not been asked to stop yet
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the running flag and wake the worker if it is blocked on a link
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.downstream.close();
        if let Some(upstream) = &self.upstream {
            upstream.close();
        }
    }

    /// Wait for the worker thread to exit.
    ///
    /// Joining twice is a no-op.
    pub fn join(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| {
                tracing::warn!(stage = self.index, name = %self.name, "stage panicked");
                PipelineError::StagePanicked { stage: self.index }
            }),
            None => Ok(()),
        }
    }
}

impl<T> Drop for StageHandle<T> {
    fn drop(&mut self) {
        self.request_stop();
        let _ = self.join();
    }
}
