//! Sequential stage pipelines.
//!
//! A pipeline is a chain of nodes. Each node carries its own inputs, mutates
//! the shared run state, and either hands over to the next node or ends the
//! run with an output. Stages never overlap.

pub mod feedly;

use async_trait::async_trait;
use kiln_abstraction::RuntimeError;
use thiserror::Error;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::agents::{AgentConfigError, FactoryError};
use crate::sources::SourceError;

pub use feedly::{FeedlyDeps, FeedlyNode, FeedlyResult, FeedlyState, Interestingness};

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The agent returned a different number of labels than items sent.
    #[error("batch {batch} returned {actual} labels for {expected} items")]
    MismatchedBatchResult {
        /// Zero-based batch index.
        batch: usize,
        /// Items in the batch.
        expected: usize,
        /// Labels extracted from the response.
        actual: usize,
    },

    #[error("item source error: {0}")]
    Source(#[from] SourceError),

    #[error("agent factory error: {0}")]
    Factory(#[from] FactoryError),

    #[error("agent config error: {0}")]
    Config(#[from] AgentConfigError),

    #[error("agent run failed: {0}")]
    Runtime(#[from] RuntimeError),

    /// Run state does not line up.
    #[error("inconsistent pipeline state: {0}")]
    InconsistentState(String),

    #[error("pipeline did not finish within {0} steps")]
    StepLimitExceeded(usize),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// What a node hands back to the engine.
#[derive(Debug)]
pub enum Transition<N, O> {
    /// Continue with another node.
    Next(N),
    /// Finish the run.
    End(O),
}

/// One pipeline stage.
#[async_trait]
pub trait Node: Send + Sized {
    /// Mutable state threaded through the run.
    type State: Send;
    /// Shared services.
    type Deps: Send + Sync;
    /// Value the final node produces.
    type Output: Send;

    /// Stage name used in logs and run history.
    fn name(&self) -> &'static str;

    /// Runs the stage.
    async fn run(self, state: &mut Self::State, deps: &Self::Deps) -> Result<Transition<Self, Self::Output>>;
}

/// A finished run.
#[derive(Debug)]
pub struct PipelineRun<O> {
    pub run_id: Uuid,
    /// Stage names in the order they ran.
    pub history: Vec<&'static str>,
    pub output: O,
}

/// Drives nodes until one ends the run.
#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    max_steps: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self { max_steps: Self::DEFAULT_MAX_STEPS }
    }
}

impl Pipeline {
    /// Step limit used by [`Pipeline::new`].
    pub const DEFAULT_MAX_STEPS: usize = 64;

    /// Creates an engine with the default step limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the step limit.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Runs from `start` until a node ends the run.
    ///
    /// # Errors
    /// The first stage error, or `StepLimitExceeded`.
    pub async fn run<N: Node>(&self, start: N, state: &mut N::State, deps: &N::Deps) -> Result<PipelineRun<N::Output>> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", run_id = %run_id);
        self.drive(run_id, start, state, deps).instrument(span).await
    }

    async fn drive<N: Node>(
        &self,
        run_id: Uuid,
        start: N,
        state: &mut N::State,
        deps: &N::Deps,
    ) -> Result<PipelineRun<N::Output>> {
        let mut node = start;
        let mut history = Vec::new();

        loop {
            if history.len() >= self.max_steps {
                error!(max_steps = self.max_steps, "Pipeline exceeded step limit");
                return Err(PipelineError::StepLimitExceeded(self.max_steps));
            }

            let stage = node.name();
            history.push(stage);
            info!(stage, step = history.len(), "Running stage");

            match node.run(state, deps).await {
                Ok(Transition::Next(next)) => node = next,
                Ok(Transition::End(output)) => {
                    info!(stages = history.len(), "Pipeline finished");
                    return Ok(PipelineRun { run_id, history, output });
                }
                Err(e) => {
                    error!(stage, error = %e, "Stage failed, aborting pipeline");
                    return Err(e);
                }
            }
        }
    }
}
