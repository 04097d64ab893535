//! Transformers and the transformer chain
//!
//! A transformer reads the transform context (and, through it, the store) and
//! stages changes into the graph. It never writes to the store itself.
//!
//! The chain runs its steps in declaration order. A parallel step runs each
//! member against its own snapshot of the context and its own graph seeded
//! with the root vertex, then merges the member graphs back in declaration
//! order. Members must not depend on each other's staged vertices; context
//! changes made by a parallel member are discarded with its snapshot.

use std::time::Duration;

use async_trait::async_trait;
use dbplane_common::{Error, Result};
use futures::future::join_all;
use tracing::{debug, info};

use crate::dag::Dag;

/// Whether the chain should keep going after a transformer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Run the next transformer
    Continue,
    /// End the chain without error; the graph built so far is executed
    Stop,
}

/// One unit of graph construction logic
#[async_trait]
pub trait Transformer<C>: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Stage changes for this concern
    async fn transform(&self, ctx: &mut C, dag: &mut Dag) -> Result<Flow>;
}

enum Step<C> {
    Single(Box<dyn Transformer<C>>),
    Parallel(Vec<Box<dyn Transformer<C>>>),
}

/// What a completed chain run asks of the caller
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainOutcome {
    /// First delayed-requeue signal raised during the run
    pub requeue: Option<(Duration, String)>,
    /// Transformer that ended the chain early, if any
    pub stopped_by: Option<&'static str>,
}

impl ChainOutcome {
    fn record(&mut self, name: &'static str, err: Error) -> Result<()> {
        match err {
            Error::DelayedRequeue { after, reason } => {
                debug!(transformer = name, ?after, %reason, "transformer asked for a delayed requeue");
                if self.requeue.is_none() {
                    self.requeue = Some((after, reason));
                }
                Ok(())
            }
            other => Err(other),
        }
    }
}

/// Ordered list of transformers with optional parallel groups
pub struct TransformerChain<C> {
    steps: Vec<Step<C>>,
}

impl<C> Default for TransformerChain<C> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<C> TransformerChain<C>
where
    C: Clone + Send + Sync,
{
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sequential step
    pub fn then(mut self, transformer: impl Transformer<C> + 'static) -> Self {
        self.steps.push(Step::Single(Box::new(transformer)));
        self
    }

    /// Append a group whose members run concurrently on context snapshots
    pub fn parallel(mut self, group: Vec<Box<dyn Transformer<C>>>) -> Self {
        self.steps.push(Step::Parallel(group));
        self
    }

    /// Names of every transformer, parallel members included, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .flat_map(|step| match step {
                Step::Single(t) => vec![t.name()],
                Step::Parallel(group) => group.iter().map(|t| t.name()).collect(),
            })
            .collect()
    }

    /// Run every step against the context and graph
    ///
    /// A delayed-requeue error is recorded (first one wins) and the chain
    /// continues. Any other error aborts the remaining steps.
    pub async fn run(&self, ctx: &mut C, dag: &mut Dag) -> Result<ChainOutcome> {
        let mut outcome = ChainOutcome::default();
        for step in &self.steps {
            let flow = match step {
                Step::Single(t) => match t.transform(ctx, dag).await {
                    Ok(flow) => flow,
                    Err(e) => {
                        outcome.record(t.name(), e)?;
                        Flow::Continue
                    }
                },
                Step::Parallel(group) => self.run_parallel(group, ctx, dag, &mut outcome).await?,
            };
            if flow == Flow::Stop {
                outcome.stopped_by = Some(step_name(step));
                info!(transformer = step_name(step), "transformer chain stopped early");
                break;
            }
        }
        Ok(outcome)
    }

    async fn run_parallel(
        &self,
        group: &[Box<dyn Transformer<C>>],
        ctx: &C,
        dag: &mut Dag,
        outcome: &mut ChainOutcome,
    ) -> Result<Flow> {
        let runs = group.iter().map(|t| {
            let mut snapshot = ctx.clone();
            let mut sub = Dag::seeded_from(dag);
            async move {
                let result = t.transform(&mut snapshot, &mut sub).await;
                (t.name(), result, sub)
            }
        });
        let results = join_all(runs).await;

        let mut flow = Flow::Continue;
        for (name, result, sub) in results {
            match result {
                Ok(Flow::Stop) => flow = Flow::Stop,
                Ok(Flow::Continue) => {}
                Err(e) => outcome.record(name, e)?,
            }
            dag.merge(&sub)?;
        }
        Ok(flow)
    }
}

fn step_name<C>(step: &Step<C>) -> &'static str {
    match step {
        Step::Single(t) => t.name(),
        Step::Parallel(group) => group.first().map(|t| t.name()).unwrap_or("parallel"),
    }
}
