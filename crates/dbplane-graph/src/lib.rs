//! Mutation graph for dbplane reconcilers
//!
//! A reconciliation pass never writes while it is deciding what to write.
//! Transformers stage intended changes as vertices of a [`Dag`] through the
//! [`GraphClient`]; the finished graph becomes a [`Plan`] which the
//! [`PlanExecutor`] applies to the object store, prerequisites first.

#![deny(missing_docs)]

pub mod client;
pub mod dag;
pub mod plan;
pub mod transformer;
pub mod vertex;

pub use client::{is_object_deleting, is_object_status_updating, is_object_updating, GraphClient};
pub use dag::{Dag, VertexId};
pub use plan::{ExecutionSummary, Plan, PlanExecutor};
pub use transformer::{ChainOutcome, Flow, Transformer, TransformerChain};
pub use vertex::{Action, ObjectVertex};

pub use dbplane_common::{Error, Result};
