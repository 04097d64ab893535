//! Component reconciler for dbplane
//!
//! One reconciliation pass per Component: the [`ComponentPlanBuilder`] loads
//! the component, runs the transformer chain to stage every change into a
//! graph, and the controller hands the resulting plan to the executor.

#![deny(missing_docs)]

pub mod builder;
pub mod context;
pub mod controller;
pub mod plan_builder;
pub mod status;
pub mod synthesize;
pub mod transformers;

pub use builder::{BuilderRegistry, ResourceBuilder, StandardBuilder};
pub use context::ComponentTransformContext;
pub use controller::{error_policy, reconcile, Context};
pub use plan_builder::{ComponentPlan, ComponentPlanBuilder};
pub use synthesize::SynthesizedComponent;

pub use dbplane_common::{Error, Result};
