//! Configuration artifacts

use async_trait::async_trait;
use dbplane_common::object::api_resource;
use dbplane_common::{ManagedObject, Result};
use dbplane_graph::{Dag, Flow, Transformer};
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::debug;

use crate::context::ComponentTransformContext;

use super::stage_owned_set;

/// Stages one ConfigMap per config template
pub struct ConfigTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for ConfigTransformer {
    fn name(&self) -> &'static str {
        "config"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        let synth = ctx.synthesized()?;
        let desired = ctx
            .builder
            .build_config_artifacts(synth)?
            .iter()
            .map(ManagedObject::from_resource)
            .collect::<Result<Vec<_>>>()?;

        let staged = stage_owned_set(ctx, dag, &api_resource::<ConfigMap>(), desired).await?;
        debug!(component = %synth.name, staged = staged.len(), "config artifacts staged");
        Ok(Flow::Continue)
    }
}
