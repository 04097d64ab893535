//! Pod disruption budget

use async_trait::async_trait;
use dbplane_common::object::api_resource;
use dbplane_common::{ManagedObject, Result};
use dbplane_graph::{Dag, Flow, GraphClient, Transformer};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;

use crate::context::ComponentTransformContext;

use super::stage_desired;

/// Keeps a PDB in place while the component asks for a floor, removes it otherwise
pub struct PdbTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for PdbTransformer {
    fn name(&self) -> &'static str {
        "pdb"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        let synth = ctx.synthesized()?;
        let live = ctx
            .client
            .get(
                &api_resource::<PodDisruptionBudget>(),
                ctx.namespace(),
                &synth.workload_name(),
            )
            .await?;

        match (ctx.builder.build_pdb(synth)?, live) {
            (Some(pdb), live) => {
                stage_desired(dag, live, ManagedObject::from_resource(&pdb)?)?;
            }
            (None, Some(live)) => {
                GraphClient::new().delete(dag, live)?;
            }
            (None, None) => {}
        }
        Ok(Flow::Continue)
    }
}
