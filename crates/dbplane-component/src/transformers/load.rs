//! Cluster loading

use async_trait::async_trait;
use dbplane_common::crd::Cluster;
use dbplane_common::object::api_resource;
use dbplane_common::{Error, Result};
use dbplane_graph::{Dag, Flow, Transformer};
use tracing::debug;

use crate::context::ComponentTransformContext;

/// Loads the cluster that owns the component
///
/// A missing cluster is a timing issue, not a user error: the pass keeps
/// going without a cluster projection and asks to be retried.
pub struct LoadTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for LoadTransformer {
    fn name(&self) -> &'static str {
        "load"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, _dag: &mut Dag) -> Result<Flow> {
        let name = ctx.comp.spec.cluster.clone();
        let Some(cluster_orig) = ctx
            .client
            .get(&api_resource::<Cluster>(), ctx.namespace(), &name)
            .await?
        else {
            debug!(component = %ctx.comp_orig.name(), cluster = %name, "owning cluster not found");
            return Err(Error::delayed_requeue(
                ctx.config.requeue_after_transient,
                format!("cluster {name} not found"),
            ));
        };

        ctx.cluster = Some(cluster_orig.to_typed()?);
        ctx.cluster_orig = Some(cluster_orig);
        Ok(Flow::Continue)
    }
}
