//! Deletion handling
//!
//! Deletion takes two passes. The first records the Deleting phase. The
//! second stages a delete for every owned object, drops the component from
//! its cluster's status map and releases the component's own finalizer.
//! Both end the chain.

use async_trait::async_trait;
use dbplane_common::crd::{Cluster, ComponentPhase, ComponentStatus};
use dbplane_common::events::{actions, reasons};
use dbplane_common::object::api_resource;
use dbplane_common::{ManagedObject, Result};
use dbplane_graph::{is_object_deleting, Action, Dag, Flow, GraphClient, Transformer};
use kube::runtime::events::EventType;
use tracing::info;

use crate::context::ComponentTransformContext;
use crate::status::{stage_cluster_status, stage_component_status};
use crate::synthesize::selector_labels;

use super::owned_resources;

/// Stages cleanup once the component is marked for deletion
pub struct DeletionTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for DeletionTransformer {
    fn name(&self) -> &'static str {
        "deletion"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        if !is_object_deleting(&ctx.comp_orig) {
            return Ok(Flow::Continue);
        }

        let old = ctx.comp.status.clone().unwrap_or_default();
        if old.phase != Some(ComponentPhase::Deleting) {
            let status = ComponentStatus {
                phase: Some(ComponentPhase::Deleting),
                pods_ready: false,
                pods_ready_time: None,
                ..old
            };
            stage_component_status(ctx, dag, &status)?;
            return Ok(Flow::Stop);
        }

        let gc = GraphClient::new();
        let namespace = ctx.namespace().to_string();
        let selector = selector_labels(ctx.comp_orig.name(), &ctx.comp.spec.cluster);

        let mut owned = 0;
        for resource in owned_resources() {
            for obj in ctx.client.list(&resource, &namespace, &selector).await? {
                gc.delete(dag, obj)?;
                owned += 1;
            }
        }

        if let Some(cluster_orig) = ctx
            .client
            .get(&api_resource::<Cluster>(), &namespace, &ctx.comp.spec.cluster)
            .await?
        {
            drop_cluster_entry(dag, &cluster_orig, ctx.comp_orig.name())?;
        }

        gc.root(dag, ctx.comp_orig.clone(), ctx.comp_orig.clone(), Action::Delete)?;

        info!(component = %ctx.comp_orig.name(), owned, "staging component deletion");
        ctx.push_event(
            EventType::Normal,
            reasons::DELETION_STARTED,
            actions::DELETE,
            format!("deleting {owned} owned objects"),
        );
        Ok(Flow::Stop)
    }
}

fn drop_cluster_entry(dag: &mut Dag, cluster_orig: &ManagedObject, component: &str) -> Result<()> {
    let cluster: Cluster = cluster_orig.to_typed()?;
    let mut status = cluster.status.unwrap_or_default();
    if status.components.remove(component).is_none() {
        return Ok(());
    }
    stage_cluster_status(dag, cluster_orig, &status)?;
    Ok(())
}
