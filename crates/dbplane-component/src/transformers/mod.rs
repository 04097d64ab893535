//! Component transformers
//!
//! [`component_chain`] wires them in the order a pass needs: deletion and
//! metadata first since both can end the pass, then loading and
//! synthesizing the component, then the owned objects (configs, services
//! and accounts in parallel, the workload after them), then ownership, and
//! the status machine last so it sees everything staged before it.

mod account;
mod config;
mod deletion;
mod load;
mod meta;
mod ownership;
mod pdb;
mod service;
mod synthesize;
mod workload;

use dbplane_common::object::api_resource;
use dbplane_common::{ManagedObject, Result};
use dbplane_graph::{Dag, GraphClient, TransformerChain, VertexId};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::ApiResource;

pub use account::AccountTransformer;
pub use config::ConfigTransformer;
pub use deletion::DeletionTransformer;
pub use load::LoadTransformer;
pub use meta::MetaTransformer;
pub use ownership::OwnershipTransformer;
pub use pdb::PdbTransformer;
pub use service::ServiceTransformer;
pub use synthesize::SynthesizeTransformer;
pub use workload::WorkloadTransformer;

use crate::context::ComponentTransformContext;
use crate::status::StatusTransformer;

/// The full chain for one component pass
pub fn component_chain() -> TransformerChain<ComponentTransformContext> {
    TransformerChain::new()
        .then(DeletionTransformer)
        .then(MetaTransformer)
        .then(LoadTransformer)
        .then(SynthesizeTransformer)
        .parallel(vec![
            Box::new(ConfigTransformer),
            Box::new(ServiceTransformer),
            Box::new(AccountTransformer),
        ])
        .then(WorkloadTransformer)
        .then(PdbTransformer)
        .then(OwnershipTransformer)
        .then(StatusTransformer)
}

/// Kinds a component owns, in the order deletion lists them
pub fn owned_resources() -> Vec<ApiResource> {
    vec![
        api_resource::<PodDisruptionBudget>(),
        api_resource::<StatefulSet>(),
        api_resource::<Service>(),
        api_resource::<ConfigMap>(),
        api_resource::<Secret>(),
    ]
}

/// Whether an object is of a kind the component owns
pub fn is_owned_kind(obj: &ManagedObject) -> bool {
    owned_resources()
        .iter()
        .any(|r| r.kind == obj.kind() && r.group == obj.resource.group)
}

/// Stage `desired` as a create, or as an overlay update of `live`
pub(crate) fn stage_desired(
    dag: &mut Dag,
    live: Option<ManagedObject>,
    desired: ManagedObject,
) -> Result<Option<VertexId>> {
    let gc = GraphClient::new();
    match live {
        None => gc.create(dag, desired).map(Some),
        Some(live) => gc.patch(dag, live, &desired),
    }
}

/// Stage deletes for live objects whose names are not in `keep`
pub(crate) fn stage_stale(dag: &mut Dag, live: Vec<ManagedObject>, keep: &[String]) -> Result<()> {
    let gc = GraphClient::new();
    for obj in live {
        if !keep.iter().any(|k| k == obj.name()) {
            gc.delete(dag, obj)?;
        }
    }
    Ok(())
}

/// Converge every object of one kind the component owns onto `desired`
///
/// Objects are matched to live ones by name. Live objects carrying the
/// component's labels that are no longer desired are deleted.
pub(crate) async fn stage_owned_set(
    ctx: &ComponentTransformContext,
    dag: &mut Dag,
    resource: &ApiResource,
    desired: Vec<ManagedObject>,
) -> Result<Vec<VertexId>> {
    let synth = ctx.synthesized()?;
    let namespace = ctx.namespace();
    let live = ctx
        .client
        .list(resource, namespace, &synth.selector_labels())
        .await?;
    let keep: Vec<String> = desired.iter().map(|d| d.name().to_string()).collect();

    let mut staged = Vec::new();
    for obj in desired {
        let current = match live.iter().find(|l| l.name() == obj.name()) {
            Some(l) => Some(l.clone()),
            // labels may have been stripped by hand
            None => ctx.client.get(resource, namespace, obj.name()).await?,
        };
        staged.extend(stage_desired(dag, current, obj)?);
    }
    stage_stale(dag, live, &keep)?;
    Ok(staged)
}
