//! Services

use async_trait::async_trait;
use dbplane_common::object::api_resource;
use dbplane_common::{ManagedObject, Result};
use dbplane_graph::{Dag, Flow, Transformer};
use k8s_openapi::api::core::v1::Service;
use tracing::debug;

use crate::context::ComponentTransformContext;

use super::stage_owned_set;

/// Stages the headless service and the client services
pub struct ServiceTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for ServiceTransformer {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        let synth = ctx.synthesized()?;
        let desired = ctx
            .builder
            .build_services(synth)?
            .iter()
            .map(ManagedObject::from_resource)
            .collect::<Result<Vec<_>>>()?;

        let staged = stage_owned_set(ctx, dag, &api_resource::<Service>(), desired).await?;
        debug!(component = %synth.name, staged = staged.len(), "services staged");
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::testing::{actions, component, setup, spec};
    use dbplane_graph::Action;

    #[tokio::test]
    async fn test_creates_headless_and_client_services() {
        let (_store, mut ctx, mut dag) = setup(component(spec()));
        ServiceTransformer.transform(&mut ctx, &mut dag).await.expect("transform");

        let staged = actions(&dag);
        assert!(staged.contains(&("Service/orders-mysql-headless".to_string(), Action::Create)));
        assert!(staged.contains(&("Service/orders-mysql-mysql".to_string(), Action::Create)));
    }

    #[tokio::test]
    async fn test_removed_client_service_is_deleted() {
        let (store, mut ctx, mut dag) = setup(component(spec()));
        let synth = ctx.synthesized().expect("synthesized").clone();
        for svc in ctx.builder.build_services(&synth).expect("build") {
            store.insert(ManagedObject::from_resource(&svc).expect("convert"));
        }

        ctx.synthesized.as_mut().expect("synthesized").services.clear();
        ServiceTransformer.transform(&mut ctx, &mut dag).await.expect("transform");

        assert_eq!(
            actions(&dag)
                .into_iter()
                .filter(|(_, a)| *a != Action::Noop)
                .collect::<Vec<_>>(),
            vec![("Service/orders-mysql-mysql".to_string(), Action::Delete)]
        );
    }
}
