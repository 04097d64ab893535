//! Workload

use async_trait::async_trait;
use dbplane_common::object::api_resource;
use dbplane_common::{Error, ManagedObject, Result};
use dbplane_graph::{Action, Dag, Flow, GraphClient, Transformer};
use k8s_openapi::api::apps::v1::StatefulSet;
use tracing::{debug, info};

use crate::context::ComponentTransformContext;

use super::stage_desired;

/// Stages the StatefulSet after the configs and secrets it mounts
pub struct WorkloadTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for WorkloadTransformer {
    fn name(&self) -> &'static str {
        "workload"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        let synth = ctx.synthesized()?.clone();
        let mut running = ctx
            .client
            .list(&api_resource::<StatefulSet>(), ctx.namespace(), &synth.selector_labels())
            .await?;
        if running.len() > 1 {
            let names: Vec<&str> = running.iter().map(ManagedObject::name).collect();
            return Err(Error::invariant(
                "workload",
                format!(
                    "component {} has {} workloads: {}",
                    synth.name,
                    running.len(),
                    names.join(", ")
                ),
            ));
        }
        let running = running.pop();

        let proto = ManagedObject::from_resource(&ctx.builder.build_workload(&synth)?)?;
        let gc = GraphClient::new();

        let live = match running.clone() {
            Some(live) if live.name() != proto.name() => {
                info!(component = %synth.name, from = %live.name(), to = %proto.name(), "replacing renamed workload");
                gc.delete(dag, live)?;
                None
            }
            other => other,
        };

        if let Some(id) = stage_desired(dag, live, proto.clone())? {
            let prerequisites = gc.find_matching(dag, |v| {
                matches!(v.object.kind(), "ConfigMap" | "Secret")
                    && matches!(v.action, Action::Create | Action::Update)
            });
            debug!(component = %synth.name, prerequisites = prerequisites.len(), "workload staged");
            gc.depends_on(dag, id, &prerequisites)?;
        }

        ctx.running_workload = running;
        ctx.proto_workload = Some(proto);
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::testing::{actions, component, setup, spec};
    use dbplane_common::crd::ConfigTemplate;
    use std::collections::BTreeMap;

    fn live_workload(ctx: &ComponentTransformContext) -> ManagedObject {
        let synth = ctx.synthesized().expect("synthesized");
        ManagedObject::from_resource(&ctx.builder.build_workload(synth).expect("build"))
            .expect("convert")
    }

    #[tokio::test]
    async fn test_creates_workload() {
        let (_store, mut ctx, mut dag) = setup(component(spec()));
        WorkloadTransformer.transform(&mut ctx, &mut dag).await.expect("transform");

        assert!(actions(&dag).contains(&("StatefulSet/orders-mysql".to_string(), Action::Create)));
        assert!(ctx.running_workload.is_none());
        assert_eq!(ctx.proto_workload.as_ref().map(|w| w.name()), Some("orders-mysql"));
    }

    #[tokio::test]
    async fn test_unchanged_workload_stages_nothing() {
        let (store, mut ctx, mut dag) = setup(component(spec()));
        store.insert(live_workload(&ctx));

        WorkloadTransformer.transform(&mut ctx, &mut dag).await.expect("transform");
        assert!(!dag.has_effect());
        assert!(ctx.running_workload.is_some());
    }

    #[tokio::test]
    async fn test_scaling_updates_workload() {
        let (store, mut ctx, mut dag) = setup(component(spec()));
        store.insert(live_workload(&ctx));
        ctx.synthesized.as_mut().expect("synthesized").replicas = 3;

        WorkloadTransformer.transform(&mut ctx, &mut dag).await.expect("transform");
        assert!(actions(&dag).contains(&("StatefulSet/orders-mysql".to_string(), Action::Update)));
    }

    #[tokio::test]
    async fn test_two_live_workloads_is_fatal() {
        let (store, mut ctx, mut dag) = setup(component(spec()));
        store.insert(live_workload(&ctx));
        let mut other = live_workload(&ctx);
        other.obj.metadata.name = Some("orders-mysql-legacy".to_string());
        store.insert(other);

        let err = WorkloadTransformer
            .transform(&mut ctx, &mut dag)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.context(), Some("workload"));
    }

    #[tokio::test]
    async fn test_workload_waits_for_staged_configs() {
        let (_store, mut ctx, mut dag) = setup(component(spec()));
        ctx.synthesized.as_mut().expect("synthesized").configs = vec![ConfigTemplate {
            name: "my-cnf".to_string(),
            data: BTreeMap::from([("my.cnf".to_string(), "[mysqld]\n".to_string())]),
            mount_path: "/etc/mysql/conf.d".to_string(),
        }];
        let synth = ctx.synthesized().expect("synthesized").clone();
        let cm = &ctx.builder.build_config_artifacts(&synth).expect("build")[0];
        let cm_id = GraphClient::new()
            .create(&mut dag, ManagedObject::from_resource(cm).expect("convert"))
            .expect("stage");

        WorkloadTransformer.transform(&mut ctx, &mut dag).await.expect("transform");

        let workload = ctx.proto_workload.as_ref().expect("proto").key();
        let id = dag.find(&workload).expect("workload vertex");
        assert!(dag.dependencies(id).any(|d| d == cm_id));
        dag.validate().expect("valid graph");
    }
}
