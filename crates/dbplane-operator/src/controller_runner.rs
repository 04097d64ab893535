//! Controller runner - builds the component controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dbplane_common::crd::{Cluster, Component};
use dbplane_common::events::KubeEventPublisher;
use dbplane_common::store::KubeObjectStore;
use dbplane_common::{OperatorConfig, COMPONENT_LABEL};
use dbplane_component::{error_policy, reconcile, BuilderRegistry, Context};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Name reported on published events
const CONTROLLER_NAME: &str = "dbplane-component-controller";

/// Build the component controller future
///
/// Changes to any owned kind requeue the owning component. Pods are owned by
/// the workload, so they are mapped back through their component label; a
/// Cluster change requeues every component it lists.
pub fn build_component_controller(
    client: Client,
    config: OperatorConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let store = Arc::new(KubeObjectStore::new(client.clone(), config.field_manager.clone()));
    let events = Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));
    let ctx = Arc::new(Context::new(store, events, config, BuilderRegistry::new()));

    let watcher = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    tracing::info!("- Component controller");

    Box::pin(
        Controller::new(Api::<Component>::all(client.clone()), watcher())
            .owns(Api::<StatefulSet>::all(client.clone()), watcher())
            .owns(Api::<ConfigMap>::all(client.clone()), watcher())
            .owns(Api::<Service>::all(client.clone()), watcher())
            .owns(Api::<Secret>::all(client.clone()), watcher())
            .owns(Api::<PodDisruptionBudget>::all(client.clone()), watcher())
            .watches(Api::<Pod>::all(client.clone()), watcher(), |pod| {
                component_for_pod(&pod)
            })
            .watches(Api::<Cluster>::all(client), watcher(), |cluster| {
                components_for_cluster(&cluster)
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Component")),
    )
}

/// The component a pod belongs to, from its component label
fn component_for_pod(pod: &Pod) -> Option<ObjectRef<Component>> {
    let namespace = pod.metadata.namespace.as_deref()?;
    let name = pod.metadata.labels.as_ref()?.get(COMPONENT_LABEL)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Every component a cluster lists
fn components_for_cluster(cluster: &Cluster) -> Vec<ObjectRef<Component>> {
    let Some(namespace) = cluster.metadata.namespace.as_deref() else {
        return vec![];
    };
    cluster
        .spec
        .components
        .iter()
        .map(|name| ObjectRef::new(name).within(namespace))
        .collect()
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbplane_common::crd::ClusterSpec;
    use dbplane_common::CLUSTER_LABEL;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod(namespace: Option<&str>, labels: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("orders-mysql-0".to_string()),
                namespace: namespace.map(str::to_string),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_maps_to_its_component() {
        let p = pod(Some("db"), &[(COMPONENT_LABEL, "mysql"), (CLUSTER_LABEL, "orders")]);
        assert_eq!(
            component_for_pod(&p),
            Some(ObjectRef::new("mysql").within("db"))
        );
    }

    #[test]
    fn test_unlabelled_pod_maps_to_nothing() {
        assert_eq!(component_for_pod(&pod(Some("db"), &[("app", "other")])), None);
        assert_eq!(component_for_pod(&pod(None, &[(COMPONENT_LABEL, "mysql")])), None);
    }

    #[test]
    fn test_cluster_maps_to_listed_components() {
        let cluster = Cluster {
            metadata: ObjectMeta {
                name: Some("orders".to_string()),
                namespace: Some("db".to_string()),
                ..Default::default()
            },
            spec: ClusterSpec {
                components: vec!["mysql".to_string(), "proxy".to_string()],
            },
            status: None,
        };
        assert_eq!(
            components_for_cluster(&cluster),
            vec![
                ObjectRef::new("mysql").within("db"),
                ObjectRef::new("proxy").within("db"),
            ]
        );
    }
}
