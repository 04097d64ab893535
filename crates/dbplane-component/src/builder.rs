//! Resource builders
//!
//! A [`ResourceBuilder`] turns a [`SynthesizedComponent`] into the Kubernetes
//! objects the component owns. The reconciliation core stages whatever a
//! builder returns and never looks inside; which builder a pass uses is
//! resolved once from the component's [`WorkloadKind`] through a
//! [`BuilderRegistry`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dbplane_common::crd::{SystemAccount, WorkloadKind};
use dbplane_common::{Error, Result, CONFIG_REVISION_ANNOTATION, ROLE_LABEL};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::synthesize::SynthesizedComponent;

/// Key holding the password in account secrets
pub const PASSWORD_KEY: &str = "password";

/// Key holding the user name in account secrets
pub const USERNAME_KEY: &str = "username";

/// Name of the database container
pub const MAIN_CONTAINER: &str = "main";

/// Builds the objects a component owns
#[cfg_attr(test, automock)]
pub trait ResourceBuilder: Send + Sync {
    /// The StatefulSet running the replicas
    fn build_workload(&self, synth: &SynthesizedComponent) -> Result<StatefulSet>;

    /// Headless service followed by client services
    fn build_services(&self, synth: &SynthesizedComponent) -> Result<Vec<Service>>;

    /// One ConfigMap per config template, annotated with its revision
    fn build_config_artifacts(&self, synth: &SynthesizedComponent) -> Result<Vec<ConfigMap>>;

    /// Secret holding one system account's credentials
    fn build_account_secret(
        &self,
        synth: &SynthesizedComponent,
        account: &SystemAccount,
        password: &str,
    ) -> Result<Secret>;

    /// Disruption budget, `None` when the component does not ask for one
    fn build_pdb(&self, synth: &SynthesizedComponent) -> Result<Option<PodDisruptionBudget>>;
}

/// Resolves the builder for a workload kind
///
/// Kinds without an explicit registration get a [`StandardBuilder`].
#[derive(Clone, Default)]
pub struct BuilderRegistry {
    builders: HashMap<WorkloadKind, Arc<dyn ResourceBuilder>>,
}

impl BuilderRegistry {
    /// Registry using the standard builder for every kind
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `builder` for `kind`
    pub fn with(mut self, kind: WorkloadKind, builder: Arc<dyn ResourceBuilder>) -> Self {
        self.builders.insert(kind, builder);
        self
    }

    /// Builder for a kind
    pub fn resolve(&self, kind: WorkloadKind) -> Arc<dyn ResourceBuilder> {
        self.builders
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(StandardBuilder::new(kind)))
    }
}

/// Builder shared by all engines; the workload kind picks the variant details
#[derive(Clone, Copy, Debug)]
pub struct StandardBuilder {
    kind: WorkloadKind,
}

impl StandardBuilder {
    /// Builder for one workload kind
    pub fn new(kind: WorkloadKind) -> Self {
        Self { kind }
    }

    fn pod_management_policy(&self) -> &'static str {
        match self.kind {
            WorkloadKind::Stateless | WorkloadKind::Consensus => "Parallel",
            WorkloadKind::Stateful | WorkloadKind::Replication => "OrderedReady",
        }
    }

    fn metadata(synth: &SynthesizedComponent, name: String) -> Value {
        json!({
            "name": name,
            "namespace": synth.namespace,
            "labels": synth.selector_labels(),
        })
    }

    fn container_ports(synth: &SynthesizedComponent) -> Vec<Value> {
        let mut ports: BTreeMap<i32, &str> = BTreeMap::new();
        for svc in &synth.services {
            ports.entry(svc.port).or_insert(&svc.name);
        }
        ports
            .into_iter()
            .map(|(port, name)| json!({ "name": name, "containerPort": port, "protocol": "TCP" }))
            .collect()
    }

    fn service_port(name: &str, port: i32) -> Value {
        json!({ "name": name, "port": port, "targetPort": port, "protocol": "TCP" })
    }
}

impl ResourceBuilder for StandardBuilder {
    fn build_workload(&self, synth: &SynthesizedComponent) -> Result<StatefulSet> {
        let labels = synth.selector_labels();

        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        for tpl in &synth.configs {
            let volume = format!("config-{}", tpl.name);
            volumes.push(json!({
                "name": volume,
                "configMap": { "name": synth.config_map_name(&tpl.name) },
            }));
            mounts.push(json!({ "name": volume, "mountPath": tpl.mount_path }));
        }
        for vct in &synth.volume_claim_templates {
            mounts.push(json!({ "name": vct.name, "mountPath": vct.mount_path }));
        }

        let env: Vec<Value> = synth
            .system_accounts
            .iter()
            .map(|account| {
                json!({
                    "name": account_env_name(&account.name),
                    "valueFrom": {
                        "secretKeyRef": {
                            "name": synth.account_secret_name(&account.name),
                            "key": PASSWORD_KEY,
                        }
                    }
                })
            })
            .collect();

        let claims: Vec<Value> = synth
            .volume_claim_templates
            .iter()
            .map(|vct| {
                let mut spec = json!({
                    "accessModes": ["ReadWriteOnce"],
                    "resources": { "requests": { "storage": vct.storage } },
                });
                if let Some(class) = &vct.storage_class_name {
                    spec["storageClassName"] = json!(class);
                }
                json!({
                    "metadata": { "name": vct.name, "labels": labels },
                    "spec": spec,
                })
            })
            .collect();

        let mut container = json!({
            "name": MAIN_CONTAINER,
            "image": synth.image,
        });
        let ports = Self::container_ports(synth);
        if !ports.is_empty() {
            container["ports"] = json!(ports);
        }
        if !env.is_empty() {
            container["env"] = json!(env);
        }
        if !mounts.is_empty() {
            container["volumeMounts"] = json!(mounts);
        }

        let mut pod_spec = json!({ "containers": [container] });
        if !volumes.is_empty() {
            pod_spec["volumes"] = json!(volumes);
        }

        let mut spec = json!({
            "replicas": synth.replicas,
            "serviceName": synth.headless_service_name(),
            "podManagementPolicy": self.pod_management_policy(),
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": pod_spec,
            },
        });
        if !claims.is_empty() {
            spec["volumeClaimTemplates"] = json!(claims);
        }

        from_json(
            "StatefulSet",
            json!({
                "apiVersion": "apps/v1",
                "kind": "StatefulSet",
                "metadata": Self::metadata(synth, synth.workload_name()),
                "spec": spec,
            }),
        )
    }

    fn build_services(&self, synth: &SynthesizedComponent) -> Result<Vec<Service>> {
        let labels = synth.selector_labels();
        let all_ports: Vec<Value> = synth
            .services
            .iter()
            .map(|s| Self::service_port(&s.name, s.port))
            .collect();

        let mut headless_spec = json!({
            "clusterIP": "None",
            "publishNotReadyAddresses": true,
            "selector": labels,
        });
        if !all_ports.is_empty() {
            headless_spec["ports"] = json!(all_ports);
        }
        let mut services = vec![from_json(
            "Service",
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": Self::metadata(synth, synth.headless_service_name()),
                "spec": headless_spec,
            }),
        )?];

        for svc in &synth.services {
            let mut selector = labels.clone();
            if let Some(role) = svc.role_selector.as_ref().filter(|_| self.kind.is_role_aware()) {
                selector.insert(ROLE_LABEL.to_string(), role.clone());
            }
            services.push(from_json(
                "Service",
                json!({
                    "apiVersion": "v1",
                    "kind": "Service",
                    "metadata": Self::metadata(synth, synth.service_name(&svc.name)),
                    "spec": {
                        "selector": selector,
                        "ports": [Self::service_port(&svc.name, svc.port)],
                    },
                }),
            )?);
        }
        Ok(services)
    }

    fn build_config_artifacts(&self, synth: &SynthesizedComponent) -> Result<Vec<ConfigMap>> {
        synth
            .configs
            .iter()
            .map(|tpl| {
                let mut metadata = Self::metadata(synth, synth.config_map_name(&tpl.name));
                metadata["annotations"] = json!(BTreeMap::from([(
                    CONFIG_REVISION_ANNOTATION,
                    config_revision(&tpl.data)
                )]));
                from_json(
                    "ConfigMap",
                    json!({
                        "apiVersion": "v1",
                        "kind": "ConfigMap",
                        "metadata": metadata,
                        "data": tpl.data,
                    }),
                )
            })
            .collect()
    }

    fn build_account_secret(
        &self,
        synth: &SynthesizedComponent,
        account: &SystemAccount,
        password: &str,
    ) -> Result<Secret> {
        Ok(Secret {
            metadata: serde_json::from_value(Self::metadata(
                synth,
                synth.account_secret_name(&account.name),
            ))?,
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([
                (
                    USERNAME_KEY.to_string(),
                    k8s_openapi::ByteString(account.name.clone().into_bytes()),
                ),
                (
                    PASSWORD_KEY.to_string(),
                    k8s_openapi::ByteString(password.as_bytes().to_vec()),
                ),
            ])),
            ..Default::default()
        })
    }

    fn build_pdb(&self, synth: &SynthesizedComponent) -> Result<Option<PodDisruptionBudget>> {
        let Some(min_available) = synth.min_available else {
            return Ok(None);
        };
        from_json(
            "PodDisruptionBudget",
            json!({
                "apiVersion": "policy/v1",
                "kind": "PodDisruptionBudget",
                "metadata": Self::metadata(synth, synth.workload_name()),
                "spec": {
                    "minAvailable": min_available,
                    "selector": { "matchLabels": synth.selector_labels() },
                },
            }),
        )
        .map(Some)
    }
}

/// Content revision of a config template: the first 16 hex digits of the
/// SHA-256 over its sorted entries
pub fn config_revision(data: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (k, v) in data {
        hasher.update(k.as_bytes());
        hasher.update([0u8]);
        hasher.update(v.as_bytes());
        hasher.update([0u8]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Environment variable carrying an account's password
pub fn account_env_name(account: &str) -> String {
    format!(
        "DBPLANE_ACCOUNT_{}_PASSWORD",
        account.to_uppercase().replace(['-', '.'], "_")
    )
}

fn from_json<K: DeserializeOwned>(kind: &str, value: Value) -> Result<K> {
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}
