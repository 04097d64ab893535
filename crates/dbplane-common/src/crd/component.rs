//! Component Custom Resource Definition
//!
//! A Component is one database engine instance set (e.g. the MySQL servers of
//! a cluster). It is the root object of every reconciliation pass.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{AccessMode, ComponentPhase, MemberStatus, WorkloadKind};

/// A named role a replica can take
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Role name as written in the role label
    pub name: String,
    /// Whether this is the single writer/leader role
    #[serde(default)]
    pub is_leader: bool,
    /// Whether replicas in this role vote in elections
    #[serde(default)]
    pub can_vote: bool,
    /// Traffic accepted by replicas in this role
    #[serde(default)]
    pub access_mode: AccessMode,
}

/// A configuration file set rendered into a ConfigMap
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigTemplate {
    /// Template name, also the ConfigMap name suffix
    pub name: String,
    /// File name to content
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Directory the files are mounted under
    #[serde(default = "default_config_mount")]
    pub mount_path: String,
}

fn default_config_mount() -> String {
    "/etc/dbplane/config".to_string()
}

/// A client-facing service
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Service name suffix
    pub name: String,
    /// Port exposed by the service and the container
    pub port: i32,
    /// Restrict endpoints to pods carrying this role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_selector: Option<String>,
}

/// A per-replica volume
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimTemplate {
    /// Volume name
    pub name: String,
    /// Requested size as a Kubernetes quantity (e.g. "10Gi")
    pub storage: String,
    /// Storage class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// Mount path inside the container
    pub mount_path: String,
}

/// A database account provisioned for the component
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SystemAccount {
    /// Account name
    pub name: String,
    /// Use the password from this existing secret instead of generating one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

/// Role probe settings for role-aware workloads
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleProbe {
    /// How long a ready pod may go without a role label
    pub timeout_seconds: i64,
}

/// Specification for a Component
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apps.dbplane.io",
    version = "v1alpha1",
    kind = "Component",
    plural = "components",
    shortname = "cmp",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.cluster"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Name of the owning Cluster in the same namespace
    pub cluster: String,

    /// Component definition this component instantiates
    pub comp_def: String,

    /// Replica topology
    #[serde(default)]
    pub workload_kind: WorkloadKind,

    /// Container image
    pub image: String,

    /// Desired replica count; zero stops the component
    pub replicas: i32,

    /// Roles replicas can take (role-aware kinds only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<RoleSpec>,

    /// Configuration templates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<ConfigTemplate>,

    /// Client-facing services
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServicePort>,

    /// Per-replica volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,

    /// Accounts provisioned as secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_accounts: Vec<SystemAccount>,

    /// Minimum pods kept available during voluntary disruptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<i32>,

    /// Role probe settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_probe: Option<RoleProbe>,
}

/// Status for a Component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Current lifecycle phase; empty until the first pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ComponentPhase>,

    /// Failure messages keyed by "Kind/Name"
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub message: BTreeMap<String, String>,

    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Role of each pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_status: Vec<MemberStatus>,

    /// Whether all expected pods are ready
    #[serde(default)]
    pub pods_ready: bool,

    /// When pods last became ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods_ready_time: Option<DateTime<Utc>>,
}

impl ComponentStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: ComponentPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }
}

impl Component {
    /// Leader role, if one is declared
    pub fn leader_role(&self) -> Option<&RoleSpec> {
        self.spec.roles.iter().find(|r| r.is_leader)
    }

    /// Current phase, `None` before the first pass
    pub fn phase(&self) -> Option<ComponentPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
apiVersion: apps.dbplane.io/v1alpha1
kind: Component
metadata:
  name: mysql
  namespace: default
spec:
  cluster: orders
  compDef: mysql-8.0
  workloadKind: Replication
  image: mysql:8.0
  replicas: 3
  roles:
    - name: primary
      isLeader: true
      accessMode: ReadWrite
    - name: secondary
      accessMode: Readonly
  volumeClaimTemplates:
    - name: data
      storage: 20Gi
      mountPath: /var/lib/mysql
"#
    }

    #[test]
    fn test_component_parses_from_yaml() {
        let comp: Component = serde_yaml::from_str(sample_yaml()).expect("component should parse");
        assert_eq!(comp.spec.replicas, 3);
        assert_eq!(comp.spec.workload_kind, WorkloadKind::Replication);
        assert_eq!(comp.leader_role().map(|r| r.name.as_str()), Some("primary"));
        assert!(comp.spec.configs.is_empty());
        assert_eq!(comp.phase(), None);
    }

    #[test]
    fn test_status_round_trips_message_keys() {
        let mut status = ComponentStatus::with_phase(ComponentPhase::Failed);
        status
            .message
            .insert("Pod/mysql-0".to_string(), "Unschedulable".to_string());

        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["phase"], "Failed");
        assert_eq!(json["message"]["Pod/mysql-0"], "Unschedulable");
        assert_eq!(json["podsReady"], false);
    }
}
