//! Cluster Custom Resource Definition
//!
//! A Cluster groups components. Its status carries a per-component mirror of
//! each component's status; the component's own status stays authoritative.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ComponentPhase, MemberStatus};

/// Specification for a Cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apps.dbplane.io",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    shortname = "dbc",
    namespaced,
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Names of the components belonging to this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
}

/// Status for a Cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Mirror of each component's status, keyed by component name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ClusterComponentStatus>,
}

/// Reduced view of a component's status as seen by its cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterComponentStatus {
    /// Component phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ComponentPhase>,

    /// Failure messages keyed by "Kind/Name"
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub message: BTreeMap<String, String>,

    /// Whether all expected pods are ready
    #[serde(default)]
    pub pods_ready: bool,

    /// When pods last became ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods_ready_time: Option<DateTime<Utc>>,

    /// Role of each pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_status: Vec<MemberStatus>,
}
