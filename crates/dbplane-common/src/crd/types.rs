//! Shared status and enum types for the dbplane CRDs

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a component
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ComponentPhase {
    /// First rollout has not completed yet
    Creating,
    /// All replicas are ready on the latest revision with config synced
    Running,
    /// A spec change is rolling out without failures
    Updating,
    /// Something failed but the component is still serving
    Abnormal,
    /// Something failed and the component is not serving
    Failed,
    /// Scaled to zero with pods still terminating
    Stopping,
    /// Scaled to zero with no pods left
    Stopped,
    /// The component is being deleted
    Deleting,
}

impl ComponentPhase {
    /// Phases published as Warning events
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Failed | Self::Abnormal)
    }

    /// Phases in which all expected pods are considered ready
    pub fn pods_ready(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping | Self::Stopped)
    }
}

impl fmt::Display for ComponentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "Creating"),
            Self::Running => write!(f, "Running"),
            Self::Updating => write!(f, "Updating"),
            Self::Abnormal => write!(f, "Abnormal"),
            Self::Failed => write!(f, "Failed"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

/// How the workload's replicas relate to each other
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// Interchangeable replicas without stable identity
    Stateless,
    /// Stable identity and storage, no roles
    #[default]
    Stateful,
    /// Quorum-based replicas with an elected leader
    Consensus,
    /// Primary/secondary replication with a single writer
    Replication,
}

impl WorkloadKind {
    /// Kinds whose pods carry a role label set by the role probe
    pub fn is_role_aware(&self) -> bool {
        matches!(self, Self::Consensus | Self::Replication)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stateless => write!(f, "Stateless"),
            Self::Stateful => write!(f, "Stateful"),
            Self::Consensus => write!(f, "Consensus"),
            Self::Replication => write!(f, "Replication"),
        }
    }
}

/// Traffic a role accepts
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// No client traffic
    #[default]
    None,
    /// Reads only
    Readonly,
    /// Reads and writes
    ReadWrite,
}

/// One pod and the role the probe reported for it
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    /// Pod name
    pub pod_name: String,
    /// Role name from the role label
    pub role: String,
    /// Access mode declared for the role
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Whether the role is the leader role
    #[serde(default)]
    pub is_leader: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_phases() {
        assert!(ComponentPhase::Failed.is_degraded());
        assert!(ComponentPhase::Abnormal.is_degraded());
        assert!(!ComponentPhase::Updating.is_degraded());
    }

    #[test]
    fn test_pods_ready_phases() {
        assert!(ComponentPhase::Running.pods_ready());
        assert!(ComponentPhase::Stopped.pods_ready());
        assert!(!ComponentPhase::Creating.pods_ready());
        assert!(!ComponentPhase::Failed.pods_ready());
    }

    #[test]
    fn test_role_aware_kinds() {
        assert!(WorkloadKind::Consensus.is_role_aware());
        assert!(WorkloadKind::Replication.is_role_aware());
        assert!(!WorkloadKind::Stateful.is_role_aware());
        assert!(!WorkloadKind::Stateless.is_role_aware());
    }

    #[test]
    fn test_phase_serializes_as_pascal_case() {
        let json = serde_json::to_string(&ComponentPhase::Stopping).expect("serialize");
        assert_eq!(json, "\"Stopping\"");
        assert_eq!(ComponentPhase::Stopping.to_string(), "Stopping");
    }
}
