//! Custom Resource Definitions for dbplane

mod cluster;
mod component;
mod types;

pub use cluster::{Cluster, ClusterComponentStatus, ClusterSpec, ClusterStatus};
pub use component::{
    Component, ComponentSpec, ComponentStatus, ConfigTemplate, RoleProbe, RoleSpec,
    ServicePort, SystemAccount, VolumeClaimTemplate,
};
pub use types::{AccessMode, ComponentPhase, MemberStatus, WorkloadKind};
