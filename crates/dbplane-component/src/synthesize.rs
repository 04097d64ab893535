//! Synthesized component
//!
//! The fully resolved view of a Component that builders and the status
//! machine work from: spec defaults applied, derived names computed and the
//! spec validated once per pass.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use dbplane_common::crd::{
    AccessMode, Component, ConfigTemplate, RoleSpec, ServicePort, SystemAccount,
    VolumeClaimTemplate, WorkloadKind,
};
use dbplane_common::{Error, Result, CLUSTER_LABEL, COMPONENT_LABEL};
use kube::ResourceExt;

/// A component with every default resolved
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesizedComponent {
    /// Component name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Owning cluster name
    pub cluster: String,
    /// Component definition
    pub comp_def: String,
    /// Replica topology
    pub workload_kind: WorkloadKind,
    /// Container image
    pub image: String,
    /// Desired replicas
    pub replicas: i32,
    /// Declared roles
    pub roles: Vec<RoleSpec>,
    /// Configuration templates
    pub configs: Vec<ConfigTemplate>,
    /// Client services
    pub services: Vec<ServicePort>,
    /// Per-replica volumes
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,
    /// System accounts
    pub system_accounts: Vec<SystemAccount>,
    /// PDB floor
    pub min_available: Option<i32>,
    /// How long a ready pod may lack a role label
    pub role_probe_timeout: Option<Duration>,
}

impl SynthesizedComponent {
    /// Resolve and validate a component
    pub fn from_component(comp: &Component) -> Result<Self> {
        let name = comp.name_any();
        let namespace = comp.namespace().unwrap_or_default();
        let spec = &comp.spec;

        let synth = Self {
            name,
            namespace,
            cluster: spec.cluster.clone(),
            comp_def: spec.comp_def.clone(),
            workload_kind: spec.workload_kind,
            image: spec.image.clone(),
            replicas: spec.replicas,
            roles: spec.roles.clone(),
            configs: spec.configs.clone(),
            services: spec.services.clone(),
            volume_claim_templates: spec.volume_claim_templates.clone(),
            system_accounts: spec.system_accounts.clone(),
            min_available: spec.min_available,
            role_probe_timeout: spec
                .role_probe
                .as_ref()
                .map(|p| Duration::from_secs(p.timeout_seconds.max(0) as u64)),
        };
        synth.validate()?;
        Ok(synth)
    }

    fn validate(&self) -> Result<()> {
        if self.comp_def.is_empty() {
            return Err(Error::validation_for_field(
                &self.name,
                "compDef",
                "must not be empty",
            ));
        }
        if self.replicas < 0 {
            return Err(Error::validation_for_field(
                &self.name,
                "replicas",
                format!("must not be negative, got {}", self.replicas),
            ));
        }

        let mut seen = BTreeSet::new();
        for role in &self.roles {
            if !seen.insert(role.name.as_str()) {
                return Err(Error::validation_for_field(
                    &self.name,
                    "roles",
                    format!("duplicate role '{}'", role.name),
                ));
            }
        }

        let leaders = self.roles.iter().filter(|r| r.is_leader).count();
        if leaders > 1 {
            return Err(Error::validation_for_field(
                &self.name,
                "roles",
                format!("at most one leader role allowed, found {leaders}"),
            ));
        }
        Ok(())
    }

    /// Name of the StatefulSet and prefix of every owned object
    pub fn workload_name(&self) -> String {
        format!("{}-{}", self.cluster, self.name)
    }

    /// Name of the headless service backing pod DNS
    pub fn headless_service_name(&self) -> String {
        format!("{}-headless", self.workload_name())
    }

    /// ConfigMap name for a config template
    pub fn config_map_name(&self, template: &str) -> String {
        format!("{}-{}", self.workload_name(), template)
    }

    /// Client service name
    pub fn service_name(&self, service: &str) -> String {
        format!("{}-{}", self.workload_name(), service)
    }

    /// Secret name for a system account
    pub fn account_secret_name(&self, account: &str) -> String {
        format!("{}-account-{}", self.workload_name(), account)
    }

    /// Pod name for an ordinal
    pub fn pod_name(&self, ordinal: i32) -> String {
        format!("{}-{}", self.workload_name(), ordinal)
    }

    /// PVC name for a volume claim template and ordinal
    pub fn pvc_name(&self, template: &str, ordinal: i32) -> String {
        format!("{}-{}-{}", template, self.workload_name(), ordinal)
    }

    /// Labels every owned object carries and selectors match on
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        selector_labels(&self.name, &self.cluster)
    }

    /// The leader role, if one is declared
    pub fn leader_role(&self) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.is_leader)
    }

    /// Access mode and leadership declared for a role name
    pub fn role_info(&self, role: &str) -> (AccessMode, bool) {
        self.roles
            .iter()
            .find(|r| r.name == role)
            .map(|r| (r.access_mode, r.is_leader))
            .unwrap_or_default()
    }
}

/// Labels identifying the objects owned by a component
pub fn selector_labels(component: &str, cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (COMPONENT_LABEL.to_string(), component.to_string()),
        (CLUSTER_LABEL.to_string(), cluster.to_string()),
    ])
}
