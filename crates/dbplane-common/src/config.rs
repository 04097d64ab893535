//! Operator configuration
//!
//! Every tunable the reconciliation core reads is carried here and threaded
//! into each pass through the transform context. Nothing reads process-wide
//! state at reconcile time.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Default finalizer placed on components and the objects they own
pub const DEFAULT_FINALIZER: &str = "component.dbplane.io/finalizer";

/// Default field manager for server-side writes
pub const DEFAULT_FIELD_MANAGER: &str = "dbplane-controller";

/// Feature toggles resolved once at startup
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureGates {
    /// Copy the compatibility label set onto every secondary resource
    pub compatibility_labels: bool,
}

/// Configuration for the component controller
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Deadline for a single reconciliation pass
    #[serde(with = "secs")]
    pub pass_timeout: Duration,
    /// Requeue interval after a successful pass
    #[serde(with = "secs")]
    pub requeue_after_success: Duration,
    /// Requeue interval after a transient failure
    #[serde(with = "secs")]
    pub requeue_after_transient: Duration,
    /// Requeue interval after a permanent user error
    #[serde(with = "secs")]
    pub requeue_after_permanent: Duration,
    /// Grace period before a failing container marks its pod as failed
    #[serde(with = "secs")]
    pub pod_container_failed_timeout: Duration,
    /// Grace period before an unschedulable pod is considered failed
    #[serde(with = "secs")]
    pub pod_scheduled_failed_timeout: Duration,
    /// Finalizer token placed on the component and its owned objects
    pub finalizer: String,
    /// Field manager name used for writes
    pub field_manager: String,
    /// Feature toggles
    pub features: FeatureGates,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pass_timeout: Duration::from_secs(30),
            requeue_after_success: Duration::from_secs(300),
            requeue_after_transient: Duration::from_secs(5),
            requeue_after_permanent: Duration::from_secs(300),
            pod_container_failed_timeout: Duration::from_secs(10),
            pod_scheduled_failed_timeout: Duration::from_secs(30),
            finalizer: DEFAULT_FINALIZER.to_string(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            features: FeatureGates::default(),
        }
    }
}

impl OperatorConfig {
    /// Parse a configuration document; absent fields keep their defaults
    pub fn from_yaml(doc: &str) -> Result<Self> {
        serde_yaml::from_str(doc)
            .map_err(|e| Error::serialization_for_kind("OperatorConfig", e.to_string()))
    }

    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let doc = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context("config", format!("reading {}: {e}", path.display()))
        })?;
        Self::from_yaml(&doc)
    }

    /// Reject settings no pass could run under
    pub fn validate(&self) -> Result<()> {
        if self.pass_timeout.is_zero() {
            return Err(Error::validation_for_field(
                "operator",
                "passTimeout",
                "must be greater than zero",
            ));
        }
        if self.finalizer.is_empty() {
            return Err(Error::validation_for_field(
                "operator",
                "finalizer",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
