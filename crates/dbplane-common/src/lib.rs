//! Common types for dbplane: CRDs, errors, events, configuration and object store access

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod object;
pub mod store;
pub mod telemetry;

pub use config::{FeatureGates, OperatorConfig};
pub use error::Error;
pub use object::{ManagedObject, ObjectKey};
pub use store::{ObjectStore, ReadOnlyClient};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for dbplane custom resources
pub const API_GROUP: &str = "apps.dbplane.io";

/// Label carrying the owning component name on every managed object
pub const COMPONENT_LABEL: &str = "app.dbplane.io/component";

/// Label carrying the owning cluster name on every managed object
pub const CLUSTER_LABEL: &str = "app.dbplane.io/cluster";

/// Label carrying the component definition on the component itself
pub const COMPONENT_DEFINITION_LABEL: &str = "app.dbplane.io/component-definition";

/// Label set on pods by the role probe
pub const ROLE_LABEL: &str = "dbplane.io/role";

/// Label identifying auxiliary jobs by purpose
pub const JOB_TYPE_LABEL: &str = "dbplane.io/job-type";

/// Job type value for scale-out data clone jobs
pub const JOB_TYPE_DATA_CLONE: &str = "data-clone";

/// Annotation carrying the desired configuration revision
pub const CONFIG_REVISION_ANNOTATION: &str = "config.dbplane.io/revision";

/// Annotation carrying the configuration revision applied inside the pods
pub const CONFIG_APPLIED_REVISION_ANNOTATION: &str = "config.dbplane.io/applied-revision";

/// Labels copied onto secondary resources when compatibility labels are enabled
pub const COMPATIBILITY_LABELS: &[(&str, &str)] = &[
    ("app.kubernetes.io/managed-by", "dbplane"),
    ("app.kubernetes.io/part-of", "dbplane"),
];
