//! Workload, config, volume and job signals

use dbplane_common::{CONFIG_APPLIED_REVISION_ANNOTATION, CONFIG_REVISION_ANNOTATION};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim};

use crate::synthesize::SynthesizedComponent;

/// PVC conditions that mean a resize failed
const RESIZE_ERRORS: &[&str] = &["ControllerResizeError", "NodeResizeError"];

/// Whether the StatefulSet has rolled out its latest revision with every
/// replica ready
pub fn workload_running(sts: &StatefulSet, replicas: i32) -> bool {
    let Some(status) = &sts.status else {
        return false;
    };
    let observed = match (sts.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        (None, _) => true,
        (Some(_), None) => false,
    };
    let same_revision = match (&status.current_revision, &status.update_revision) {
        (Some(current), Some(update)) => current == update,
        (_, None) => true,
        (None, Some(_)) => false,
    };
    observed
        && same_revision
        && status.replicas == replicas
        && status.ready_replicas.unwrap_or(0) == replicas
        && status.updated_replicas.unwrap_or(0) == replicas
}

/// Revision new pods are created from
pub fn update_revision(sts: &StatefulSet) -> Option<&str> {
    sts.status.as_ref().and_then(|s| s.update_revision.as_deref())
}

/// Whether every config template has been applied at its current revision
pub fn config_synced(synth: &SynthesizedComponent, config_maps: &[ConfigMap]) -> bool {
    synth.configs.iter().all(|tpl| {
        let name = synth.config_map_name(&tpl.name);
        config_maps
            .iter()
            .find(|cm| cm.metadata.name.as_deref() == Some(name.as_str()))
            .and_then(|cm| cm.metadata.annotations.as_ref())
            .is_some_and(|a| {
                let revision = a.get(CONFIG_REVISION_ANNOTATION);
                revision.is_some() && revision == a.get(CONFIG_APPLIED_REVISION_ANNOTATION)
            })
    })
}

/// Volume expansion progress across the component's PVCs
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VolumeExpansion {
    /// Some PVC's capacity is still below its request
    pub in_flight: bool,
    /// PVC name and message for every failed resize
    pub failures: Vec<(String, String)>,
}

/// Inspect the PVCs the component's volume claim templates produce
pub fn volume_expansion(synth: &SynthesizedComponent, pvcs: &[PersistentVolumeClaim]) -> VolumeExpansion {
    let expected: Vec<String> = synth
        .volume_claim_templates
        .iter()
        .flat_map(|vct| (0..synth.replicas).map(move |i| synth.pvc_name(&vct.name, i)))
        .collect();

    let mut out = VolumeExpansion::default();
    for pvc in pvcs {
        let Some(name) = pvc.metadata.name.as_deref() else {
            continue;
        };
        if !expected.iter().any(|e| e == name) {
            continue;
        }

        let requested = pvc
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .and_then(|q| parse_quantity(&q.0));
        let capacity = pvc
            .status
            .as_ref()
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get("storage"))
            .and_then(|q| parse_quantity(&q.0));
        if let (Some(requested), Some(capacity)) = (requested, capacity) {
            if capacity < requested {
                out.in_flight = true;
            }
        }

        let resize_error = pvc
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|c| {
                c.iter()
                    .find(|c| RESIZE_ERRORS.contains(&c.type_.as_str()) && c.status == "True")
            });
        if let Some(c) = resize_error {
            let message = c
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| c.type_.clone());
            out.failures.push((name.to_string(), message));
        }
    }
    out
}

/// Where a data-clone job stands
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Still running
    Active,
    /// Gave up
    Failed(String),
    /// Finished successfully or not started
    Idle,
}

/// State of a data-clone job
pub fn job_state(job: &Job) -> JobState {
    let Some(status) = &job.status else {
        return JobState::Idle;
    };
    if let Some(c) = status
        .conditions
        .as_ref()
        .and_then(|c| c.iter().find(|c| c.type_ == "Failed" && c.status == "True"))
    {
        return JobState::Failed(
            c.message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "data clone job failed".to_string()),
        );
    }
    if status.active.unwrap_or(0) > 0 {
        return JobState::Active;
    }
    if status.failed.unwrap_or(0) > 0 && status.succeeded.unwrap_or(0) == 0 {
        return JobState::Failed("data clone job failed".to_string());
    }
    JobState::Idle
}

/// Parse a Kubernetes quantity into base units
///
/// Accepts binary suffixes (Ki..Ei), decimal suffixes (k..E), milli units and
/// bare numbers. Exponent notation is not supported.
pub fn parse_quantity(qty: &str) -> Option<f64> {
    let qty = qty.trim();
    const BINARY: &[(&str, i32)] = &[("Ki", 1), ("Mi", 2), ("Gi", 3), ("Ti", 4), ("Pi", 5), ("Ei", 6)];
    const DECIMAL: &[(&str, i32)] = &[("k", 1), ("M", 2), ("G", 3), ("T", 4), ("P", 5), ("E", 6)];

    for (suffix, power) in BINARY {
        if let Some(num) = qty.strip_suffix(suffix) {
            return num.parse::<f64>().ok().map(|n| n * 1024f64.powi(*power));
        }
    }
    for (suffix, power) in DECIMAL {
        if let Some(num) = qty.strip_suffix(suffix) {
            return num.parse::<f64>().ok().map(|n| n * 1000f64.powi(*power));
        }
    }
    if let Some(num) = qty.strip_suffix('m') {
        return num.parse::<f64>().ok().map(|n| n / 1000.0);
    }
    qty.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbplane_common::crd::{VolumeClaimTemplate, WorkloadKind};
    use k8s_openapi::api::apps::v1::StatefulSetStatus;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaimCondition, PersistentVolumeClaimSpec, PersistentVolumeClaimStatus,
        VolumeResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn synth() -> SynthesizedComponent {
        SynthesizedComponent {
            name: "mysql".to_string(),
            namespace: "db".to_string(),
            cluster: "orders".to_string(),
            comp_def: "mysql-8.0".to_string(),
            workload_kind: WorkloadKind::Stateful,
            image: "mysql:8.0".to_string(),
            replicas: 2,
            roles: vec![],
            configs: vec![],
            services: vec![],
            volume_claim_templates: vec![VolumeClaimTemplate {
                name: "data".to_string(),
                storage: "20Gi".to_string(),
                storage_class_name: None,
                mount_path: "/data".to_string(),
            }],
            system_accounts: vec![],
            min_available: None,
            role_probe_timeout: None,
        }
    }

    fn sts(generation: i64, status: StatefulSetStatus) -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                generation: Some(generation),
                ..Default::default()
            },
            status: Some(status),
            ..Default::default()
        }
    }

    fn pvc(name: &str, request: &str, capacity: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(request.to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: Some(PersistentVolumeClaimStatus {
                capacity: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(capacity.to_string()),
                )])),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_workload_running_requires_full_rollout() {
        let done = StatefulSetStatus {
            observed_generation: Some(2),
            replicas: 3,
            ready_replicas: Some(3),
            updated_replicas: Some(3),
            current_revision: Some("r2".to_string()),
            update_revision: Some("r2".to_string()),
            ..Default::default()
        };
        assert!(workload_running(&sts(2, done.clone()), 3));
        assert!(!workload_running(&sts(3, done.clone()), 3));
        assert!(!workload_running(&sts(2, done.clone()), 4));

        let rolling = StatefulSetStatus {
            current_revision: Some("r1".to_string()),
            ..done
        };
        assert!(!workload_running(&sts(2, rolling), 3));
        assert!(!workload_running(&StatefulSet::default(), 0));
    }

    #[test]
    fn test_config_synced_compares_revisions() {
        let mut s = synth();
        s.configs = vec![dbplane_common::crd::ConfigTemplate {
            name: "my-cnf".to_string(),
            data: BTreeMap::new(),
            mount_path: "/etc".to_string(),
        }];
        let cm = |applied: &str| ConfigMap {
            metadata: ObjectMeta {
                name: Some("orders-mysql-my-cnf".to_string()),
                annotations: Some(BTreeMap::from([
                    (CONFIG_REVISION_ANNOTATION.to_string(), "abc".to_string()),
                    (CONFIG_APPLIED_REVISION_ANNOTATION.to_string(), applied.to_string()),
                ])),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config_synced(&s, &[cm("abc")]));
        assert!(!config_synced(&s, &[cm("old")]));
        assert!(!config_synced(&s, &[]));
        assert!(config_synced(&synth(), &[]));
    }

    #[test]
    fn test_volume_expansion_in_flight_and_failed() {
        let s = synth();
        let growing = pvc("data-orders-mysql-0", "30Gi", "20Gi");
        let done = pvc("data-orders-mysql-1", "30Gi", "30Gi");
        let unrelated = pvc("scratch", "30Gi", "1Gi");
        let state = volume_expansion(&s, &[done.clone(), unrelated]);
        assert!(!state.in_flight);
        let state = volume_expansion(&s, &[growing, done.clone()]);
        assert!(state.in_flight);

        let mut broken = done;
        if let Some(status) = broken.status.as_mut() {
            status.conditions = Some(vec![PersistentVolumeClaimCondition {
                type_: "ControllerResizeError".to_string(),
                status: "True".to_string(),
                message: Some("quota exceeded".to_string()),
                ..Default::default()
            }]);
        }
        let state = volume_expansion(&s, &[broken]);
        assert_eq!(
            state.failures,
            vec![("data-orders-mysql-1".to_string(), "quota exceeded".to_string())]
        );
    }

    #[test]
    fn test_job_state() {
        let job = |status: JobStatus| Job {
            status: Some(status),
            ..Default::default()
        };
        assert_eq!(
            job_state(&job(JobStatus {
                active: Some(1),
                ..Default::default()
            })),
            JobState::Active
        );
        assert_eq!(
            job_state(&job(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: "Failed".to_string(),
                    status: "True".to_string(),
                    message: Some("BackoffLimitExceeded".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            })),
            JobState::Failed("BackoffLimitExceeded".to_string())
        );
        assert_eq!(
            job_state(&job(JobStatus {
                succeeded: Some(1),
                ..Default::default()
            })),
            JobState::Idle
        );
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("1Ki"), Some(1024.0));
        assert_eq!(parse_quantity("2Gi"), Some(2.0 * 1024f64.powi(3)));
        assert_eq!(parse_quantity("1.5G"), Some(1.5e9));
        assert_eq!(parse_quantity("500m"), Some(0.5));
        assert_eq!(parse_quantity("42"), Some(42.0));
        assert_eq!(parse_quantity("lots"), None);
        assert!(parse_quantity("20Gi") < parse_quantity("30Gi"));
    }
}
