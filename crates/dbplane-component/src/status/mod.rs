//! Component status state machine
//!
//! The status transformer runs last. It gathers pod, workload, config,
//! volume and data-clone signals, computes the next phase with
//! [`compute_phase`], stages a status write only when something changed,
//! and mirrors a reduced copy into the owning cluster's status.
//!
//! Failures still inside their grace period do not count yet; the pass
//! asks to be re-evaluated when the earliest of them expires.

pub mod phase;
pub mod pods;
pub mod signals;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbplane_common::crd::{
    ClusterStatus, ComponentPhase, ComponentStatus, MemberStatus,
};
use dbplane_common::events::{actions, reasons};
use dbplane_common::{Error, ManagedObject, Result, JOB_TYPE_DATA_CLONE, JOB_TYPE_LABEL};
use dbplane_graph::{Action, Dag, Flow, GraphClient, Transformer};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod};
use kube::runtime::events::EventType;
use tracing::{debug, info};

use crate::context::ComponentTransformContext;
use crate::synthesize::SynthesizedComponent;

pub use phase::{compute_phase, PhaseSignals};
use pods::{Check, PodTimeouts};
use signals::JobState;

/// How long to wait before checking on a running data-clone job
pub const DATA_CLONE_REQUEUE: Duration = Duration::from_secs(5);

/// Message key kinds the state machine owns; keys of other kinds survive
const EVALUATED_KINDS: &[&str] = &["Pod", "Job", "PersistentVolumeClaim", "Component"];

/// Observed state one evaluation works from
#[derive(Clone, Debug, Default)]
pub struct StatusInputs {
    /// Pods of the component
    pub pods: Vec<Pod>,
    /// ConfigMaps of the component
    pub config_maps: Vec<ConfigMap>,
    /// PVCs of the component
    pub pvcs: Vec<PersistentVolumeClaim>,
    /// Data-clone jobs of the component
    pub jobs: Vec<Job>,
    /// Live workload
    pub workload: Option<StatefulSet>,
    /// The workload has a create or update staged in this pass
    pub workload_pending: bool,
    /// A ConfigMap has a create or update staged in this pass
    pub config_pending: bool,
    /// The component is being deleted
    pub deleting: bool,
}

/// What an evaluation concluded
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// Inputs to the phase policy
    pub signals: PhaseSignals,
    /// Failure messages keyed by "Kind/Name"
    pub messages: BTreeMap<String, String>,
    /// Per-pod roles
    pub members: Vec<MemberStatus>,
    /// When to look again, and why
    pub requeue: Option<(Duration, String)>,
}

impl Evaluation {
    fn requeue_within(&mut self, after: Duration, reason: String) {
        if self.requeue.as_ref().map_or(true, |(current, _)| after < *current) {
            self.requeue = Some((after, reason));
        }
    }
}

/// Evaluate every signal for a component
pub fn evaluate(
    synth: &SynthesizedComponent,
    inputs: &StatusInputs,
    now: DateTime<Utc>,
    timeouts: &PodTimeouts,
) -> Evaluation {
    let mut eval = Evaluation::default();
    let role_aware = synth.workload_kind.is_role_aware();
    let latest = inputs.workload.as_ref().and_then(signals::update_revision);

    for pod in &inputs.pods {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let mut check = pods::pod_failure(pod, now, timeouts);
        if role_aware {
            if let Some(timeout) = synth.role_probe_timeout {
                check = pods::worst([check, pods::role_probe_check(pod, now, timeout)]);
            }
        }
        match check {
            Check::Failed { message } => {
                eval.signals.has_failure = true;
                eval.messages.insert(format!("Pod/{name}"), message);
            }
            Check::Pending { message, remaining } => {
                debug!(pod = %name, ?remaining, %message, "pod failing inside grace period");
                eval.requeue_within(remaining, format!("pod {name} failing: {message}"));
            }
            Check::Healthy => {}
        }

        if let Some(role) = pods::pod_role(pod) {
            let (access_mode, is_leader) = synth.role_info(role);
            eval.members.push(MemberStatus {
                pod_name: name.clone(),
                role: role.to_string(),
                access_mode,
                is_leader,
            });
        }
    }
    eval.members.sort_by(|a, b| a.pod_name.cmp(&b.pod_name));
    if !role_aware {
        eval.members.clear();
    }

    for job in &inputs.jobs {
        let name = job.metadata.name.clone().unwrap_or_default();
        match signals::job_state(job) {
            JobState::Failed(message) => {
                eval.signals.has_failure = true;
                eval.messages.insert(format!("Job/{name}"), message);
            }
            JobState::Active => {
                eval.requeue_within(DATA_CLONE_REQUEUE, format!("waiting for data clone job {name}"));
            }
            JobState::Idle => {}
        }
    }

    let volumes = signals::volume_expansion(synth, &inputs.pvcs);
    for (name, message) in volumes.failures {
        eval.signals.has_failure = true;
        eval.messages.insert(format!("PersistentVolumeClaim/{name}"), message);
    }

    let leader = synth.leader_role().map(|r| r.name.as_str());
    eval.signals.available = inputs.pods.iter().any(|pod| {
        pods::is_pod_ready(pod)
            && latest.map_or(true, |rev| pods::pod_revision(pod) == Some(rev))
            && (!role_aware
                || match leader {
                    Some(leader) => pods::pod_role(pod) == Some(leader),
                    None => pods::pod_role(pod).is_some(),
                })
    });

    eval.signals.deleting = inputs.deleting;
    eval.signals.zero_replicas = synth.replicas == 0
        && inputs.workload.as_ref().map_or(true, |w| {
            w.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0) == 0
        });
    eval.signals.has_pods = !inputs.pods.is_empty();
    eval.signals.workload_running = !inputs.workload_pending
        && inputs
            .workload
            .as_ref()
            .is_some_and(|w| signals::workload_running(w, synth.replicas));
    eval.signals.config_synced =
        !inputs.config_pending && signals::config_synced(synth, &inputs.config_maps);
    eval.signals.volume_expanding = volumes.in_flight;
    eval
}

/// Replace the keys this machine owns, keep every other key
pub fn merge_messages(
    old: &BTreeMap<String, String>,
    fresh: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = old
        .iter()
        .filter(|(k, _)| {
            let kind = k.split('/').next().unwrap_or_default();
            !EVALUATED_KINDS.contains(&kind)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(fresh);
    merged
}

/// Next status record for a component
pub fn next_status(
    old: &ComponentStatus,
    phase: ComponentPhase,
    eval: &Evaluation,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> ComponentStatus {
    let pods_ready = phase.pods_ready();
    let pods_ready_time = if pods_ready {
        old.pods_ready_time.filter(|_| old.pods_ready).or(Some(now))
    } else {
        None
    };
    ComponentStatus {
        phase: Some(phase),
        message: merge_messages(&old.message, eval.messages.clone()),
        observed_generation: generation.or(old.observed_generation),
        members_status: eval.members.clone(),
        pods_ready,
        pods_ready_time,
    }
}

/// Stage a component status write if it differs; queue a transition event
/// when the phase moved
///
/// Returns whether anything was staged.
pub fn stage_component_status(
    ctx: &mut ComponentTransformContext,
    dag: &mut Dag,
    status: &ComponentStatus,
) -> Result<bool> {
    let old = ctx.comp.status.clone().unwrap_or_default();
    if old == *status {
        return Ok(false);
    }

    let mut updated = ctx.comp_orig.clone();
    updated.set_status(serde_json::to_value(status)?);
    let staged = GraphClient::new()
        .status(dag, ctx.comp_orig.clone(), updated)?
        .is_some();

    if old.phase != status.phase {
        if let Some(next) = status.phase {
            let from = old.phase.map_or_else(|| "<none>".to_string(), |p| p.to_string());
            info!(component = %ctx.comp_orig.name(), %from, to = %next, "component phase transition");
            let type_ = if next.is_degraded() {
                EventType::Warning
            } else {
                EventType::Normal
            };
            let mut note = format!("phase changed from {from} to {next}");
            if next.is_degraded() && !status.message.is_empty() {
                let details: Vec<String> = status
                    .message
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect();
                note.push_str(&format!(" ({})", details.join("; ")));
            }
            ctx.push_event(type_, reasons::COMPONENT_PHASE_TRANSITION, actions::RECONCILE, note);
        }
    }
    Ok(staged)
}

/// Mirror a component status into its cluster's per-component map
///
/// Phase, message and members follow the component. The readiness flag and
/// its timestamp are copied only when the flag itself changed.
pub fn stage_cluster_projection(
    ctx: &ComponentTransformContext,
    dag: &mut Dag,
    status: &ComponentStatus,
) -> Result<bool> {
    let (Some(cluster), Some(cluster_orig)) = (&ctx.cluster, &ctx.cluster_orig) else {
        return Ok(false);
    };
    let mut next: ClusterStatus = cluster.status.clone().unwrap_or_default();
    let entry = next.components.entry(ctx.comp_orig.name().to_string()).or_default();
    let before = entry.clone();

    entry.phase = status.phase;
    entry.message = status.message.clone();
    entry.members_status = status.members_status.clone();
    if entry.pods_ready != status.pods_ready {
        entry.pods_ready = status.pods_ready;
        entry.pods_ready_time = status.pods_ready_time;
    }
    if *entry == before {
        return Ok(false);
    }

    stage_cluster_status(dag, cluster_orig, &next)
}

/// Stage a cluster status write
pub fn stage_cluster_status(
    dag: &mut Dag,
    cluster_orig: &ManagedObject,
    status: &ClusterStatus,
) -> Result<bool> {
    let mut updated = cluster_orig.clone();
    updated.set_status(serde_json::to_value(status)?);
    Ok(GraphClient::new()
        .status(dag, cluster_orig.clone(), updated)?
        .is_some())
}

/// Last transformer: computes and stages the component status
pub struct StatusTransformer;

impl StatusTransformer {
    async fn gather(
        &self,
        ctx: &ComponentTransformContext,
        dag: &Dag,
        synth: &SynthesizedComponent,
    ) -> Result<StatusInputs> {
        let ns = ctx.namespace();
        let selector = synth.selector_labels();
        let mut job_selector = selector.clone();
        job_selector.insert(JOB_TYPE_LABEL.to_string(), JOB_TYPE_DATA_CLONE.to_string());

        let gc = GraphClient::new();
        let workload_pending = ctx.proto_workload.as_ref().is_some_and(|w| {
            let key = w.key();
            gc.is_action(dag, &key, Action::Create) || gc.is_action(dag, &key, Action::Update)
        });
        let config_pending = !gc
            .find_matching(dag, |v| {
                v.object.kind() == "ConfigMap"
                    && matches!(v.action, Action::Create | Action::Update)
            })
            .is_empty();

        Ok(StatusInputs {
            pods: ctx.client.list_typed(ns, &selector).await?,
            config_maps: ctx.client.list_typed(ns, &selector).await?,
            pvcs: ctx.client.list_typed(ns, &selector).await?,
            jobs: ctx.client.list_typed(ns, &job_selector).await?,
            workload: ctx
                .running_workload
                .as_ref()
                .map(ManagedObject::to_typed)
                .transpose()?,
            workload_pending,
            config_pending,
            deleting: ctx.comp_orig.is_deleting(),
        })
    }
}

#[async_trait]
impl Transformer<ComponentTransformContext> for StatusTransformer {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        let synth = ctx.synthesized()?.clone();
        let inputs = self.gather(ctx, dag, &synth).await?;
        let timeouts = PodTimeouts {
            container_failed: ctx.config.pod_container_failed_timeout,
            scheduled_failed: ctx.config.pod_scheduled_failed_timeout,
        };

        let eval = evaluate(&synth, &inputs, ctx.now, &timeouts);
        let old = ctx.comp.status.clone().unwrap_or_default();
        let phase = compute_phase(&eval.signals, old.phase);
        let status = next_status(&old, phase, &eval, ctx.comp_orig.generation(), ctx.now);

        stage_component_status(ctx, dag, &status)?;
        stage_cluster_projection(ctx, dag, &status)?;

        match eval.requeue {
            Some((after, reason)) => Err(Error::delayed_requeue(after, reason)),
            None => Ok(Flow::Continue),
        }
    }
}
