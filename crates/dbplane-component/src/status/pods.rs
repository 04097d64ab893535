//! Pod health signals
//!
//! Every failure has a grace period. A failure still inside it is reported
//! as [`Check::Pending`] with the time left so the pass can ask to be
//! re-evaluated exactly when it would expire.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dbplane_common::ROLE_LABEL;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodCondition};

/// Message recorded when a ready pod never received a role
pub const ROLE_PROBE_TIMEOUT_MESSAGE: &str =
    "Role probe timeout, check whether the application is available";

/// Label carrying the StatefulSet revision a pod was created from
pub const REVISION_LABEL: &str = "controller-revision-hash";

/// Result of checking one failure signal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Check {
    /// Nothing wrong
    Healthy,
    /// Failing but still inside the grace period
    Pending {
        /// What is failing
        message: String,
        /// Time left before it counts
        remaining: Duration,
    },
    /// Failing past the grace period
    Failed {
        /// What failed
        message: String,
    },
}

impl Check {
    /// Whether the failure counts
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Time left before a pending failure counts
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Pending { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }

    fn against(message: String, since: Option<DateTime<Utc>>, now: DateTime<Utc>, grace: Duration) -> Self {
        let elapsed = since
            .and_then(|t| (now - t).to_std().ok())
            .unwrap_or_default();
        if elapsed >= grace {
            Self::Failed { message }
        } else {
            Self::Pending {
                message,
                remaining: grace - elapsed,
            }
        }
    }
}

/// Grace periods for pod failures
#[derive(Clone, Copy, Debug)]
pub struct PodTimeouts {
    /// For failing init or main containers
    pub container_failed: Duration,
    /// For unschedulable pods
    pub scheduled_failed: Duration,
}

fn condition<'a>(pod: &'a Pod, type_: &str) -> Option<&'a PodCondition> {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| c.iter().find(|c| c.type_ == type_))
}

fn transition_time(c: &PodCondition) -> Option<DateTime<Utc>> {
    c.last_transition_time.as_ref().map(|t| t.0)
}

/// Whether the pod's Ready condition is true
pub fn is_pod_ready(pod: &Pod) -> bool {
    condition(pod, "Ready").is_some_and(|c| c.status == "True")
}

/// Revision the pod was created from
pub fn pod_revision(pod: &Pod) -> Option<&str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(REVISION_LABEL))
        .map(String::as_str)
}

/// Role reported by the role probe
pub fn pod_role(pod: &Pod) -> Option<&str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(ROLE_LABEL))
        .map(String::as_str)
        .filter(|r| !r.is_empty())
}

fn container_message(status: &ContainerStatus) -> Option<String> {
    let state = status.state.as_ref()?;
    if let Some(waiting) = &state.waiting {
        if let Some(msg) = waiting.message.as_ref().filter(|m| !m.is_empty()) {
            return Some(msg.clone());
        }
    }
    if let Some(terminated) = &state.terminated {
        if let Some(msg) = terminated.message.as_ref().filter(|m| !m.is_empty()) {
            return Some(msg.clone());
        }
    }
    None
}

fn containers_check(
    pod: &Pod,
    statuses: Option<&Vec<ContainerStatus>>,
    readiness: &str,
    now: DateTime<Utc>,
    grace: Duration,
) -> Check {
    let Some(message) = statuses
        .into_iter()
        .flatten()
        .find_map(container_message)
    else {
        return Check::Healthy;
    };
    match condition(pod, readiness) {
        Some(c) if c.status == "False" => Check::against(message, transition_time(c), now, grace),
        _ => Check::Healthy,
    }
}

/// Whether the pod has failed, and whether the failure has timed out
///
/// A pod fails when it has been unschedulable past the scheduling grace
/// period, or when an init or main container reports a failure message while
/// the matching readiness condition has been false past the container grace
/// period.
pub fn pod_failure(pod: &Pod, now: DateTime<Utc>, timeouts: &PodTimeouts) -> Check {
    let mut checks = Vec::with_capacity(3);

    if let Some(c) = condition(pod, "PodScheduled") {
        if c.status == "False" && c.reason.as_deref() == Some("Unschedulable") {
            let message = c
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Unschedulable".to_string());
            checks.push(Check::against(message, transition_time(c), now, timeouts.scheduled_failed));
        }
    }

    let status = pod.status.as_ref();
    checks.push(containers_check(
        pod,
        status.and_then(|s| s.init_container_statuses.as_ref()),
        "Initialized",
        now,
        timeouts.container_failed,
    ));
    checks.push(containers_check(
        pod,
        status.and_then(|s| s.container_statuses.as_ref()),
        "ContainersReady",
        now,
        timeouts.container_failed,
    ));

    worst(checks)
}

/// Whether a ready pod has gone too long without a role label
pub fn role_probe_check(pod: &Pod, now: DateTime<Utc>, timeout: Duration) -> Check {
    if pod_role(pod).is_some() {
        return Check::Healthy;
    }
    match condition(pod, "Ready") {
        Some(c) if c.status == "True" => Check::against(
            ROLE_PROBE_TIMEOUT_MESSAGE.to_string(),
            transition_time(c),
            now,
            timeout,
        ),
        _ => Check::Healthy,
    }
}

/// A failure if any check failed, otherwise the pending check that expires first
pub fn worst(checks: impl IntoIterator<Item = Check>) -> Check {
    let mut pending: Option<Check> = None;
    for check in checks {
        match check {
            Check::Failed { .. } => return check,
            Check::Pending { remaining, .. } => {
                if pending
                    .as_ref()
                    .and_then(Check::remaining)
                    .map_or(true, |r| remaining < r)
                {
                    pending = Some(check);
                }
            }
            Check::Healthy => {}
        }
    }
    pending.unwrap_or(Check::Healthy)
}
