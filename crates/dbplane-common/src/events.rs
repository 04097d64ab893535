//! Kubernetes Event recording for dbplane controllers.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.
//!
//! Transformers do not publish directly. They queue [`PendingEvent`]s on the
//! transform context and the controller publishes them once the plan has been
//! applied, so an aborted pass never announces a transition it did not write.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "ComponentPhaseTransition")
    /// * `action` - What action was taken (e.g. "Reconcile")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// An event staged during plan construction, published after execution.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvent {
    /// Object the event is about
    pub object: ObjectReference,
    /// Normal or Warning
    pub type_: EventType,
    /// Machine-readable reason
    pub reason: String,
    /// Action taken
    pub action: String,
    /// Human-readable message
    pub note: Option<String>,
}

impl PendingEvent {
    /// Publish this event through the given publisher.
    pub async fn publish(&self, publisher: &dyn EventPublisher) {
        publisher
            .publish(
                &self.object,
                self.type_.clone(),
                &self.reason,
                &self.action,
                self.note.clone(),
            )
            .await;
    }
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher for the given controller name.
    ///
    /// The controller name appears as the "reportingComponent" on Events.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Publisher that remembers every event, for asserting on emitted transitions.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: parking_lot::Mutex<Vec<PendingEvent>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingEventPublisher {
    /// Snapshot of everything published so far
    pub fn events(&self) -> Vec<PendingEvent> {
        self.events.lock().clone()
    }

    /// Events published with the given reason
    pub fn with_reason(&self, reason: &str) -> Vec<PendingEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().push(PendingEvent {
            object: resource_ref.clone(),
            type_,
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// Component moved between lifecycle phases
    pub const COMPONENT_PHASE_TRANSITION: &str = "ComponentPhaseTransition";
    /// Component deletion initiated
    pub const DELETION_STARTED: &str = "DeletionStarted";
    /// Spec validation failed
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Reconciliation pass hit an impossible state
    pub const INVARIANT_VIOLATED: &str = "InvariantViolated";
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Deleting component resources
    pub const DELETE: &str = "Delete";
}
