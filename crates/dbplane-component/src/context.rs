//! Transform context for component passes

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dbplane_common::crd::{Cluster, Component};
use dbplane_common::events::PendingEvent;
use dbplane_common::{Error, ManagedObject, OperatorConfig, ReadOnlyClient, Result};
use kube::runtime::events::EventType;

use crate::builder::ResourceBuilder;
use crate::synthesize::SynthesizedComponent;

/// Request-scoped state shared by the transformers of one pass
///
/// Cloned for each member of a parallel group. The store is reachable only
/// through the read-only client.
#[derive(Clone)]
pub struct ComponentTransformContext {
    /// Read-only store view
    pub client: ReadOnlyClient,
    /// Operator tunables and feature gates
    pub config: OperatorConfig,
    /// Builder resolved for the component's workload kind
    pub builder: Arc<dyn ResourceBuilder>,
    /// Component as read from the store
    pub comp_orig: ManagedObject,
    /// Typed view of the component
    pub comp: Component,
    /// Owning cluster as read from the store
    pub cluster_orig: Option<ManagedObject>,
    /// Typed view of the owning cluster
    pub cluster: Option<Cluster>,
    /// Resolved component
    pub synthesized: Option<SynthesizedComponent>,
    /// Live workload, if one exists
    pub running_workload: Option<ManagedObject>,
    /// Workload as the builder produced it this pass
    pub proto_workload: Option<ManagedObject>,
    /// Events to publish once the plan has been applied
    pub pending_events: Vec<PendingEvent>,
    /// Validation failure to report after the plan has been applied
    pub user_error: Option<String>,
    /// Reference time for every timeout evaluated in this pass
    pub now: DateTime<Utc>,
}

impl ComponentTransformContext {
    /// Context for a freshly loaded component
    pub fn new(
        client: ReadOnlyClient,
        config: OperatorConfig,
        builder: Arc<dyn ResourceBuilder>,
        comp_orig: ManagedObject,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let comp = comp_orig.to_typed()?;
        Ok(Self {
            client,
            config,
            builder,
            comp_orig,
            comp,
            cluster_orig: None,
            cluster: None,
            synthesized: None,
            running_workload: None,
            proto_workload: None,
            pending_events: Vec::new(),
            user_error: None,
            now,
        })
    }

    /// The synthesized component; fails if the synthesize step has not run
    pub fn synthesized(&self) -> Result<&SynthesizedComponent> {
        self.synthesized.as_ref().ok_or_else(|| {
            Error::invariant(
                "transform context",
                format!("component {} used before it was synthesized", self.comp_orig.key()),
            )
        })
    }

    /// Queue an event about the component
    pub fn push_event(&mut self, type_: EventType, reason: &str, action: &str, note: String) {
        self.pending_events.push(PendingEvent {
            object: self.comp_orig.object_ref(),
            type_,
            reason: reason.to_string(),
            action: action.to_string(),
            note: Some(note),
        });
    }

    /// Namespace of the component
    pub fn namespace(&self) -> &str {
        self.comp_orig.namespace()
    }
}
