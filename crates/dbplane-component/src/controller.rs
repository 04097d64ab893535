//! Component controller
//!
//! `reconcile` runs one pass: build the plan, execute it, publish the
//! events the transformers queued, and pick the next requeue. Each pass is
//! bounded by the configured deadline; a pass that runs over is abandoned
//! with whatever it already wrote and retried.

use std::sync::Arc;
use std::time::Duration;

use dbplane_common::crd::Component;
use dbplane_common::events::{actions, reasons, EventPublisher, NoopEventPublisher};
use dbplane_common::{Error, ObjectStore, OperatorConfig, Result};
use dbplane_graph::PlanExecutor;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use crate::builder::BuilderRegistry;
use crate::plan_builder::ComponentPlanBuilder;

/// Shared state for the component controller
pub struct Context {
    /// Object store the passes read from and write to
    pub store: Arc<dyn ObjectStore>,
    /// Where queued events go after a plan is applied
    pub events: Arc<dyn EventPublisher>,
    /// Operator tunables
    pub config: OperatorConfig,
    /// Builders per workload kind
    pub builders: BuilderRegistry,
}

impl Context {
    /// Create a controller context
    pub fn new(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
        config: OperatorConfig,
        builders: BuilderRegistry,
    ) -> Self {
        Self {
            store,
            events,
            config,
            builders,
        }
    }

    /// Context with default configuration and events dropped
    pub fn for_testing(store: Arc<dyn ObjectStore>) -> Self {
        Self::new(
            store,
            Arc::new(NoopEventPublisher),
            OperatorConfig::default(),
            BuilderRegistry::new(),
        )
    }
}

// =============================================================================
// Component reconciliation
// =============================================================================

/// Reconcile a Component
///
/// Returns the requeue the pass asked for, or the success interval. Errors
/// are classified by [`error_policy`].
#[instrument(skip(component, ctx), fields(component = %component.name_any()))]
pub async fn reconcile(component: Arc<Component>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = component.namespace().unwrap_or_default();
    let name = component.name_any();
    let deadline = ctx.config.pass_timeout;

    match tokio::time::timeout(deadline, run_pass(&ctx, &namespace, &name)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?deadline, "reconciliation pass exceeded its deadline");
            Err(Error::timeout(format!("component {namespace}/{name}"), deadline))
        }
    }
}

async fn run_pass(ctx: &Context, namespace: &str, name: &str) -> Result<Action> {
    let mut builder = ComponentPlanBuilder::new(
        ctx.store.clone(),
        ctx.config.clone(),
        ctx.builders.clone(),
        namespace,
        name,
    );

    if let Err(e) = builder.init().await {
        if e.is_not_found() {
            debug!("component is gone");
            return Ok(Action::await_change());
        }
        return Err(e);
    }

    let built = match builder.build().await {
        Ok(built) => built,
        Err(e) => {
            if e.is_fatal() {
                if let Some(object) = builder.root_ref() {
                    ctx.events
                        .publish(
                            &object,
                            EventType::Warning,
                            reasons::INVARIANT_VIOLATED,
                            actions::RECONCILE,
                            Some(e.to_string()),
                        )
                        .await;
                }
            }
            return Err(e);
        }
    };

    let executor = PlanExecutor::new(ctx.store.clone(), ctx.config.finalizer.clone());
    let summary = executor.execute(&built.plan).await?;
    debug!(writes = summary.writes(), "pass applied");

    for event in &built.events {
        event.publish(ctx.events.as_ref()).await;
    }

    if let Some(message) = built.user_error {
        return Err(Error::validation_for(name, message));
    }

    match (built.plan.requeue_after(), built.plan.requeue_reason()) {
        (Some(after), reason) => {
            info!(?after, reason = reason.unwrap_or_default(), "pass incomplete, requeueing");
            Ok(Action::requeue(after))
        }
        (None, _) => Ok(Action::requeue(ctx.config.requeue_after_success)),
    }
}

/// Error policy for the component controller
///
/// - delayed requeue: retry after the requested delay
/// - invariant violation: logged loudly, retried at the slow interval
/// - transient: retried at the short interval
/// - anything else needs a user fix and is retried at the slow interval
pub fn error_policy(component: Arc<Component>, error: &Error, ctx: Arc<Context>) -> Action {
    let config = &ctx.config;
    if let Some(after) = error.requeue_after() {
        return Action::requeue(after);
    }

    if error.is_fatal() {
        error!(
            ?error,
            component = %component.name_any(),
            "reconciliation model is inconsistent"
        );
        return Action::requeue(config.requeue_after_permanent);
    }

    warn!(
        %error,
        component = %component.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(requeue_interval(error, config))
}

fn requeue_interval(error: &Error, config: &OperatorConfig) -> Duration {
    if error.is_retryable() {
        config.requeue_after_transient
    } else {
        config.requeue_after_permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::testing::{cluster, component, spec};
    use dbplane_common::events::RecordingEventPublisher;
    use dbplane_common::store::{InMemoryStore, MockObjectStore};
    use dbplane_common::ManagedObject;

    fn ctx_with(store: Arc<dyn ObjectStore>) -> Arc<Context> {
        Arc::new(Context::for_testing(store))
    }

    // =========================================================================
    // Reconciliation Story Tests
    // =========================================================================

    /// Story: a deleted component is left alone
    #[tokio::test]
    async fn story_vanished_component_awaits_change() {
        let ctx = ctx_with(Arc::new(InMemoryStore::new()));
        let action = reconcile(Arc::new(component(spec())), ctx)
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    /// Story: the first pass adds the finalizer and requeues normally
    #[tokio::test]
    async fn story_first_pass_assures_metadata() {
        let store = Arc::new(InMemoryStore::new());
        let comp = component(spec());
        let stored = store.insert(ManagedObject::from_resource(&comp).expect("convert"));
        store.insert(ManagedObject::from_resource(&cluster()).expect("convert"));
        let ctx = ctx_with(store.clone());

        let action = reconcile(Arc::new(comp), ctx.clone())
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::requeue(ctx.config.requeue_after_success));

        let updated = store.snapshot(&stored.key()).expect("component");
        assert!(updated.has_finalizer(&ctx.config.finalizer));
    }

    /// Story: an invalid spec is reported and retried slowly
    #[tokio::test]
    async fn story_invalid_spec_surfaces_validation_error() {
        let store = Arc::new(InMemoryStore::new());
        let mut s = spec();
        s.comp_def.clear();
        let mut comp = component(s);
        comp.metadata.finalizers = Some(vec![dbplane_common::config::DEFAULT_FINALIZER.to_string()]);
        store.insert(ManagedObject::from_resource(&comp).expect("convert"));
        store.insert(ManagedObject::from_resource(&cluster()).expect("convert"));

        let events = Arc::new(RecordingEventPublisher::default());
        let ctx = Arc::new(Context::new(
            store.clone(),
            events.clone(),
            OperatorConfig::default(),
            BuilderRegistry::new(),
        ));

        let err = reconcile(Arc::new(comp.clone()), ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(events.with_reason(reasons::VALIDATION_FAILED).len(), 1);

        let action = error_policy(Arc::new(comp), &err, ctx.clone());
        assert_eq!(action, Action::requeue(ctx.config.requeue_after_permanent));
    }

    /// Story: store outages propagate and are retried quickly
    #[tokio::test]
    async fn story_store_failure_is_transient() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|_, _, _| Err(Error::internal_with_context("store", "connection reset")));
        let ctx = ctx_with(Arc::new(store));

        let comp = Arc::new(component(spec()));
        let err = reconcile(comp.clone(), ctx.clone()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            error_policy(comp, &err, ctx.clone()),
            Action::requeue(ctx.config.requeue_after_transient)
        );
    }

    // =========================================================================
    // Error Policy Tests
    // =========================================================================

    #[test]
    fn test_delayed_requeue_uses_requested_delay() {
        let ctx = ctx_with(Arc::new(InMemoryStore::new()));
        let err = Error::delayed_requeue(Duration::from_secs(7), "waiting on data clone");
        assert_eq!(
            error_policy(Arc::new(component(spec())), &err, ctx),
            Action::requeue(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_invariant_violation_requeues_slowly() {
        let ctx = ctx_with(Arc::new(InMemoryStore::new()));
        let err = Error::invariant("workload", "two workloads");
        assert_eq!(
            error_policy(Arc::new(component(spec())), &err, ctx.clone()),
            Action::requeue(ctx.config.requeue_after_permanent)
        );
    }

    #[test]
    fn test_timeout_is_transient() {
        let config = OperatorConfig::default();
        let err = Error::timeout("component db/mysql", Duration::from_secs(30));
        assert_eq!(requeue_interval(&err, &config), config.requeue_after_transient);
    }
}
