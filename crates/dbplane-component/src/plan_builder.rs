//! Plan builder for component passes
//!
//! [`ComponentPlanBuilder::init`] reads the component fresh from the store,
//! [`ComponentPlanBuilder::build`] runs the transformer chain against it and
//! returns a [`ComponentPlan`]: the finished graph plus what the controller
//! must do once the graph has been applied.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dbplane_common::crd::Component;
use dbplane_common::events::PendingEvent;
use dbplane_common::object::api_resource;
use dbplane_common::{Error, ObjectStore, OperatorConfig, ReadOnlyClient, Result};
use dbplane_graph::{Action, Dag, GraphClient, Plan, TransformerChain};
use k8s_openapi::api::core::v1::ObjectReference;
use tracing::debug;

use crate::builder::BuilderRegistry;
use crate::context::ComponentTransformContext;
use crate::transformers::component_chain;

/// Output of one component pass
#[derive(Debug)]
pub struct ComponentPlan {
    /// Graph to execute
    pub plan: Plan,
    /// Events to publish after execution
    pub events: Vec<PendingEvent>,
    /// Validation failure to surface after execution
    pub user_error: Option<String>,
}

/// Builds the plan for one component
pub struct ComponentPlanBuilder {
    store: Arc<dyn ObjectStore>,
    config: OperatorConfig,
    registry: BuilderRegistry,
    namespace: String,
    name: String,
    now: DateTime<Utc>,
    chain: TransformerChain<ComponentTransformContext>,
    ctx: Option<ComponentTransformContext>,
}

impl ComponentPlanBuilder {
    /// Builder for the component `namespace/name`
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: OperatorConfig,
        registry: BuilderRegistry,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            config,
            registry,
            namespace: namespace.into(),
            name: name.into(),
            now: Utc::now(),
            chain: component_chain(),
            ctx: None,
        }
    }

    /// Evaluate timeouts against a fixed instant instead of the wall clock
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Load the component and seed the transform context
    ///
    /// Fails with `NotFound` if the component vanished since the pass was
    /// triggered.
    pub async fn init(&mut self) -> Result<()> {
        let comp_orig = self
            .store
            .get(&api_resource::<Component>(), &self.namespace, &self.name)
            .await?
            .ok_or_else(|| {
                Error::not_found("Component", format!("{}/{}", self.namespace, self.name))
            })?;
        let comp: Component = comp_orig.to_typed()?;
        let builder = self.registry.resolve(comp.spec.workload_kind);

        self.ctx = Some(ComponentTransformContext::new(
            ReadOnlyClient::new(self.store.clone()),
            self.config.clone(),
            builder,
            comp_orig,
            self.now,
        )?);
        Ok(())
    }

    /// Reference to the loaded component, for events about a failed build
    pub fn root_ref(&self) -> Option<ObjectReference> {
        self.ctx.as_ref().map(|ctx| ctx.comp_orig.object_ref())
    }

    /// Run the chain and return the finished plan
    pub async fn build(&mut self) -> Result<ComponentPlan> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Err(Error::invariant(
                "plan builder",
                format!("build called before init for {}/{}", self.namespace, self.name),
            ));
        };

        let mut dag = Dag::new();
        GraphClient::new().root(&mut dag, ctx.comp_orig.clone(), ctx.comp_orig.clone(), Action::Noop)?;

        let outcome = self.chain.run(ctx, &mut dag).await?;
        dag.validate()?;
        debug!(
            component = %self.name,
            vertices = dag.len(),
            stopped_by = ?outcome.stopped_by,
            requeue = ?outcome.requeue,
            "plan built"
        );

        Ok(ComponentPlan {
            plan: Plan::new(dag, outcome.requeue),
            events: std::mem::take(&mut ctx.pending_events),
            user_error: ctx.user_error.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::testing::{at, cluster, component, spec};
    use dbplane_common::store::InMemoryStore;
    use dbplane_common::ManagedObject;

    fn builder(store: &Arc<InMemoryStore>) -> ComponentPlanBuilder {
        ComponentPlanBuilder::new(
            store.clone(),
            OperatorConfig::default(),
            BuilderRegistry::new(),
            "db",
            "mysql",
        )
        .with_now(at(0))
    }

    #[tokio::test]
    async fn test_init_fails_for_missing_component() {
        let store = Arc::new(InMemoryStore::new());
        let err = builder(&store).init().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_build_before_init_is_invariant_violation() {
        let store = Arc::new(InMemoryStore::new());
        let err = builder(&store).build().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_first_pass_only_assures_metadata() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(ManagedObject::from_resource(&component(spec())).expect("convert"));
        store.insert(ManagedObject::from_resource(&cluster()).expect("convert"));

        let mut b = builder(&store);
        b.init().await.expect("init");
        assert!(b.root_ref().is_some());
        let built = b.build().await.expect("build");

        let dag = built.plan.dag();
        assert_eq!(dag.len(), 1);
        assert_eq!(dag.root_vertex().map(|v| v.action), Some(Action::Update));
        assert!(built.events.is_empty());
        assert!(built.user_error.is_none());
    }
}
