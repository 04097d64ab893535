//! Plans and plan execution
//!
//! The executor applies a finished graph to the store, prerequisites first.
//! Benign races are absorbed: creating an object that already exists and
//! updating or deleting one that is already gone both count as success. Any
//! other failure stops the walk. Vertices applied before the failure stay
//! applied; the next pass rebuilds its graph from the partially updated store.

use std::sync::Arc;
use std::time::Duration;

use dbplane_common::{ManagedObject, ObjectStore, Result};
use tracing::{debug, info};

use crate::dag::Dag;
use crate::vertex::{Action, ObjectVertex};

/// A finished graph ready to execute
#[derive(Clone, Debug)]
pub struct Plan {
    dag: Dag,
    requeue: Option<(Duration, String)>,
}

impl Plan {
    /// Wrap a finished graph
    pub fn new(dag: Dag, requeue: Option<(Duration, String)>) -> Self {
        Self { dag, requeue }
    }

    /// The graph
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Delay requested by a transformer, if any
    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue.as_ref().map(|(after, _)| *after)
    }

    /// Why a requeue was requested
    pub fn requeue_reason(&self) -> Option<&str> {
        self.requeue.as_ref().map(|(_, reason)| reason.as_str())
    }

    /// Whether executing the plan writes anything
    pub fn has_effect(&self) -> bool {
        self.dag.has_effect()
    }
}

/// Counts of what an execution did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Objects created
    pub created: usize,
    /// Objects updated
    pub updated: usize,
    /// Objects deleted or released for deletion
    pub deleted: usize,
    /// Status writes
    pub status_updated: usize,
    /// Writes skipped because the race they lost made them moot
    pub skipped: usize,
}

impl ExecutionSummary {
    /// Total writes issued
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted + self.status_updated
    }
}

/// Applies plans to the object store
#[derive(Clone)]
pub struct PlanExecutor {
    store: Arc<dyn ObjectStore>,
    finalizer: String,
}

enum Outcome {
    Applied(Action),
    Skipped,
}

impl PlanExecutor {
    /// Create an executor that strips `finalizer` before deleting
    pub fn new(store: Arc<dyn ObjectStore>, finalizer: impl Into<String>) -> Self {
        Self {
            store,
            finalizer: finalizer.into(),
        }
    }

    /// Walk the plan's graph and dispatch every vertex
    pub async fn execute(&self, plan: &Plan) -> Result<ExecutionSummary> {
        let outcomes = plan
            .dag()
            .walk_reverse_topological_async(move |vertex| self.dispatch(vertex))
            .await?;

        let mut summary = ExecutionSummary::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Applied(Action::Create) => summary.created += 1,
                Outcome::Applied(Action::Update) => summary.updated += 1,
                Outcome::Applied(Action::Delete) => summary.deleted += 1,
                Outcome::Applied(Action::Status) => summary.status_updated += 1,
                Outcome::Applied(Action::Noop) => {}
                Outcome::Skipped => summary.skipped += 1,
            }
        }

        if summary.writes() > 0 {
            info!(
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                status = summary.status_updated,
                skipped = summary.skipped,
                "plan executed"
            );
        }
        Ok(summary)
    }

    async fn dispatch(&self, vertex: &ObjectVertex) -> Result<Outcome> {
        let obj = &vertex.object;
        match vertex.action {
            Action::Create => match self.store.create(obj).await {
                Ok(_) => Ok(Outcome::Applied(Action::Create)),
                Err(e) if e.is_already_exists() => {
                    debug!(object = %obj.key(), "already exists, create is moot");
                    Ok(Outcome::Skipped)
                }
                Err(e) => Err(e),
            },
            Action::Update => {
                if vertex.original.as_ref().is_some_and(|o| o.semantic_eq(obj)) {
                    return Ok(Outcome::Skipped);
                }
                match self.store.update(obj).await {
                    Ok(_) => Ok(Outcome::Applied(Action::Update)),
                    Err(e) if e.is_not_found() => {
                        debug!(object = %obj.key(), "gone, update is moot");
                        Ok(Outcome::Skipped)
                    }
                    Err(e) => Err(e),
                }
            }
            Action::Delete => self.delete(obj).await,
            Action::Status => {
                self.store.update_status(obj).await?;
                Ok(Outcome::Applied(Action::Status))
            }
            Action::Noop => Ok(Outcome::Applied(Action::Noop)),
        }
    }

    async fn delete(&self, obj: &ManagedObject) -> Result<Outcome> {
        let mut current = obj.clone();
        if current.remove_finalizer(&self.finalizer) {
            match self.store.update(&current).await {
                Ok(updated) => current = updated,
                Err(e) if e.is_not_found() => return Ok(Outcome::Skipped),
                Err(e) => return Err(e),
            }
        }
        if current.is_deleting() {
            return Ok(Outcome::Applied(Action::Delete));
        }
        match self.store.delete(&current).await {
            Ok(()) => Ok(Outcome::Applied(Action::Delete)),
            Err(e) if e.is_not_found() => Ok(Outcome::Skipped),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GraphClient;
    use dbplane_common::store::{InMemoryStore, MockObjectStore, Verb};
    use dbplane_common::Error;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    const FINALIZER: &str = "component.dbplane.io/finalizer";

    fn cm(name: &str) -> ManagedObject {
        ManagedObject::from_resource(&ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .expect("convert")
    }

    fn plan_with(stage: impl FnOnce(&GraphClient, &mut Dag)) -> Plan {
        let client = GraphClient::new();
        let mut dag = Dag::new();
        let root = cm("root");
        client
            .root(&mut dag, root.clone(), root, Action::Noop)
            .expect("root");
        stage(&client, &mut dag);
        Plan::new(dag, None)
    }

    #[tokio::test]
    async fn test_create_already_exists_is_success() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(cm("a"));
        let executor = PlanExecutor::new(store.clone(), FINALIZER);
        let plan = plan_with(|c, dag| {
            c.create(dag, cm("a")).expect("create");
            c.create(dag, cm("b")).expect("create");
        });

        let summary = executor.execute(&plan).await.expect("execute");
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_update_not_found_is_success() {
        let store = Arc::new(InMemoryStore::new());
        let executor = PlanExecutor::new(store.clone(), FINALIZER);
        let mut changed = cm("gone");
        changed.set_label("x", "y");
        let plan = plan_with(|c, dag| {
            c.update(dag, cm("gone"), changed).expect("update");
        });

        let summary = executor.execute(&plan).await.expect("execute");
        assert_eq!(summary.skipped, 1);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_delete_strips_finalizer_then_deletes() {
        let store = Arc::new(InMemoryStore::new());
        let mut obj = cm("owned");
        obj.add_finalizer(FINALIZER);
        let live = store.insert(obj);
        let executor = PlanExecutor::new(store.clone(), FINALIZER);
        let plan = plan_with(|c, dag| {
            c.delete(dag, live.clone()).expect("delete");
        });

        executor.execute(&plan).await.expect("execute");
        let verbs: Vec<_> = store.writes().iter().map(|w| w.verb).collect();
        assert_eq!(verbs, vec![Verb::Update, Verb::Delete]);
        assert!(store.snapshot(&live.key()).is_none());
    }

    #[tokio::test]
    async fn test_delete_of_already_deleting_object_only_releases_finalizer() {
        let store = Arc::new(InMemoryStore::new());
        let mut obj = cm("owned");
        obj.add_finalizer(FINALIZER);
        obj.add_finalizer("other/finalizer");
        let live = store.insert(obj);
        store.delete(&live).await.expect("mark deleting");
        store.clear_writes();
        let marked = store.snapshot(&live.key()).expect("present");

        let executor = PlanExecutor::new(store.clone(), FINALIZER);
        let plan = plan_with(|c, dag| {
            c.delete(dag, marked.clone()).expect("delete");
        });
        executor.execute(&plan).await.expect("execute");

        let verbs: Vec<_> = store.writes().iter().map(|w| w.verb).collect();
        assert_eq!(verbs, vec![Verb::Update]);
        let remaining = store.snapshot(&live.key()).expect("other finalizer holds it");
        assert!(!remaining.has_finalizer(FINALIZER));
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let store = Arc::new(InMemoryStore::new());
        let executor = PlanExecutor::new(store.clone(), FINALIZER);
        let plan = plan_with(|c, dag| {
            c.delete(dag, cm("ghost")).expect("delete");
        });
        let summary = executor.execute(&plan).await.expect("execute");
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_failure_aborts_walk_without_rollback() {
        let mut store = MockObjectStore::new();
        let mut calls = 0;
        store.expect_create().times(2).returning(move |obj| {
            calls += 1;
            if calls == 2 {
                Err(Error::conflict("ConfigMap", "default/b"))
            } else {
                Ok(obj.clone())
            }
        });
        let executor = PlanExecutor::new(Arc::new(store), FINALIZER);
        let plan = plan_with(|c, dag| {
            for name in ["a", "b", "c"] {
                c.create(dag, cm(name)).expect("create");
            }
        });

        let err = executor.execute(&plan).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_status_errors_propagate() {
        let mut store = MockObjectStore::new();
        store
            .expect_update_status()
            .returning(|_| Err(Error::not_found("ConfigMap", "default/root")));
        let executor = PlanExecutor::new(Arc::new(store), FINALIZER);

        let mut dag = Dag::new();
        let old = cm("root");
        let mut new = old.clone();
        new.obj.data["status"] = serde_json::json!({"phase": "Running"});
        GraphClient::new()
            .root(&mut dag, old, new, Action::Status)
            .expect("root");

        let err = executor.execute(&Plan::new(dag, None)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_plan_exposes_requeue() {
        let plan = Plan::new(Dag::new(), Some((Duration::from_secs(10), "pod failing".to_string())));
        assert_eq!(plan.requeue_after(), Some(Duration::from_secs(10)));
        assert_eq!(plan.requeue_reason(), Some("pod failing"));
        assert!(!plan.has_effect());
    }
}
