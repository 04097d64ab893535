//! Graph client
//!
//! The only way transformers stage changes. Every call is synchronous and
//! in-memory; nothing reaches the store until the plan executes.
//!
//! Staging a second change for an object that already has a vertex replaces
//! that vertex's object, original and action in place. A new vertex is
//! connected below the root so the root is always applied last.

use dbplane_common::object::merge_desired;
use dbplane_common::{ManagedObject, ObjectKey, Result};
use tracing::trace;

use crate::dag::{Dag, VertexId};
use crate::vertex::{Action, ObjectVertex};

/// Whether the store has marked the object for deletion
pub fn is_object_deleting(obj: &ManagedObject) -> bool {
    obj.is_deleting()
}

/// Whether the object's spec changed since its status was last computed
pub fn is_object_updating(obj: &ManagedObject) -> bool {
    let observed = obj
        .status()
        .and_then(|s| s.get("observedGeneration"))
        .and_then(|g| g.as_i64());
    obj.generation() != observed
}

/// Whether only the object's status needs refreshing
pub fn is_object_status_updating(obj: &ManagedObject) -> bool {
    !is_object_deleting(obj) && !is_object_updating(obj)
}

/// Stages changes into a [`Dag`]
#[derive(Clone, Copy, Debug, Default)]
pub struct GraphClient;

impl GraphClient {
    /// Create a client
    pub fn new() -> Self {
        Self
    }

    /// Seed the graph with the pass's root vertex
    ///
    /// If a root already exists it is replaced in place.
    pub fn root(
        &self,
        dag: &mut Dag,
        original: ManagedObject,
        object: ManagedObject,
        action: Action,
    ) -> Result<VertexId> {
        if let Some(id) = dag.root() {
            if let Some(v) = dag.vertex_mut(id) {
                *v = ObjectVertex::with_original(object, original, action);
            }
            return Ok(id);
        }
        dag.add_root(ObjectVertex::with_original(object, original, action))
    }

    fn write(
        &self,
        dag: &mut Dag,
        original: Option<ManagedObject>,
        object: ManagedObject,
        action: Action,
    ) -> Result<VertexId> {
        let key = object.key();
        if let Some(id) = dag.find(&key) {
            if let Some(v) = dag.vertex_mut(id) {
                trace!(object = %key, from = %v.action, to = %action, "restaging vertex");
                v.object = object;
                v.original = original;
                v.action = action;
            }
            return Ok(id);
        }
        trace!(object = %key, %action, "staging vertex");
        let id = dag.add_vertex(ObjectVertex {
            object,
            original,
            action,
        })?;
        if let Some(root) = dag.root() {
            dag.add_edge(root, id)?;
        }
        Ok(id)
    }

    /// Stage a create
    pub fn create(&self, dag: &mut Dag, object: ManagedObject) -> Result<VertexId> {
        self.write(dag, None, object, Action::Create)
    }

    /// Stage an update; nothing is staged when `new` equals `old`
    pub fn update(
        &self,
        dag: &mut Dag,
        old: ManagedObject,
        new: ManagedObject,
    ) -> Result<Option<VertexId>> {
        if old.semantic_eq(&new) {
            return Ok(None);
        }
        self.write(dag, Some(old), new, Action::Update).map(Some)
    }

    /// Stage an update built by overlaying `desired` onto `live`
    ///
    /// Fields the store populated and `desired` leaves out are kept, so a
    /// builder output that matches the live object stages nothing.
    pub fn patch(
        &self,
        dag: &mut Dag,
        live: ManagedObject,
        desired: &ManagedObject,
    ) -> Result<Option<VertexId>> {
        let merged = merge_desired(&live, desired)?;
        self.update(dag, live, merged)
    }

    /// Stage a delete
    pub fn delete(&self, dag: &mut Dag, object: ManagedObject) -> Result<VertexId> {
        self.write(dag, None, object, Action::Delete)
    }

    /// Stage a status write; nothing is staged when the status is unchanged
    pub fn status(
        &self,
        dag: &mut Dag,
        old: ManagedObject,
        new: ManagedObject,
    ) -> Result<Option<VertexId>> {
        if old.status_eq(&new) {
            return Ok(None);
        }
        self.write(dag, Some(old), new, Action::Status).map(Some)
    }

    /// Stage an ordering-only vertex
    ///
    /// An object that already has a vertex keeps its action.
    pub fn noop(&self, dag: &mut Dag, object: ManagedObject) -> Result<VertexId> {
        if let Some(id) = dag.find(&object.key()) {
            return Ok(id);
        }
        self.write(dag, None, object, Action::Noop)
    }

    /// `after` is applied once every vertex in `befores` has been
    pub fn depends_on(&self, dag: &mut Dag, after: VertexId, befores: &[VertexId]) -> Result<()> {
        for &before in befores {
            dag.add_edge(after, before)?;
        }
        Ok(())
    }

    /// Vertices whose kind and object both match, in insertion order
    pub fn find_all(
        &self,
        dag: &Dag,
        kind: impl Fn(&str) -> bool,
        owned: impl Fn(&ManagedObject) -> bool,
    ) -> Vec<VertexId> {
        dag.iter()
            .filter(|(_, v)| kind(v.object.kind()) && owned(&v.object))
            .map(|(id, _)| id)
            .collect()
    }

    /// Vertices matching an arbitrary predicate, in insertion order
    pub fn find_matching(
        &self,
        dag: &Dag,
        predicate: impl Fn(&ObjectVertex) -> bool,
    ) -> Vec<VertexId> {
        dag.iter()
            .filter(|(_, v)| predicate(v))
            .map(|(id, _)| id)
            .collect()
    }

    /// Whether the object has a vertex staged with the given action
    pub fn is_action(&self, dag: &Dag, key: &ObjectKey, action: Action) -> bool {
        dag.find(key)
            .and_then(|id| dag.vertex(id))
            .is_some_and(|v| v.action == action)
    }

    /// Whether the store has marked the object for deletion
    pub fn is_object_deleting(&self, obj: &ManagedObject) -> bool {
        is_object_deleting(obj)
    }

    /// Whether the object's spec changed since its status was last computed
    pub fn is_object_updating(&self, obj: &ManagedObject) -> bool {
        is_object_updating(obj)
    }

    /// Whether only the object's status needs refreshing
    pub fn is_object_status_updating(&self, obj: &ManagedObject) -> bool {
        is_object_status_updating(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn cm(name: &str, value: &str) -> ManagedObject {
        ManagedObject::from_resource(&ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..Default::default()
        })
        .expect("convert")
    }

    fn seeded() -> Dag {
        let mut dag = Dag::new();
        let root = cm("root", "");
        GraphClient::new()
            .root(&mut dag, root.clone(), root, Action::Noop)
            .expect("root");
        dag
    }

    #[test]
    fn test_update_of_equal_objects_stages_nothing() {
        let client = GraphClient::new();
        let mut dag = seeded();
        let old = cm("a", "1");
        let mut new = old.clone();
        new.obj.metadata.resource_version = Some("99".to_string());

        assert_eq!(client.update(&mut dag, old, new).expect("update"), None);
        assert_eq!(dag.len(), 1);
    }

    #[test]
    fn test_update_of_changed_object_stages_one_vertex() {
        let client = GraphClient::new();
        let mut dag = seeded();

        let id = client
            .update(&mut dag, cm("a", "1"), cm("a", "2"))
            .expect("update")
            .expect("staged");
        assert_eq!(dag.len(), 2);
        let v = dag.vertex(id).expect("vertex");
        assert_eq!(v.action, Action::Update);
        assert!(v.original.is_some());
        assert_eq!(dag.dependencies(dag.root().expect("root")).collect::<Vec<_>>(), vec![id]);
    }

    #[test]
    fn test_restaging_replaces_in_place() {
        let client = GraphClient::new();
        let mut dag = seeded();
        let first = client.create(&mut dag, cm("a", "1")).expect("create");
        let second = client.delete(&mut dag, cm("a", "1")).expect("delete");

        assert_eq!(first, second);
        assert_eq!(dag.len(), 2);
        assert!(client.is_action(&dag, &cm("a", "1").key(), Action::Delete));
    }

    #[test]
    fn test_noop_keeps_existing_action() {
        let client = GraphClient::new();
        let mut dag = seeded();
        client.create(&mut dag, cm("a", "1")).expect("create");
        client.noop(&mut dag, cm("a", "1")).expect("noop");
        assert!(client.is_action(&dag, &cm("a", "1").key(), Action::Create));
    }

    #[test]
    fn test_status_unchanged_stages_nothing() {
        let client = GraphClient::new();
        let mut dag = seeded();
        let mut old = cm("a", "1");
        old.obj.data["status"] = serde_json::json!({"phase": "Running"});
        let new = old.clone();
        assert!(client.status(&mut dag, old.clone(), new).expect("status").is_none());

        let mut changed = old.clone();
        changed.obj.data["status"] = serde_json::json!({"phase": "Failed"});
        assert!(client.status(&mut dag, old, changed).expect("status").is_some());
    }

    #[test]
    fn test_patch_ignores_server_fields() {
        let client = GraphClient::new();
        let mut dag = seeded();
        let mut live = cm("a", "1");
        live.obj.metadata.uid = Some("uid-1".to_string());
        live.set_label("added-by", "server");

        assert!(client.patch(&mut dag, live.clone(), &cm("a", "1")).expect("patch").is_none());
        assert!(client.patch(&mut dag, live, &cm("a", "2")).expect("patch").is_some());
    }

    #[test]
    fn test_find_all_filters_by_kind_and_owner() {
        let client = GraphClient::new();
        let mut dag = seeded();
        let mut owned = cm("owned", "1");
        owned.set_label("app", "mysql");
        client.create(&mut dag, owned).expect("create");
        client.create(&mut dag, cm("other", "1")).expect("create");

        let found = client.find_all(
            &dag,
            |kind| kind == "ConfigMap",
            |o| o.labels().get("app").map(String::as_str) == Some("mysql"),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(dag.vertex(found[0]).map(|v| v.object.name()), Some("owned"));
    }

    #[test]
    fn test_lifecycle_predicates() {
        let mut obj = cm("a", "1");
        obj.obj.metadata.generation = Some(2);
        obj.obj.data["status"] = serde_json::json!({"observedGeneration": 1});
        assert!(is_object_updating(&obj));
        assert!(!is_object_status_updating(&obj));

        obj.obj.data["status"] = serde_json::json!({"observedGeneration": 2});
        assert!(!is_object_updating(&obj));
        assert!(is_object_status_updating(&obj));

        obj.obj.metadata.deletion_timestamp = Some(Time(chrono_now()));
        assert!(is_object_deleting(&obj));
        assert!(!is_object_status_updating(&obj));
    }

    fn chrono_now() -> k8s_openapi::chrono::DateTime<k8s_openapi::chrono::Utc> {
        k8s_openapi::chrono::Utc::now()
    }
}
