//! In-memory object store for tests
//!
//! Behaves like the API server for the parts reconciliation depends on:
//! resource versions are checked on every write, deletion waits for
//! finalizers, status writes only touch `status`, and generation bumps when
//! anything outside metadata and status changes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ApiResource;
use parking_lot::Mutex;
use serde_json::Value;

use super::{labels_match, ObjectStore};
use crate::object::{apply_merge_patch, ManagedObject, ObjectKey};
use crate::{Error, Result};

/// Kind of write recorded by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// create
    Create,
    /// update
    Update,
    /// update_status
    UpdateStatus,
    /// delete
    Delete,
    /// patch
    Patch,
}

/// One accepted write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    /// What was done
    pub verb: Verb,
    /// To which object
    pub key: ObjectKey,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, ManagedObject>,
    revision: u64,
    uids: u64,
    writes: Vec<WriteRecord>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn record(&mut self, verb: Verb, key: ObjectKey) {
        self.writes.push(WriteRecord { verb, key });
    }

    fn live(&self, obj: &ManagedObject) -> Result<&ManagedObject> {
        let key = obj.key();
        let live = self
            .objects
            .get(&key)
            .ok_or_else(|| Error::not_found(key.kind.clone(), ns_name(&key)))?;
        if let Some(rv) = obj.resource_version() {
            if live.resource_version() != Some(rv) {
                return Err(Error::conflict(key.kind.clone(), ns_name(&key)));
            }
        }
        Ok(live)
    }
}

fn ns_name(key: &ObjectKey) -> String {
    format!("{}/{}", key.namespace, key.name)
}

fn spec_of(obj: &ManagedObject) -> Value {
    let mut data = obj.obj.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

/// Thread-safe in-memory [`ObjectStore`]
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a write; assigns uid and version
    pub fn insert(&self, mut obj: ManagedObject) -> ManagedObject {
        let mut state = self.state.lock();
        if obj.obj.metadata.uid.is_none() {
            state.uids += 1;
            obj.obj.metadata.uid = Some(format!("uid-{}", state.uids));
        }
        obj.obj.metadata.generation.get_or_insert(1);
        obj.obj.metadata.resource_version = Some(state.next_revision());
        state.objects.insert(obj.key(), obj.clone());
        obj
    }

    /// Current copy of an object
    pub fn snapshot(&self, key: &ObjectKey) -> Option<ManagedObject> {
        self.state.lock().objects.get(key).cloned()
    }

    /// All stored objects of one kind
    pub fn objects_of_kind(&self, kind: &str) -> Vec<ManagedObject> {
        self.state
            .lock()
            .objects
            .values()
            .filter(|o| o.kind() == kind)
            .cloned()
            .collect()
    }

    /// Mutate a stored object in place as an external actor would
    pub fn mutate(&self, key: &ObjectKey, f: impl FnOnce(&mut ManagedObject)) -> bool {
        let mut state = self.state.lock();
        let revision = state.next_revision();
        match state.objects.get_mut(key) {
            Some(obj) => {
                f(obj);
                obj.obj.metadata.resource_version = Some(revision);
                true
            }
            None => false,
        }
    }

    /// Writes accepted so far
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>> {
        let key = ObjectKey {
            group: resource.group.clone(),
            kind: resource.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        Ok(self.state.lock().objects.get(&key).cloned())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ManagedObject>> {
        Ok(self
            .state
            .lock()
            .objects
            .values()
            .filter(|o| {
                o.resource.group == resource.group
                    && o.kind() == resource.kind
                    && o.namespace() == namespace
                    && labels_match(o, labels)
            })
            .cloned()
            .collect())
    }

    async fn create(&self, obj: &ManagedObject) -> Result<ManagedObject> {
        let key = obj.key();
        let mut state = self.state.lock();
        if state.objects.contains_key(&key) {
            return Err(Error::already_exists(key.kind.clone(), ns_name(&key)));
        }
        let mut stored = obj.clone();
        state.uids += 1;
        stored.obj.metadata.uid = Some(format!("uid-{}", state.uids));
        stored.obj.metadata.generation = Some(1);
        stored.obj.metadata.resource_version = Some(state.next_revision());
        stored.obj.metadata.creation_timestamp = Some(Time(Utc::now()));
        stored.obj.metadata.deletion_timestamp = None;
        state.objects.insert(key.clone(), stored.clone());
        state.record(Verb::Create, key);
        Ok(stored)
    }

    async fn update(&self, obj: &ManagedObject) -> Result<ManagedObject> {
        let key = obj.key();
        let mut state = self.state.lock();
        let live = state.live(obj)?.clone();

        let mut stored = obj.clone();
        stored.obj.metadata.uid = live.obj.metadata.uid.clone();
        stored.obj.metadata.creation_timestamp = live.obj.metadata.creation_timestamp.clone();
        stored.obj.metadata.deletion_timestamp = live.obj.metadata.deletion_timestamp.clone();
        match (stored.obj.data.as_object_mut(), live.status()) {
            (Some(map), Some(status)) => {
                map.insert("status".to_string(), status.clone());
            }
            (Some(map), None) => {
                map.remove("status");
            }
            _ => {}
        }
        let generation = live.generation().unwrap_or(1);
        stored.obj.metadata.generation = Some(if spec_of(&stored) != spec_of(&live) {
            generation + 1
        } else {
            generation
        });
        stored.obj.metadata.resource_version = Some(state.next_revision());
        state.record(Verb::Update, key.clone());

        let finalizers_gone = stored
            .obj
            .metadata
            .finalizers
            .as_ref()
            .map_or(true, Vec::is_empty);
        if stored.is_deleting() && finalizers_gone {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, stored.clone());
        }
        Ok(stored)
    }

    async fn update_status(&self, obj: &ManagedObject) -> Result<ManagedObject> {
        let key = obj.key();
        let mut state = self.state.lock();
        let mut stored = state.live(obj)?.clone();
        if let Some(map) = stored.obj.data.as_object_mut() {
            match obj.status() {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        stored.obj.metadata.resource_version = Some(state.next_revision());
        state.objects.insert(key.clone(), stored.clone());
        state.record(Verb::UpdateStatus, key);
        Ok(stored)
    }

    async fn delete(&self, obj: &ManagedObject) -> Result<()> {
        let key = obj.key();
        let mut state = self.state.lock();
        let live = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(key.kind.clone(), ns_name(&key)))?;
        let has_finalizers = live
            .obj
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            let mut marked = live;
            if marked.obj.metadata.deletion_timestamp.is_none() {
                marked.obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
            }
            marked.obj.metadata.resource_version = Some(state.next_revision());
            state.objects.insert(key.clone(), marked);
        } else {
            state.objects.remove(&key);
        }
        state.record(Verb::Delete, key);
        Ok(())
    }

    async fn patch(&self, obj: &ManagedObject, patch: &Value) -> Result<ManagedObject> {
        let key = obj.key();
        let mut state = self.state.lock();
        let live = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(key.kind.clone(), ns_name(&key)))?;
        let mut value = serde_json::to_value(&live.obj)?;
        apply_merge_patch(&mut value, patch);
        let mut stored = ManagedObject::new(live.resource.clone(), serde_json::from_value(value)?);
        stored.obj.metadata.resource_version = Some(state.next_revision());
        state.objects.insert(key.clone(), stored.clone());
        state.record(Verb::Patch, key);
        Ok(stored)
    }
}
