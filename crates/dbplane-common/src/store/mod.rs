//! Object store access
//!
//! The [`ObjectStore`] trait is the only path to persisted state. Production
//! uses [`KubeObjectStore`]; tests use `InMemoryStore` or the generated
//! `MockObjectStore`. Transformers only ever see a [`ReadOnlyClient`].

mod kube_store;
#[cfg(any(test, feature = "test-utils"))]
mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::ApiResource;
use kube::Resource;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::object::{api_resource, ManagedObject};
use crate::Result;

pub use kube_store::KubeObjectStore;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{InMemoryStore, Verb, WriteRecord};

/// Strongly consistent object store with optimistic concurrency
///
/// Writes fail with `AlreadyExists`, `NotFound` or `Conflict` errors when the
/// store rejects them; the resource version on the submitted object is the
/// concurrency token.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object; `Ok(None)` if it does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>>;

    /// List objects in a namespace whose labels contain every given pair
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ManagedObject>>;

    /// Create an object
    async fn create(&self, obj: &ManagedObject) -> Result<ManagedObject>;

    /// Replace an object's spec and metadata
    async fn update(&self, obj: &ManagedObject) -> Result<ManagedObject>;

    /// Replace only an object's status
    async fn update_status(&self, obj: &ManagedObject) -> Result<ManagedObject>;

    /// Request deletion; the store keeps the object until its finalizers are gone
    async fn delete(&self, obj: &ManagedObject) -> Result<()>;

    /// Apply a JSON merge patch
    async fn patch(&self, obj: &ManagedObject, patch: &Value) -> Result<ManagedObject>;
}

/// Read-only view of the store handed to transformers
#[derive(Clone)]
pub struct ReadOnlyClient {
    store: Arc<dyn ObjectStore>,
}

impl ReadOnlyClient {
    /// Wrap a store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Fetch one object
    pub async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>> {
        self.store.get(resource, namespace, name).await
    }

    /// List objects by label
    pub async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ManagedObject>> {
        self.store.list(resource, namespace, labels).await
    }

    /// Fetch one object as a typed resource
    pub async fn get_typed<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource + DeserializeOwned,
        K::DynamicType: Default,
    {
        match self.get(&api_resource::<K>(), namespace, name).await? {
            Some(obj) => obj.to_typed().map(Some),
            None => Ok(None),
        }
    }

    /// List objects by label as typed resources
    pub async fn list_typed<K>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>
    where
        K: Resource + DeserializeOwned,
        K::DynamicType: Default,
    {
        self.list(&api_resource::<K>(), namespace, labels)
            .await?
            .iter()
            .map(ManagedObject::to_typed)
            .collect()
    }
}

/// Whether an object's labels contain every selector pair
pub fn labels_match(obj: &ManagedObject, selector: &BTreeMap<String, String>) -> bool {
    let labels = obj.obj.metadata.labels.as_ref();
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// Render a label map as a Kubernetes label selector string
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
