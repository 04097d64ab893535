//! Object store backed by the Kubernetes API server

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::Value;
use tracing::{debug, trace};

use super::{selector_string, ObjectStore};
use crate::object::ManagedObject;
use crate::{Error, Result};

/// [`ObjectStore`] talking to the API server through `Api<DynamicObject>`
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
    field_manager: String,
}

impl KubeObjectStore {
    /// Create a store for the given client; writes are attributed to `field_manager`
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }
}

/// Map API status codes onto the store error taxonomy
fn map_err(e: kube::Error, obj: &ManagedObject) -> Error {
    match &e {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(obj.kind(), key_of(obj)),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            Error::already_exists(obj.kind(), key_of(obj))
        }
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(obj.kind(), key_of(obj)),
        _ => Error::from(e),
    }
}

fn key_of(obj: &ManagedObject) -> String {
    format!("{}/{}", obj.namespace(), obj.name())
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>> {
        match self.api(resource, namespace).get(name).await {
            Ok(obj) => Ok(Some(ManagedObject::new(resource.clone(), obj))),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ManagedObject>> {
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&selector_string(labels));
        }
        let list = self.api(resource, namespace).list(&params).await?;
        trace!(kind = %resource.kind, namespace, count = list.items.len(), "listed objects");
        Ok(list
            .items
            .into_iter()
            .map(|obj| ManagedObject::new(resource.clone(), obj))
            .collect())
    }

    async fn create(&self, obj: &ManagedObject) -> Result<ManagedObject> {
        debug!(object = %obj.key(), "creating object");
        let created = self
            .api(&obj.resource, obj.namespace())
            .create(&self.post_params(), &obj.obj)
            .await
            .map_err(|e| map_err(e, obj))?;
        Ok(ManagedObject::new(obj.resource.clone(), created))
    }

    async fn update(&self, obj: &ManagedObject) -> Result<ManagedObject> {
        debug!(object = %obj.key(), "updating object");
        let updated = self
            .api(&obj.resource, obj.namespace())
            .replace(obj.name(), &self.post_params(), &obj.obj)
            .await
            .map_err(|e| map_err(e, obj))?;
        Ok(ManagedObject::new(obj.resource.clone(), updated))
    }

    async fn update_status(&self, obj: &ManagedObject) -> Result<ManagedObject> {
        debug!(object = %obj.key(), "updating object status");
        let body = serde_json::to_vec(&obj.obj)?;
        let updated = self
            .api(&obj.resource, obj.namespace())
            .replace_status(obj.name(), &self.post_params(), body)
            .await
            .map_err(|e| map_err(e, obj))?;
        Ok(ManagedObject::new(obj.resource.clone(), updated))
    }

    async fn delete(&self, obj: &ManagedObject) -> Result<()> {
        debug!(object = %obj.key(), "deleting object");
        self.api(&obj.resource, obj.namespace())
            .delete(obj.name(), &DeleteParams::background())
            .await
            .map_err(|e| map_err(e, obj))?;
        Ok(())
    }

    async fn patch(&self, obj: &ManagedObject, patch: &Value) -> Result<ManagedObject> {
        debug!(object = %obj.key(), "patching object");
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let patched = self
            .api(&obj.resource, obj.namespace())
            .patch(obj.name(), &params, &Patch::Merge(patch))
            .await
            .map_err(|e| map_err(e, obj))?;
        Ok(ManagedObject::new(obj.resource.clone(), patched))
    }
}
