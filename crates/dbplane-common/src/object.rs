//! Managed objects
//!
//! Every object a reconciliation pass touches is carried as a
//! [`ManagedObject`]: an untyped `DynamicObject` plus the `ApiResource` needed
//! to address it. Typed views are obtained on demand with [`ManagedObject::to_typed`].
//!
//! Ownership is expressed only through owner references and finalizer tokens
//! on the object metadata. Owned objects never hold pointers to their owner;
//! the owner is always resolved by a store lookup.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};
use kube::core::TypeMeta;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

/// Metadata fields populated by the store that never express intent
const VOLATILE_METADATA: &[&str] = &[
    "resourceVersion",
    "managedFields",
    "uid",
    "creationTimestamp",
    "generation",
    "selfLink",
];

/// Identity of a managed object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// API group ("" for core)
    pub group: String,
    /// Kind
    pub kind: String,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectKey {
    /// Key used for status messages: "Kind/Name"
    pub fn message_key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// `ApiResource` for a statically typed Kubernetes resource
pub fn api_resource<K>() -> ApiResource
where
    K: Resource,
    K::DynamicType: Default,
{
    ApiResource::erase::<K>(&K::DynamicType::default())
}

/// An object stored in the object store
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedObject {
    /// How to address the object
    pub resource: ApiResource,
    /// The object itself
    pub obj: DynamicObject,
}

impl ManagedObject {
    /// Wrap a dynamic object, filling in type metadata if it was dropped
    pub fn new(resource: ApiResource, mut obj: DynamicObject) -> Self {
        if obj.types.is_none() {
            obj.types = Some(TypeMeta {
                api_version: resource.api_version.clone(),
                kind: resource.kind.clone(),
            });
        }
        Self { resource, obj }
    }

    /// Convert a typed resource into a managed object
    pub fn from_resource<K>(resource: &K) -> Result<Self>
    where
        K: Resource + Serialize,
        K::DynamicType: Default,
    {
        let api = api_resource::<K>();
        let value = serde_json::to_value(resource)
            .map_err(|e| Error::serialization_for_kind(api.kind.clone(), e.to_string()))?;
        let obj: DynamicObject = serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind(api.kind.clone(), e.to_string()))?;
        Ok(Self::new(api, obj))
    }

    /// Deserialize into a typed resource
    pub fn to_typed<K: DeserializeOwned>(&self) -> Result<K> {
        let value = serde_json::to_value(&self.obj)
            .map_err(|e| Error::serialization_for_kind(self.kind(), e.to_string()))?;
        serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind(self.kind(), e.to_string()))
    }

    /// Identity of this object
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            group: self.resource.group.clone(),
            kind: self.resource.kind.clone(),
            namespace: self.namespace().to_string(),
            name: self.name().to_string(),
        }
    }

    /// Kind
    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    /// Name, empty if unset
    pub fn name(&self) -> &str {
        self.obj.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace, empty if unset
    pub fn namespace(&self) -> &str {
        self.obj.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Opaque optimistic-concurrency token
    pub fn resource_version(&self) -> Option<&str> {
        self.obj.metadata.resource_version.as_deref()
    }

    /// Spec generation
    pub fn generation(&self) -> Option<i64> {
        self.obj.metadata.generation
    }

    /// True once the store has marked the object for deletion
    pub fn is_deleting(&self) -> bool {
        self.obj.metadata.deletion_timestamp.is_some()
    }

    /// Labels
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.obj.metadata.labels.clone().unwrap_or_default()
    }

    /// Set a label; returns true if it changed
    pub fn set_label(&mut self, key: &str, value: &str) -> bool {
        let labels = self.obj.metadata.labels.get_or_insert_with(BTreeMap::new);
        if labels.get(key).map(String::as_str) == Some(value) {
            return false;
        }
        labels.insert(key.to_string(), value.to_string());
        true
    }

    /// Annotation value
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.obj
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Whether the given finalizer is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.obj
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == finalizer))
    }

    /// Add the finalizer if absent; returns true if it was added
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.obj
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        true
    }

    /// Remove the finalizer if present; returns true if it was removed
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let Some(finalizers) = self.obj.metadata.finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        let removed = finalizers.len() != before;
        if finalizers.is_empty() {
            self.obj.metadata.finalizers = None;
        }
        removed
    }

    /// Controller owner reference pointing at this object
    pub fn controller_owner_ref(&self) -> Result<OwnerReference> {
        let uid = self.obj.metadata.uid.clone().ok_or_else(|| {
            Error::internal_with_context("ownership", format!("{} has no uid", self.key()))
        })?;
        Ok(OwnerReference {
            api_version: self.resource.api_version.clone(),
            kind: self.resource.kind.clone(),
            name: self.name().to_string(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }

    /// Set an owner reference, replacing any with the same uid; returns true on change
    pub fn set_owner(&mut self, owner: &OwnerReference) -> bool {
        let refs = self
            .obj
            .metadata
            .owner_references
            .get_or_insert_with(Vec::new);
        if let Some(existing) = refs.iter_mut().find(|r| r.uid == owner.uid) {
            if existing == owner {
                return false;
            }
            *existing = owner.clone();
            return true;
        }
        refs.push(owner.clone());
        true
    }

    /// Whether an owner reference with the given uid is present
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.obj
            .metadata
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.uid == uid))
    }

    /// The `status` field of the object, if any
    pub fn status(&self) -> Option<&Value> {
        self.obj.data.get("status")
    }

    /// Replace the `status` field
    pub fn set_status(&mut self, status: Value) {
        match self.obj.data.as_object_mut() {
            Some(map) => {
                map.insert("status".to_string(), status);
            }
            None => self.obj.data = serde_json::json!({ "status": status }),
        }
    }

    /// Reference used when publishing events about this object
    pub fn object_ref(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(self.resource.api_version.clone()),
            kind: Some(self.resource.kind.clone()),
            name: self.obj.metadata.name.clone(),
            namespace: self.obj.metadata.namespace.clone(),
            uid: self.obj.metadata.uid.clone(),
            resource_version: self.obj.metadata.resource_version.clone(),
            ..Default::default()
        }
    }

    /// Equal in everything except store-populated metadata
    pub fn semantic_eq(&self, other: &ManagedObject) -> bool {
        self.resource == other.resource && normalized(&self.obj) == normalized(&other.obj)
    }

    /// Equal `status` fields
    pub fn status_eq(&self, other: &ManagedObject) -> bool {
        self.status() == other.status()
    }
}

fn normalized(obj: &DynamicObject) -> Value {
    let mut value = serde_json::to_value(obj).unwrap_or(Value::Null);
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in VOLATILE_METADATA {
            meta.remove(*field);
        }
    }
    value
}

/// Keyed maps owned outright by the desired object
///
/// Live keys missing from desired are dropped at these paths instead of
/// surviving the overlay.
const REPLACED_FIELDS: &[&[&str]] = &[
    &["data"],
    &["binaryData"],
    &["stringData"],
    &["spec", "selector"],
];

/// Overlay the desired object onto a copy of the live one
///
/// Objects merge key by key, arrays of equal length merge element-wise and
/// any other value in `desired` replaces the live value. Fields the store
/// populated and `desired` leaves out survive, so comparing the result with
/// `live` only reports differences the caller actually asked for. The maps
/// in [`REPLACED_FIELDS`] are taken from `desired` whole.
pub fn merge_desired(live: &ManagedObject, desired: &ManagedObject) -> Result<ManagedObject> {
    let mut base = serde_json::to_value(&live.obj)?;
    let overlay_value = serde_json::to_value(&desired.obj)?;
    overlay(&mut base, &overlay_value);
    for path in REPLACED_FIELDS {
        replace_at(&mut base, &overlay_value, path);
    }
    let obj: DynamicObject = serde_json::from_value(base)?;
    Ok(ManagedObject::new(live.resource.clone(), obj))
}

fn replace_at(base: &mut Value, desired: &Value, path: &[&str]) {
    let Some((field, parents)) = path.split_last() else {
        return;
    };
    let Some(wanted) = path.iter().try_fold(desired, |v, k| v.get(*k)) else {
        return;
    };
    if wanted.is_null() {
        return;
    }
    let parent = parents.iter().try_fold(base, |v, k| v.get_mut(*k));
    if let Some(map) = parent.and_then(Value::as_object_mut) {
        map.insert((*field).to_string(), wanted.clone());
    }
}

fn overlay(base: &mut Value, desired: &Value) {
    match (base, desired) {
        (Value::Object(b), Value::Object(d)) => {
            for (k, v) in d {
                if v.is_null() {
                    continue;
                }
                match b.get_mut(k) {
                    Some(existing) => overlay(existing, v),
                    None => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (Value::Array(b), Value::Array(d)) if b.len() == d.len() => {
            for (bv, dv) in b.iter_mut().zip(d) {
                overlay(bv, dv);
            }
        }
        (b, d) => *b = d.clone(),
    }
}

/// Apply an RFC 7386 JSON merge patch in place
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                apply_merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str, data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_typed_conversion_keeps_identity() {
        let obj = ManagedObject::from_resource(&config_map("mysql-config", &[("my.cnf", "x")]))
            .expect("convert");
        assert_eq!(obj.kind(), "ConfigMap");
        assert_eq!(obj.key().message_key(), "ConfigMap/mysql-config");
        assert_eq!(obj.key().to_string(), "ConfigMap default/mysql-config");

        let back: ConfigMap = obj.to_typed().expect("back to typed");
        assert_eq!(
            back.data.and_then(|d| d.get("my.cnf").cloned()),
            Some("x".to_string())
        );
    }

    #[test]
    fn test_finalizer_helpers_are_idempotent() {
        let mut obj = ManagedObject::from_resource(&config_map("a", &[])).expect("convert");
        assert!(obj.add_finalizer("f"));
        assert!(!obj.add_finalizer("f"));
        assert!(obj.has_finalizer("f"));
        assert!(obj.remove_finalizer("f"));
        assert!(!obj.remove_finalizer("f"));
        assert!(obj.obj.metadata.finalizers.is_none());
    }

    #[test]
    fn test_set_owner_replaces_same_uid() {
        let mut obj = ManagedObject::from_resource(&config_map("a", &[])).expect("convert");
        let mut owner = OwnerReference {
            api_version: "apps.dbplane.io/v1alpha1".to_string(),
            kind: "Component".to_string(),
            name: "mysql".to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        };
        assert!(obj.set_owner(&owner));
        assert!(!obj.set_owner(&owner));
        owner.controller = Some(true);
        assert!(obj.set_owner(&owner));
        assert_eq!(obj.obj.metadata.owner_references.as_ref().map(Vec::len), Some(1));
        assert!(obj.is_owned_by("uid-1"));
    }

    #[test]
    fn test_semantic_eq_ignores_resource_version() {
        let a = ManagedObject::from_resource(&config_map("a", &[("k", "v")])).expect("convert");
        let mut b = a.clone();
        b.obj.metadata.resource_version = Some("42".to_string());
        b.obj.metadata.uid = Some("uid".to_string());
        assert!(a.semantic_eq(&b));

        let c = ManagedObject::from_resource(&config_map("a", &[("k", "other")])).expect("convert");
        assert!(!a.semantic_eq(&c));
    }

    #[test]
    fn test_merge_desired_keeps_server_fields() {
        let mut live = ManagedObject::from_resource(&config_map("a", &[("k", "v")])).expect("convert");
        live.obj.metadata.resource_version = Some("7".to_string());
        live.set_label("server", "populated");
        let desired = ManagedObject::from_resource(&config_map("a", &[("k", "v")])).expect("convert");

        let merged = merge_desired(&live, &desired).expect("merge");
        assert_eq!(merged, live);

        let desired = ManagedObject::from_resource(&config_map("a", &[("k", "new")])).expect("convert");
        let merged = merge_desired(&live, &desired).expect("merge");
        assert_eq!(merged.resource_version(), Some("7"));
        assert!(!merged.semantic_eq(&live));
    }

    #[test]
    fn test_merge_desired_drops_removed_data_keys() {
        let live = ManagedObject::from_resource(&config_map(
            "a",
            &[("extra.cnf", "x=1\n"), ("my.cnf", "[mysqld]\n")],
        ))
        .expect("convert");
        let desired =
            ManagedObject::from_resource(&config_map("a", &[("my.cnf", "[mysqld]\n")])).expect("convert");

        let merged = merge_desired(&live, &desired).expect("merge");
        let cm: ConfigMap = merged.to_typed().expect("typed");
        let keys: Vec<String> = cm.data.unwrap_or_default().into_keys().collect();
        assert_eq!(keys, vec!["my.cnf".to_string()]);
    }

    #[test]
    fn test_merge_desired_replaces_service_selector_keeps_cluster_ip() {
        use k8s_openapi::api::core::v1::{Service, ServiceSpec};

        let service = |selector: &[(&str, &str)], cluster_ip: Option<&str>| Service {
            metadata: ObjectMeta {
                name: Some("orders-mysql".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(
                    selector
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                cluster_ip: cluster_ip.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        };
        let live = ManagedObject::from_resource(&service(
            &[("app", "mysql"), ("role", "leader")],
            Some("10.0.0.7"),
        ))
        .expect("convert");
        let desired = ManagedObject::from_resource(&service(&[("app", "mysql")], None)).expect("convert");

        let merged: Service = merge_desired(&live, &desired)
            .expect("merge")
            .to_typed()
            .expect("typed");
        let spec = merged.spec.expect("spec");
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.0.0.7"));
        let selector = spec.selector.expect("selector");
        assert_eq!(selector.len(), 1);
        assert!(!selector.contains_key("role"));
    }

    #[test]
    fn test_merge_patch_removes_null_keys() {
        let mut target = serde_json::json!({"a": 1, "b": {"c": 2, "d": 3}});
        apply_merge_patch(&mut target, &serde_json::json!({"a": null, "b": {"c": 5}}));
        assert_eq!(target, serde_json::json!({"b": {"c": 5, "d": 3}}));
    }
}
