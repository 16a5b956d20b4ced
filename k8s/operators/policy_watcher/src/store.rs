/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/store.rs
*
* The object-store seam between the rule engine and the Kubernetes API.
*
* Architecture:
* - `ObjectStore` is the only way the engine reads or writes cluster state:
*   typed get/list plus RFC 7386 merge patches on the object and on its
*   status subresource. "Not found" is `Ok(None)` for reads and a silent
*   no-op for patches, so callers never have to special-case 404s.
* - `KubeStore` implements it on top of `kube::Api<DynamicObject>`, built from
*   the erased `ApiResource` of the requested type, so a single generic
*   implementation serves namespaced and cluster-scoped kinds alike. Objects
*   are parsed back into the typed form on the way out.
* - `MemoryStore` (tests only) keeps objects as JSON values and applies the
*   same merge-patch semantics, which lets reconciler scenarios run without
*   an API server.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

/// Any Kubernetes object the engine can read or patch.
pub trait Object:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static
{
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetches one object. `namespace` is `None` for cluster-scoped kinds.
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    /// Lists objects, optionally restricted to a namespace and a label selector
    /// in the usual `key=value,key2=value2` form.
    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>>;

    async fn merge_patch<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<()>;

    async fn merge_patch_status<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<()>;
}

/// `ObjectStore` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::erase::<K>(&());
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn parse<K: Object>(obj: DynamicObject) -> Result<K> {
    obj.try_parse::<K>()
        .map_err(|e| Error::InvalidObject(format!("{}: {}", K::kind(&()), e)))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await?
            .map(parse::<K>)
            .transpose()
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            lp = lp.labels(selector);
        }
        self.api::<K>(namespace)
            .list(&lp)
            .await?
            .items
            .into_iter()
            .map(parse::<K>)
            .collect()
    }

    async fn merge_patch<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<()> {
        let api = self.api::<K>(namespace);
        match api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind = %K::kind(&()), object_name = %name, "Patch target is gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn merge_patch_status<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<()> {
        let api = self.api::<K>(namespace);
        match api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind = %K::kind(&()), object_name = %name, "Status patch target is gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Renders a label map as a `key=value,...` selector.
pub fn label_selector<'a, I>(labels: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let rendered: Vec<String> = labels
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered.join(","))
    }
}

#[cfg(test)]
pub use memory::MemoryStore;

#[cfg(test)]
mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    type Key = (String, String, String);

    /// In-memory `ObjectStore` for tests.
    #[derive(Default)]
    pub struct MemoryStore {
        objects: Mutex<BTreeMap<Key, Value>>,
        patches: Mutex<Vec<(String, String, Value)>>,
        failure: Mutex<Option<String>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert<K: Object>(&self, obj: &K) {
            let meta = obj.meta();
            let key = (
                K::kind(&()).to_string(),
                meta.namespace.clone().unwrap_or_default(),
                meta.name.clone().unwrap_or_default(),
            );
            let mut value = serde_json::to_value(obj).unwrap();
            if let Some(map) = value.as_object_mut() {
                map.insert("apiVersion".into(), Value::String(K::api_version(&()).to_string()));
                map.insert("kind".into(), Value::String(K::kind(&()).to_string()));
            }
            self.objects.lock().unwrap().insert(key, value);
        }

        pub fn remove<K: Object>(&self, namespace: Option<&str>, name: &str) {
            self.objects.lock().unwrap().remove(&key::<K>(namespace, name));
        }

        /// Makes every subsequent call fail until `recover` is called.
        pub fn fail_with(&self, message: &str) {
            *self.failure.lock().unwrap() = Some(message.to_string());
        }

        pub fn recover(&self) {
            *self.failure.lock().unwrap() = None;
        }

        /// Patches applied so far as `(kind, name, body)`.
        pub fn patches(&self) -> Vec<(String, String, Value)> {
            self.patches.lock().unwrap().clone()
        }

        fn check(&self) -> Result<()> {
            match self.failure.lock().unwrap().as_ref() {
                Some(message) => Err(Error::Store(message.clone())),
                None => Ok(()),
            }
        }

        fn apply<K: Object>(&self, namespace: Option<&str>, name: &str, patch: &Value) -> Result<()> {
            self.check()?;
            self.patches.lock().unwrap().push((
                K::kind(&()).to_string(),
                name.to_string(),
                patch.clone(),
            ));
            let mut objects = self.objects.lock().unwrap();
            if let Some(target) = objects.get_mut(&key::<K>(namespace, name)) {
                merge(target, patch);
            }
            Ok(())
        }
    }

    fn key<K: Object>(namespace: Option<&str>, name: &str) -> Key {
        (
            K::kind(&()).to_string(),
            namespace.unwrap_or_default().to_string(),
            name.to_string(),
        )
    }

    fn matches_selector(value: &Value, selector: Option<&str>) -> bool {
        let Some(selector) = selector.filter(|s| !s.is_empty()) else {
            return true;
        };
        let labels = &value["metadata"]["labels"];
        selector.split(',').all(|term| match term.split_once('=') {
            Some((k, v)) => labels[k.trim()].as_str() == Some(v.trim()),
            None => !labels[term.trim()].is_null(),
        })
    }

    /// RFC 7386 JSON merge patch.
    pub fn merge(target: &mut Value, patch: &Value) {
        match patch {
            Value::Object(fields) => {
                if !target.is_object() {
                    *target = Value::Object(Default::default());
                }
                if let Some(map) = target.as_object_mut() {
                    for (k, v) in fields {
                        if v.is_null() {
                            map.remove(k);
                        } else {
                            merge(map.entry(k.clone()).or_insert(Value::Null), v);
                        }
                    }
                }
            }
            other => *target = other.clone(),
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
            self.check()?;
            let objects = self.objects.lock().unwrap();
            match objects.get(&key::<K>(namespace, name)) {
                Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
                None => Ok(None),
            }
        }

        async fn list<K: Object>(
            &self,
            namespace: Option<&str>,
            label_selector: Option<&str>,
        ) -> Result<Vec<K>> {
            self.check()?;
            let kind = K::kind(&()).to_string();
            let objects = self.objects.lock().unwrap();
            objects
                .iter()
                .filter(|((k, ns, _), _)| *k == kind && namespace.map_or(true, |want| want == ns.as_str()))
                .filter(|(_, value)| matches_selector(value, label_selector))
                .map(|(_, value)| Ok(serde_json::from_value(value.clone())?))
                .collect()
        }

        async fn merge_patch<K: Object>(
            &self,
            namespace: Option<&str>,
            name: &str,
            patch: &Value,
        ) -> Result<()> {
            self.apply::<K>(namespace, name, patch)
        }

        async fn merge_patch_status<K: Object>(
            &self,
            namespace: Option<&str>,
            name: &str,
            patch: &Value,
        ) -> Result<()> {
            self.apply::<K>(namespace, name, patch)
        }
    }

    mod tests {
        use super::*;
        use k8s_openapi::api::core::v1::Secret;
        use kube::api::ObjectMeta;
        use serde_json::json;

        fn secret(ns: &str, name: &str, labels: &[(&str, &str)]) -> Secret {
            Secret {
                metadata: ObjectMeta {
                    namespace: Some(ns.into()),
                    name: Some(name.into()),
                    labels: Some(
                        labels
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    ),
                    ..Default::default()
                },
                ..Default::default()
            }
        }

        #[test]
        fn test_merge_patch_removes_null_keys() {
            let mut target = json!({"status": {"violations": {"a/x": "t1", "a/y": "t2"}}});
            merge(&mut target, &json!({"status": {"violations": {"a/x": null, "a/z": "t3"}}}));
            assert_eq!(target, json!({"status": {"violations": {"a/y": "t2", "a/z": "t3"}}}));
        }

        #[tokio::test]
        async fn test_list_filters_namespace_and_labels() {
            let store = MemoryStore::new();
            store.insert(&secret("a", "one", &[("team", "core")]));
            store.insert(&secret("a", "two", &[("team", "web")]));
            store.insert(&secret("b", "three", &[("team", "core")]));

            let all: Vec<Secret> = store.list(None, None).await.unwrap();
            assert_eq!(all.len(), 3);

            let core_in_a: Vec<Secret> = store.list(Some("a"), Some("team=core")).await.unwrap();
            assert_eq!(core_in_a.len(), 1);
            assert_eq!(core_in_a[0].metadata.name.as_deref(), Some("one"));
        }

        #[test]
        fn test_dynamic_objects_parse_into_typed_kinds() {
            assert_eq!(ApiResource::erase::<Secret>(&()).plural, "secrets");

            let obj: DynamicObject = serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {"namespace": "a", "name": "one"},
                "type": "Opaque"
            }))
            .unwrap();
            let secret: Secret = parse(obj).unwrap();
            assert_eq!(secret.metadata.name.as_deref(), Some("one"));
            assert_eq!(secret.type_.as_deref(), Some("Opaque"));

            let broken: DynamicObject = serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"namespace": "a", "name": "web-0"},
                "spec": {"containers": "none"}
            }))
            .unwrap();
            let err = parse::<k8s_openapi::api::core::v1::Pod>(broken).unwrap_err();
            assert!(matches!(err, Error::InvalidObject(_)));
        }

        #[tokio::test]
        async fn test_missing_object_is_none_and_failures_propagate() {
            let store = MemoryStore::new();
            let missing: Option<Secret> = store.get(Some("a"), "nope").await.unwrap();
            assert!(missing.is_none());

            store.fail_with("connection refused");
            let err = store.get::<Secret>(Some("a"), "nope").await.unwrap_err();
            assert!(matches!(err, Error::Store(_)));
        }
    }
}
