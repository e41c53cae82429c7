//! Persistence of managed objects in the control plane

use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};

use crate::crd::ManagedResource;
use crate::{Error, FIELD_MANAGER};

/// Read and write access to objects of one kind
///
/// `get` reports a missing object as `None`; updates report it as
/// [`Error::NotFound`].
#[async_trait]
pub trait ObjectStore<K: ManagedResource>: Send + Sync {
    /// Fetch the latest version of an object
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>;

    /// Replace metadata and spec (finalizers live here)
    async fn update(&self, obj: &K) -> Result<K, Error>;

    /// Write the status subresource
    async fn update_status(&self, obj: &K) -> Result<K, Error>;
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    /// Create a store using the given kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: ManagedResource> KubeStore<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for(&self, obj: &K) -> Api<K> {
        match obj.namespace() {
            Some(ns) => self.api(&ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

fn not_found_aware(err: kube::Error, what: impl FnOnce() -> String) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(what()),
        other => Error::Kube(other),
    }
}

#[async_trait]
impl<K: ManagedResource> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn update(&self, obj: &K) -> Result<K, Error> {
        let name = obj.name_any();
        self.api_for(obj)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| not_found_aware(e, || name.clone()))
    }

    async fn update_status(&self, obj: &K) -> Result<K, Error> {
        let name = obj.name_any();
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let patch = serde_json::json!({ "status": status });

        self.api_for(obj)
            .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| not_found_aware(e, || name.clone()))
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryStore;
