//! Reading and updating the Kubernetes objects that the reconcilers act on.
//!
//! The reconcilers only go through [`ObjectStore`] and [`EventPublisher`], so that they can be
//! exercised against in-memory implementations.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::ObjectReference, ClusterResourceScope, NamespaceResourceScope,
    },
    kube::{
        self,
        api::{DynamicObject, Patch, PatchParams},
        runtime::{
            events::{Event, EventType, Recorder},
            reflector::ObjectRef,
        },
        Api, Resource,
    },
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get {object}"))]
    Get {
        source: kube::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("object has no name"))]
    NoName,

    #[snafu(display("failed to serialize status of {object}"))]
    SerializeStatus {
        source: serde_json::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to update status of {object}"))]
    UpdateStatus {
        source: kube::Error,
        object: ObjectRef<DynamicObject>,
    },
}

#[async_trait]
pub trait ObjectStore<K: Resource>: Send + Sync {
    /// Fetches the current state of `object`, or `None` if it does not exist (anymore).
    async fn get(&self, object: &ObjectRef<K>) -> Result<Option<K>, Error>;

    /// Persists the status of `object`.
    ///
    /// Fails if `object` has been modified since it was fetched.
    async fn update_status(&self, object: &K) -> Result<(), Error>;
}

/// [`ObjectStore`] backed by the Kubernetes API.
pub struct KubeStore<K> {
    client: kube::Client,
    api_for: fn(kube::Client, Option<&str>) -> Api<K>,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    pub fn namespaced(client: kube::Client) -> Self {
        Self {
            client,
            api_for: |client, namespace: Option<&str>| match namespace {
                Some(namespace) => Api::namespaced(client, namespace),
                None => Api::all(client),
            },
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = ClusterResourceScope>,
{
    pub fn cluster(client: kube::Client) -> Self {
        Self {
            client,
            api_for: |client, _namespace: Option<&str>| Api::all(client),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync,
{
    async fn get(&self, object: &ObjectRef<K>) -> Result<Option<K>, Error> {
        (self.api_for)(self.client.clone(), object.namespace.as_deref())
            .get_opt(&object.name)
            .await
            .with_context(|_| GetSnafu {
                object: object.clone().erase(),
            })
    }

    async fn update_status(&self, object: &K) -> Result<(), Error> {
        let meta = object.meta();
        let name = meta.name.as_deref().context(NoNameSnafu)?;
        let object_ref = || ObjectRef::from_obj(object).erase();
        let status = serde_json::to_value(object)
            .with_context(|_| SerializeStatusSnafu {
                object: object_ref(),
            })?
            .get_mut("status")
            .map(serde_json::Value::take)
            .filter(|status| !status.is_null())
            .unwrap_or_else(|| serde_json::json!({}));
        // The resourceVersion makes the patch fail if the object changed since it was read.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": meta.resource_version },
            "status": status,
        });
        (self.api_for)(self.client.clone(), meta.namespace.as_deref())
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|_| UpdateStatusSnafu {
                object: object_ref(),
            })?;
        Ok(())
    }
}

/// Records Kubernetes events about the objects being reconciled.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        reference: &ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), kube::Error>;
}

#[async_trait]
impl EventPublisher for Recorder {
    async fn publish(
        &self,
        reference: &ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), kube::Error> {
        Recorder::publish(
            self,
            &Event {
                type_: event_type,
                reason: reason.to_string(),
                note: Some(message.to_string()),
                action: reason.to_string(),
                secondary: None,
            },
            reference,
        )
        .await
    }
}
