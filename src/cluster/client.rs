//! kube-rs implementation of [`ClusterClient`]

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{map_watch_event, ClusterClient, EventStream};
use crate::manifest::{ManifestDocument, ResourceKind};
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
///
/// Must exceed the server-side watch timeout so long-lived watches are not
/// cut by the client.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(330);

/// Create a kube client from an optional kubeconfig path
///
/// Without a path the configuration is inferred: in-cluster service account
/// first, then the local kubeconfig.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Field manager / owner string used for writes
const FIELD_MANAGER: &str = "db-provisioner";

/// Params for merge patches: named field manager, not server-side apply
fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Cluster adapter backed by a kube-rs [`Client`]
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap an existing kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create_typed<K>(&self, resource: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let (namespace, name) = identity_of(resource)?;
        self.api::<K>(&namespace)
            .create(&PostParams::default(), resource)
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, K::kind(&()), namespace.as_str(), name.as_str()))
    }

    async fn replace_typed<K>(&self, resource: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let (namespace, name) = identity_of(resource)?;
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), resource)
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, K::kind(&()), namespace.as_str(), name.as_str()))
    }

    async fn delete_typed<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, K::kind(&()), namespace, name))
    }

    async fn get_typed<K>(&self, namespace: &str, name: &str) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, K::kind(&()), namespace, name))
    }
}

fn identity_of<K: Resource>(resource: &K) -> Result<(String, String), Error> {
    let meta = resource.meta();
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(namespace), Some(name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace.to_string(), name.to_string()))
        }
        _ => Err(Error::internal_with_context(
            "apply",
            "manifest document has no namespace/name",
        )),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn watch_config_maps(&self, resource_version: &str) -> Result<EventStream, Error> {
        let api: Api<ConfigMap> = Api::all(self.client.clone());
        let stream = api
            .watch(&WatchParams::default(), resource_version)
            .await
            .map_err(|e| Error::from_kube(e, "ConfigMap", "*", ""))?;

        debug!(resource_version, "ConfigMap watch established");

        Ok(stream
            .filter_map(|item| {
                future::ready(match item {
                    Ok(event) => map_watch_event(event),
                    Err(e) => Some(Err(Error::from_kube(e, "ConfigMap", "*", ""))),
                })
            })
            .boxed())
    }

    async fn list_config_maps(&self) -> Result<Vec<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| Error::from_kube(e, "ConfigMap", "*", ""))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, Error> {
        self.get_typed::<ConfigMap>(namespace, name).await
    }

    async fn replace_config_map_data(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let mut cm = self.get_typed::<ConfigMap>(namespace, name).await?;
        cm.data = Some(data);
        self.replace_typed(&cm).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete_typed::<ConfigMap>(namespace, name).await
    }

    async fn get_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ManifestDocument, Error> {
        Ok(match kind {
            ResourceKind::Workload => ManifestDocument::StatefulSet(Box::new(
                self.get_typed::<StatefulSet>(namespace, name).await?,
            )),
            ResourceKind::NetworkEndpoint => ManifestDocument::Service(Box::new(
                self.get_typed::<Service>(namespace, name).await?,
            )),
            ResourceKind::VolumeClaim => ManifestDocument::PersistentVolumeClaim(Box::new(
                self.get_typed::<PersistentVolumeClaim>(namespace, name).await?,
            )),
        })
    }

    async fn create_resource(&self, document: &ManifestDocument) -> Result<(), Error> {
        match document {
            ManifestDocument::StatefulSet(r) => self.create_typed(r.as_ref()).await,
            ManifestDocument::Service(r) => self.create_typed(r.as_ref()).await,
            ManifestDocument::PersistentVolumeClaim(r) => self.create_typed(r.as_ref()).await,
        }
    }

    async fn replace_resource(&self, document: &ManifestDocument) -> Result<(), Error> {
        match document {
            ManifestDocument::StatefulSet(r) => self.replace_typed(r.as_ref()).await,
            ManifestDocument::Service(r) => self.replace_typed(r.as_ref()).await,
            ManifestDocument::PersistentVolumeClaim(r) => self.replace_typed(r.as_ref()).await,
        }
    }

    async fn scale_workload(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.api::<StatefulSet>(namespace)
            .patch_scale(name, &patch_params(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, "StatefulSet", namespace, name))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>, Error> {
        let pods = self
            .api::<Pod>(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| Error::from_kube(e, "Pod", namespace, ""))?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        match kind {
            ResourceKind::Workload => self.delete_typed::<StatefulSet>(namespace, name).await,
            ResourceKind::NetworkEndpoint => self.delete_typed::<Service>(namespace, name).await,
            ResourceKind::VolumeClaim => {
                self.delete_typed::<PersistentVolumeClaim>(namespace, name)
                    .await
            }
        }
    }
}
