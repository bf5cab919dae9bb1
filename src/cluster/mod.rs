//! Cluster resource adapter
//!
//! [`ClusterClient`] is the only way the reconciler and the admin API touch
//! the cluster. The production implementation is [`KubeClusterClient`]; tests
//! substitute mocks or in-memory fakes.

mod client;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::WatchEvent;
use kube::ResourceExt;

#[cfg(test)]
use mockall::automock;

use crate::manifest::{ManifestDocument, ResourceKind};
use crate::Error;

pub use client::{create_client, KubeClusterClient};

/// Resource version that starts a watch from current state; every existing
/// object is delivered as [`EventKind::Added`] first
pub const INITIAL_RESOURCE_VERSION: &str = "0";

/// Stream of configuration-object lifecycle events
pub type EventStream = BoxStream<'static, Result<LifecycleEvent, Error>>;

/// What happened to a configuration object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// The object was created (or already existed when the watch started)
    Added,
    /// The object changed
    Modified,
    /// The object was removed
    Deleted,
}

/// A lifecycle event for a configuration object
#[derive(Clone, Debug, PartialEq)]
pub struct LifecycleEvent {
    /// What happened
    pub kind: EventKind,
    /// The object as observed with the event
    pub object: ConfigMap,
}

impl LifecycleEvent {
    /// Create an event
    pub fn new(kind: EventKind, object: ConfigMap) -> Self {
        Self { kind, object }
    }

    /// Convert a raw watch event.
    ///
    /// Bookmarks and server-side error objects carry no ConfigMap and
    /// produce `None`.
    pub fn from_watch_event(event: WatchEvent<ConfigMap>) -> Option<Self> {
        match event {
            WatchEvent::Added(cm) => Some(Self::new(EventKind::Added, cm)),
            WatchEvent::Modified(cm) => Some(Self::new(EventKind::Modified, cm)),
            WatchEvent::Deleted(cm) => Some(Self::new(EventKind::Deleted, cm)),
            WatchEvent::Bookmark(_) | WatchEvent::Error(_) => None,
        }
    }

    /// Resource version the object carried with this event
    pub fn resource_version(&self) -> Option<&str> {
        self.object
            .metadata
            .resource_version
            .as_deref()
            .filter(|version| !version.is_empty())
    }

    /// `(namespace, name)` of the object, if both are set
    pub fn identity(&self) -> Option<(String, String)> {
        let name = self.object.metadata.name.clone()?;
        let namespace = self.object.namespace()?;
        Some((namespace, name))
    }
}

/// Map a raw watch item onto the event stream.
///
/// A 410 error object means the requested resource version is gone and is
/// surfaced as [`Error::WatchExpired`]; other error objects and bookmarks are
/// dropped.
pub fn map_watch_event(event: WatchEvent<ConfigMap>) -> Option<Result<LifecycleEvent, Error>> {
    match event {
        WatchEvent::Error(response) if response.code == 410 => {
            Some(Err(Error::watch_expired("ConfigMap", response.message)))
        }
        other => LifecycleEvent::from_watch_event(other).map(Ok),
    }
}

/// Operations the provisioner performs against the cluster
///
/// Implementations report a missing object as [`Error::NotFound`] so callers
/// can branch on [`Error::is_not_found`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Open a cluster-wide watch on ConfigMaps starting after `resource_version`
    ///
    /// Pass [`INITIAL_RESOURCE_VERSION`] to start from current state. An error
    /// here means the watch could not be established at all;
    /// [`Error::WatchExpired`] means the version is too old to resume from.
    async fn watch_config_maps(&self, resource_version: &str) -> Result<EventStream, Error>;

    /// List ConfigMaps in all namespaces
    async fn list_config_maps(&self) -> Result<Vec<ConfigMap>, Error>;

    /// Fetch a single ConfigMap
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, Error>;

    /// Replace the `data` of an existing ConfigMap
    async fn replace_config_map_data(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Delete a ConfigMap
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Fetch the live object of a managed kind
    async fn get_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ManifestDocument, Error>;

    /// Create a resource from a manifest document (namespace must be set)
    async fn create_resource(&self, document: &ManifestDocument) -> Result<(), Error>;

    /// Replace an existing resource with the full manifest document
    async fn replace_resource(&self, document: &ManifestDocument) -> Result<(), Error>;

    /// Set the replica count of a StatefulSet through its scale subresource
    async fn scale_workload(&self, namespace: &str, name: &str, replicas: i32)
        -> Result<(), Error>;

    /// Names of pods matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<String>, Error>;

    /// Delete a resource of a managed kind
    async fn delete_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::ErrorResponse;

    fn config_map(namespace: Option<&str>, name: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                namespace: namespace.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn watch_events_map_to_lifecycle_events() {
        let cm = config_map(Some("default"), Some("test-cm"));

        let added = LifecycleEvent::from_watch_event(WatchEvent::Added(cm.clone())).unwrap();
        assert_eq!(added.kind, EventKind::Added);
        let modified = LifecycleEvent::from_watch_event(WatchEvent::Modified(cm.clone())).unwrap();
        assert_eq!(modified.kind, EventKind::Modified);
        let deleted = LifecycleEvent::from_watch_event(WatchEvent::Deleted(cm)).unwrap();
        assert_eq!(deleted.kind, EventKind::Deleted);
    }

    #[test]
    fn error_watch_events_are_not_lifecycle_events() {
        let event = WatchEvent::Error(ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version".to_string(),
            reason: "Expired".to_string(),
            code: 410,
        });
        assert!(LifecycleEvent::from_watch_event(event).is_none());
    }

    #[test]
    fn expired_watch_error_is_surfaced() {
        let event = WatchEvent::Error(ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version: 12 (40)".to_string(),
            reason: "Expired".to_string(),
            code: 410,
        });
        let err = map_watch_event(event).unwrap().unwrap_err();
        assert!(err.is_watch_expired());
    }

    #[test]
    fn other_watch_errors_are_dropped() {
        let event = WatchEvent::Error(ErrorResponse {
            status: "Failure".to_string(),
            message: "internal".to_string(),
            reason: "InternalError".to_string(),
            code: 500,
        });
        assert!(map_watch_event(event).is_none());
    }

    #[test]
    fn resource_version_ignores_empty_values() {
        let mut cm = config_map(Some("default"), Some("test-cm"));
        let event = LifecycleEvent::new(EventKind::Modified, cm.clone());
        assert_eq!(event.resource_version(), None);

        cm.metadata.resource_version = Some(String::new());
        assert_eq!(LifecycleEvent::new(EventKind::Modified, cm.clone()).resource_version(), None);

        cm.metadata.resource_version = Some("4711".to_string());
        assert_eq!(LifecycleEvent::new(EventKind::Modified, cm).resource_version(), Some("4711"));
    }

    #[test]
    fn identity_requires_name_and_namespace() {
        let full = LifecycleEvent::new(
            EventKind::Deleted,
            config_map(Some("default"), Some("test-cm")),
        );
        assert_eq!(
            full.identity(),
            Some(("default".to_string(), "test-cm".to_string()))
        );

        let nameless = LifecycleEvent::new(EventKind::Deleted, config_map(Some("default"), None));
        assert!(nameless.identity().is_none());
        let cluster_scoped = LifecycleEvent::new(EventKind::Deleted, config_map(None, Some("x")));
        assert!(cluster_scoped.identity().is_none());
    }
}
