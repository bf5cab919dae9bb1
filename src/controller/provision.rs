//! Provisioning path: template → artifact → per-document upsert

use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, error, info, instrument, warn};

use super::Reconciler;
use crate::manifest::{ManifestDecoder, ManifestDocument, ResourceKind};
use crate::template::{TemplateError, DEFAULT_NAMESPACE};
use crate::Error;

/// What an upsert did to the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertAction {
    /// The resource did not exist and was created
    Created,
    /// The resource existed and was replaced
    Updated,
}

/// A resource written during a provisioning pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedResource {
    /// Resource kind
    pub kind: ResourceKind,
    /// Namespace the resource was written to
    pub namespace: String,
    /// Resource name
    pub name: String,
    /// Whether it was created or replaced
    pub action: UpsertAction,
}

/// Outcome of one provisioning pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Successfully written resources, in document order
    pub applied: Vec<AppliedResource>,
    /// Documents whose lookup, create or replace failed
    pub failed: usize,
    /// Documents that could not be decoded
    pub skipped: usize,
}

impl ProvisionReport {
    /// Number of created resources
    pub fn created(&self) -> usize {
        self.count(UpsertAction::Created)
    }

    /// Number of replaced resources
    pub fn updated(&self) -> usize {
        self.count(UpsertAction::Updated)
    }

    fn count(&self, action: UpsertAction) -> usize {
        self.applied.iter().filter(|r| r.action == action).count()
    }
}

impl Reconciler {
    /// Render the template for `trigger` and upsert every decoded document.
    ///
    /// # Errors
    ///
    /// Fails before touching any managed resource when the template cannot
    /// be loaded or rendered, or the artifact cannot be written. Per-document
    /// failures are counted in the report instead.
    #[instrument(skip_all)]
    pub async fn provision(&self, trigger: &ConfigMap) -> Result<ProvisionReport, Error> {
        let template = self.load_template().await?;
        let rendered = self.engine.render(&template, &self.config.render)?;
        self.artifacts.write(&rendered).await?;
        debug!(bytes = rendered.len(), "Rendered manifest written");

        let fallback_namespace = trigger
            .metadata
            .namespace
            .as_deref()
            .unwrap_or(DEFAULT_NAMESPACE);

        let mut report = ProvisionReport::default();
        for decoded in ManifestDecoder::new(&rendered) {
            let document = match decoded {
                Ok(document) => document.default_namespace(fallback_namespace),
                Err(e) => {
                    warn!(error = %e, "Skipping manifest document");
                    report.skipped += 1;
                    continue;
                }
            };

            let namespace = document.namespace().unwrap_or(fallback_namespace).to_string();
            let name = document.name().to_string();
            let kind = document.kind();

            match self.upsert(&document).await {
                Ok(action) => {
                    info!(%kind, %namespace, %name, ?action, "Applied resource");
                    report.applied.push(AppliedResource {
                        kind,
                        namespace,
                        name,
                        action,
                    });
                }
                Err(e) => {
                    error!(%kind, %namespace, %name, error = %e, "Failed to apply resource");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn load_template(&self) -> Result<String, Error> {
        let location = &self.config.template;
        let source = self
            .cluster
            .get_config_map(&location.namespace, &location.name)
            .await
            .map_err(|e| TemplateError::source_unavailable(location.to_string(), e))?;

        source
            .data
            .and_then(|mut data| data.remove(&location.key))
            .ok_or_else(|| TemplateError::missing_key(location.to_string(), &location.key).into())
    }

    /// Get, then create if absent or replace if present
    async fn upsert(&self, document: &ManifestDocument) -> Result<UpsertAction, Error> {
        let namespace = document.namespace().unwrap_or_default();
        match self
            .cluster
            .get_resource(document.kind(), namespace, document.name())
            .await
        {
            Ok(_) => {
                self.cluster.replace_resource(document).await?;
                Ok(UpsertAction::Updated)
            }
            Err(e) if e.is_not_found() => {
                self.cluster.create_resource(document).await?;
                Ok(UpsertAction::Created)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MockArtifactSink;
    use crate::clock::MockClock;
    use crate::cluster::MockClusterClient;
    use crate::controller::test_support::*;
    use mockall::Sequence;
    use std::sync::{Arc, Mutex};

    fn serving_template(cluster: &mut MockClusterClient, template: String) {
        cluster
            .expect_get_config_map()
            .withf(|ns, name| ns == "template-namespace" && name == "db-template")
            .times(1)
            .returning(move |_, _| Ok(template_config_map(&template)));
    }

    fn accepting_artifacts() -> (MockArtifactSink, Arc<Mutex<Vec<String>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        let mut artifacts = MockArtifactSink::new();
        artifacts.expect_write().returning(move |contents| {
            sink.lock().unwrap().push(contents.to_string());
            Ok(())
        });
        (artifacts, written)
    }

    fn existing(kind: ResourceKind, ns: &str, name: &str) -> Result<ManifestDocument, Error> {
        let api_version = match kind {
            ResourceKind::Workload => "apps/v1",
            _ => "v1",
        };
        let value = serde_json::json!({
            "apiVersion": api_version,
            "kind": kind.as_kind(),
            "metadata": { "name": name, "namespace": ns },
        });
        ManifestDocument::from_value(value)
            .map_err(|e| Error::internal_with_context("test", e.to_string()))
    }

    // =========================================================================
    // Upsert
    // =========================================================================

    #[tokio::test]
    async fn absent_resources_are_created_in_decode_order() {
        let mut cluster = MockClusterClient::new();
        serving_template(&mut cluster, three_document_template());

        let mut seq = Sequence::new();
        for kind in [
            ResourceKind::Workload,
            ResourceKind::NetworkEndpoint,
            ResourceKind::VolumeClaim,
        ] {
            cluster
                .expect_get_resource()
                .withf(move |k, ns, name| *k == kind && ns == "default" && name == "mycluster")
                .times(1)
                .in_sequence(&mut seq)
                .returning(|k, ns, name| Err(Error::not_found(k.as_kind(), ns, name)));
            cluster
                .expect_create_resource()
                .withf(move |doc| doc.kind() == kind && doc.namespace() == Some("default"))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }
        cluster.expect_replace_resource().never();

        let (artifacts, written) = accepting_artifacts();
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let report = reconciler.provision(&trigger("default", "test-cm")).await.unwrap();

        assert_eq!(report.created(), 3);
        assert_eq!(report.updated(), 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 0);
        let kinds: Vec<_> = report.applied.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, ResourceKind::TEARDOWN_ORDER.to_vec());

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].contains("kind: StatefulSet"));
        assert!(written[0].contains("name: mycluster"));
        assert!(written[0].contains("serviceAccountName: my-service-account"));
    }

    #[tokio::test]
    async fn existing_resources_are_replaced_not_created() {
        let mut cluster = MockClusterClient::new();
        serving_template(&mut cluster, three_document_template());
        cluster
            .expect_get_resource()
            .times(3)
            .returning(|kind, ns, name| existing(kind, ns, name));
        cluster.expect_create_resource().never();
        cluster
            .expect_replace_resource()
            .times(3)
            .returning(|_| Ok(()));

        let (artifacts, _) = accepting_artifacts();
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let report = reconciler.provision(&trigger("default", "test-cm")).await.unwrap();
        assert_eq!(report.updated(), 3);
        assert_eq!(report.created(), 0);
    }

    #[tokio::test]
    async fn missing_namespace_falls_back_to_trigger_namespace() {
        let mut cluster = MockClusterClient::new();
        serving_template(
            &mut cluster,
            "apiVersion: v1\nkind: PersistentVolumeClaim\nmetadata:\n  name: data\n".to_string(),
        );
        cluster
            .expect_get_resource()
            .withf(|_, ns, _| ns == "team-a")
            .times(1)
            .returning(|k, ns, name| Err(Error::not_found(k.as_kind(), ns, name)));
        cluster
            .expect_create_resource()
            .withf(|doc| doc.namespace() == Some("team-a"))
            .times(1)
            .returning(|_| Ok(()));

        let (artifacts, _) = accepting_artifacts();
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let report = reconciler.provision(&trigger("team-a", "db")).await.unwrap();
        assert_eq!(report.applied[0].namespace, "team-a");
    }

    #[tokio::test]
    async fn create_failure_does_not_abort_later_documents() {
        let mut cluster = MockClusterClient::new();
        serving_template(&mut cluster, three_document_template());
        cluster
            .expect_get_resource()
            .times(3)
            .returning(|k, ns, name| Err(Error::not_found(k.as_kind(), ns, name)));
        cluster
            .expect_create_resource()
            .times(3)
            .returning(|doc| match doc.kind() {
                ResourceKind::Workload => {
                    Err(Error::internal_with_context("create", "quota exceeded"))
                }
                _ => Ok(()),
            });

        let (artifacts, _) = accepting_artifacts();
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let report = reconciler.provision(&trigger("default", "test-cm")).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.created(), 2);
    }

    #[tokio::test]
    async fn lookup_errors_other_than_not_found_skip_the_document() {
        let mut cluster = MockClusterClient::new();
        serving_template(&mut cluster, three_document_template());
        cluster
            .expect_get_resource()
            .times(3)
            .returning(|kind, ns, name| match kind {
                ResourceKind::NetworkEndpoint => {
                    Err(Error::internal_with_context("get", "connection reset"))
                }
                _ => Err(Error::not_found(kind.as_kind(), ns, name)),
            });
        cluster
            .expect_create_resource()
            .withf(|doc| doc.kind() != ResourceKind::NetworkEndpoint)
            .times(2)
            .returning(|_| Ok(()));
        cluster.expect_replace_resource().never();

        let (artifacts, _) = accepting_artifacts();
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let report = reconciler.provision(&trigger("default", "test-cm")).await.unwrap();
        assert_eq!(report.created(), 2);
        assert_eq!(report.failed, 1);
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    #[tokio::test]
    async fn malformed_document_is_skipped_and_decoding_continues() {
        let template = format!(
            "{STATEFULSET_DOC}---\nkind: [unclosed\n---\nkind: ConfigMap\nmetadata:\n  name: x\n---\n{PVC_DOC}"
        );
        let mut cluster = MockClusterClient::new();
        serving_template(&mut cluster, template);
        cluster
            .expect_get_resource()
            .times(2)
            .returning(|k, ns, name| Err(Error::not_found(k.as_kind(), ns, name)));
        cluster
            .expect_create_resource()
            .times(2)
            .returning(|_| Ok(()));

        let (artifacts, _) = accepting_artifacts();
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let report = reconciler.provision(&trigger("default", "test-cm")).await.unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.created(), 2);
        assert_eq!(report.applied[1].kind, ResourceKind::VolumeClaim);
    }

    // =========================================================================
    // Early exits
    // =========================================================================

    #[tokio::test]
    async fn missing_template_object_abandons_the_event() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_get_config_map()
            .times(1)
            .returning(|ns, name| Err(Error::not_found("ConfigMap", ns, name)));

        let mut artifacts = MockArtifactSink::new();
        artifacts.expect_write().never();
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let err = reconciler
            .provision(&trigger("default", "test-cm"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Template(TemplateError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn missing_template_key_abandons_the_event() {
        let mut cluster = MockClusterClient::new();
        cluster.expect_get_config_map().times(1).returning(|_, _| {
            Ok(config_map(
                "template-namespace",
                "db-template",
                &[],
                &[("other.yaml", "kind: Service")],
            ))
        });

        let mut artifacts = MockArtifactSink::new();
        artifacts.expect_write().never();
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let err = reconciler
            .provision(&trigger("default", "test-cm"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Template(TemplateError::MissingKey { .. })));
        assert!(err.to_string().contains("db.yaml"));
    }

    #[tokio::test]
    async fn render_error_abandons_the_event() {
        let mut cluster = MockClusterClient::new();
        serving_template(&mut cluster, "name: {{ .UNKNOWN }}\n".to_string());

        let mut artifacts = MockArtifactSink::new();
        artifacts.expect_write().never();
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let err = reconciler
            .provision(&trigger("default", "test-cm"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Template(TemplateError::Render(_))));
    }

    #[tokio::test]
    async fn artifact_write_failure_abandons_before_any_upsert() {
        let mut cluster = MockClusterClient::new();
        serving_template(&mut cluster, three_document_template());
        cluster.expect_get_resource().never();

        let mut artifacts = MockArtifactSink::new();
        artifacts.expect_write().times(1).returning(|_| {
            Err(Error::Artifact {
                path: "/tmp/generated-db.yaml".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            })
        });
        let reconciler = reconciler(cluster, artifacts, MockClock::new());

        let err = reconciler
            .provision(&trigger("default", "test-cm"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact { .. }));
    }
}
