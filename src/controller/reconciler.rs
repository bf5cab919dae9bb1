//! Event loop and dispatch

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::artifact::ArtifactSink;
use crate::clock::Clock;
use crate::cluster::{
    ClusterClient, EventKind, EventStream, LifecycleEvent, INITIAL_RESOURCE_VERSION,
};
use crate::config::{ProvisionerConfig, TRIGGER_VALUE};
use crate::template::TemplateEngine;
use crate::Error;

/// Why the event loop returned
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The stop signal fired
    Stopped,
    /// The event stream ended
    StreamClosed {
        /// Resource version to resume the next watch from; `None` when the
        /// watch must start over from current state
        resume_from: Option<String>,
    },
}

/// Result of handling a single event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event was not relevant (no trigger annotation, no identity)
    Ignored,
    /// The event was processed; failures, if any, were logged
    Handled,
    /// The stop signal fired while the event was being processed
    Interrupted,
}

/// Consumes ConfigMap lifecycle events and drives provisioning and teardown
///
/// Holds no state between events; everything it knows about the cluster is
/// read through the [`ClusterClient`] when an event is handled.
pub struct Reconciler {
    pub(super) cluster: Arc<dyn ClusterClient>,
    pub(super) artifacts: Arc<dyn ArtifactSink>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) engine: TemplateEngine,
    pub(super) config: ProvisionerConfig,
}

impl Reconciler {
    /// Create a reconciler from its collaborators
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        artifacts: Arc<dyn ArtifactSink>,
        clock: Arc<dyn Clock>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            cluster,
            artifacts,
            clock,
            engine: TemplateEngine::new(),
            config,
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Open the ConfigMap watch and process events until stopped or closed.
    ///
    /// With `resume_from` set the watch continues after that resource
    /// version, so objects are not replayed and deletions that happened
    /// between watches are still delivered. Without it, or when the server
    /// reports the version as expired, existing ConfigMaps are listed and the
    /// watch starts from current state.
    ///
    /// The watch is not re-established when the stream ends; the caller
    /// decides whether to run again, passing on the version from
    /// [`LoopExit::StreamClosed`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the watch cannot be opened. Failures while
    /// handling individual events are logged and never surface here.
    pub async fn run(
        &self,
        stop: CancellationToken,
        resume_from: Option<&str>,
    ) -> Result<LoopExit, Error> {
        let (events, resume_from) = match resume_from {
            Some(version) => match self.cluster.watch_config_maps(version).await {
                Ok(events) => {
                    info!(resource_version = version, "Resumed ConfigMap watch");
                    (events, Some(version.to_string()))
                }
                Err(e) if e.is_watch_expired() => {
                    warn!(
                        resource_version = version,
                        error = %e,
                        "Watch version expired, starting over"
                    );
                    (self.watch_from_current_state().await?, None)
                }
                Err(e) => return Err(e),
            },
            None => (self.watch_from_current_state().await?, None),
        };

        Ok(self.consume_from(events, resume_from, &stop).await)
    }

    /// Process events from `events` one at a time, in order.
    ///
    /// The stop signal is checked between events and during drain waits.
    pub async fn consume<S>(&self, events: S, stop: &CancellationToken) -> LoopExit
    where
        S: Stream<Item = Result<LifecycleEvent, Error>> + Unpin,
    {
        self.consume_from(events, None, stop).await
    }

    async fn consume_from<S>(
        &self,
        mut events: S,
        mut last_version: Option<String>,
        stop: &CancellationToken,
    ) -> LoopExit
    where
        S: Stream<Item = Result<LifecycleEvent, Error>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    info!("Stop requested, leaving event loop");
                    return LoopExit::Stopped;
                }
                next = events.next() => next,
            };

            match next {
                None => {
                    info!(resource_version = ?last_version, "ConfigMap event stream closed");
                    return LoopExit::StreamClosed {
                        resume_from: last_version,
                    };
                }
                Some(Err(e)) if e.is_watch_expired() => {
                    warn!(error = %e, "ConfigMap watch expired");
                    return LoopExit::StreamClosed { resume_from: None };
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Watch stream error, skipping");
                }
                Some(Ok(event)) => {
                    if let Some(version) = event.resource_version() {
                        last_version = Some(version.to_string());
                    }
                    if self.handle_event(event, stop).await == EventOutcome::Interrupted {
                        info!("Stop requested, leaving event loop");
                        return LoopExit::Stopped;
                    }
                }
            }
        }
    }

    /// Handle one lifecycle event to completion
    #[instrument(
        skip_all,
        fields(
            event = ?event.kind,
            namespace = event.object.metadata.namespace.as_deref().unwrap_or_default(),
            name = event.object.metadata.name.as_deref().unwrap_or_default(),
        )
    )]
    pub async fn handle_event(
        &self,
        event: LifecycleEvent,
        stop: &CancellationToken,
    ) -> EventOutcome {
        match event.kind {
            EventKind::Added | EventKind::Modified => {
                if !self.is_triggered(&event.object) {
                    debug!("ConfigMap not annotated for provisioning, ignoring");
                    return EventOutcome::Ignored;
                }

                match self.provision(&event.object).await {
                    Ok(report) => info!(
                        created = report.created(),
                        updated = report.updated(),
                        failed = report.failed,
                        skipped = report.skipped,
                        "Provisioning pass finished"
                    ),
                    Err(e) => error!(error = %e, "Provisioning abandoned"),
                }
                EventOutcome::Handled
            }
            EventKind::Deleted => {
                let Some((namespace, name)) = event.identity() else {
                    warn!("Deleted ConfigMap has no namespace/name, ignoring");
                    return EventOutcome::Ignored;
                };

                let report = self.teardown(&namespace, &name, stop).await;
                if report.interrupted() {
                    return EventOutcome::Interrupted;
                }
                info!(
                    scaled = report.scaled,
                    drain = ?report.drain,
                    deleted = report.deleted(),
                    unresolved = report.unresolved(),
                    "Teardown finished"
                );
                EventOutcome::Handled
            }
        }
    }

    /// Whether the ConfigMap requests provisioning
    pub fn is_triggered(&self, config_map: &ConfigMap) -> bool {
        config_map
            .annotations()
            .get(&self.config.annotation_key)
            .is_some_and(|value| value == TRIGGER_VALUE)
    }

    async fn watch_from_current_state(&self) -> Result<EventStream, Error> {
        self.log_existing_config_maps().await;

        let events = self
            .cluster
            .watch_config_maps(INITIAL_RESOURCE_VERSION)
            .await?;
        info!("Watching ConfigMaps");
        Ok(events)
    }

    async fn log_existing_config_maps(&self) {
        match self.cluster.list_config_maps().await {
            Ok(config_maps) => {
                info!(count = config_maps.len(), "Existing ConfigMaps");
                for cm in &config_maps {
                    debug!(
                        namespace = cm.metadata.namespace.as_deref().unwrap_or_default(),
                        name = %cm.name_any(),
                        "Existing ConfigMap"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Failed to list existing ConfigMaps"),
        }
    }
}
