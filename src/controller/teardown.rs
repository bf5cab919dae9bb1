//! Teardown path: scale to zero → drain wait → ordered deletes

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::Reconciler;
use crate::manifest::ResourceKind;
use crate::retry::retry_with_limit;

/// Pod label carrying the StatefulSet-assigned pod name
pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";

/// How the drain wait ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No matching pods remained after `polls` listings
    Drained {
        /// Number of pod listings performed
        polls: u32,
    },
    /// Listing pods failed; treated as drained without confirmation
    ListFailed,
    /// The configured poll limit was reached with pods still present
    PollLimitReached {
        /// Pods still present at the last listing
        remaining: usize,
    },
    /// The stop signal fired; no deletes were issued
    Interrupted,
}

/// Result of deleting one resource kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeletionResult {
    /// Kind that was deleted
    pub kind: ResourceKind,
    /// Whether an attempt succeeded before retries ran out
    pub deleted: bool,
}

/// Outcome of one teardown
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeardownReport {
    /// Whether scale-to-zero succeeded
    pub scaled: bool,
    /// How the drain wait ended
    pub drain: DrainOutcome,
    /// One entry per kind, in deletion order (empty when interrupted)
    pub deletions: Vec<DeletionResult>,
}

impl TeardownReport {
    /// Teardown was abandoned by the stop signal
    pub fn interrupted(&self) -> bool {
        self.drain == DrainOutcome::Interrupted
    }

    /// Number of kinds deleted
    pub fn deleted(&self) -> usize {
        self.deletions.iter().filter(|d| d.deleted).count()
    }

    /// Number of kinds whose deletion ran out of attempts
    pub fn unresolved(&self) -> usize {
        self.deletions.iter().filter(|d| !d.deleted).count()
    }
}

impl Reconciler {
    /// Remove the resources provisioned for `namespace/name`.
    ///
    /// Every stage is best-effort. The scale and drain stages always finish
    /// before the first delete is issued.
    #[instrument(skip(self, stop))]
    pub async fn teardown(
        &self,
        namespace: &str,
        name: &str,
        stop: &CancellationToken,
    ) -> TeardownReport {
        info!("ConfigMap deleted, tearing down");

        let scaled = match self.cluster.scale_workload(namespace, name, 0).await {
            Ok(()) => {
                info!("Workload scaled to zero");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to scale workload to zero, continuing");
                false
            }
        };

        let drain = self.wait_for_drain(namespace, name, stop).await;
        if drain == DrainOutcome::Interrupted {
            return TeardownReport {
                scaled,
                drain,
                deletions: Vec::new(),
            };
        }

        let mut deletions = Vec::with_capacity(ResourceKind::TEARDOWN_ORDER.len());
        for kind in ResourceKind::TEARDOWN_ORDER {
            let description = format!("delete {kind} {namespace}/{name}");
            let result = retry_with_limit(
                &self.config.delete_retry,
                self.clock.as_ref(),
                &description,
                || self.cluster.delete_resource(kind, namespace, name),
            )
            .await;

            match &result {
                Ok(()) => info!(%kind, "Deleted"),
                Err(e) => error!(
                    %kind,
                    attempts = self.config.delete_retry.max_attempts,
                    error = %e,
                    "Deletion unresolved after retries, not auto-corrected"
                ),
            }
            deletions.push(DeletionResult {
                kind,
                deleted: result.is_ok(),
            });
        }

        TeardownReport {
            scaled,
            drain,
            deletions,
        }
    }

    /// Poll for the ordinal-0 pod until it is gone
    async fn wait_for_drain(
        &self,
        namespace: &str,
        name: &str,
        stop: &CancellationToken,
    ) -> DrainOutcome {
        let selector = format!("{POD_NAME_LABEL} in ({name}-0)");
        let mut polls = 0u32;

        loop {
            polls += 1;
            match self.cluster.list_pods(namespace, &selector).await {
                Err(e) => {
                    warn!(error = %e, "Pod listing failed, treating workload as drained");
                    return DrainOutcome::ListFailed;
                }
                Ok(pods) if pods.is_empty() => {
                    info!(polls, "All pods terminated");
                    return DrainOutcome::Drained { polls };
                }
                Ok(pods) => {
                    if self.config.drain_max_polls.is_some_and(|max| polls >= max) {
                        warn!(
                            polls,
                            remaining = pods.len(),
                            "Pods still running at poll limit, proceeding with deletion"
                        );
                        return DrainOutcome::PollLimitReached {
                            remaining: pods.len(),
                        };
                    }
                    info!(remaining = pods.len(), "Waiting for pods to terminate");
                }
            }

            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    warn!("Stop requested during drain wait, abandoning teardown");
                    return DrainOutcome::Interrupted;
                }
                _ = self.clock.sleep(self.config.drain_poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MockArtifactSink;
    use crate::clock::MockClock;
    use crate::cluster::MockClusterClient;
    use crate::config::ProvisionerConfig;
    use crate::controller::test_support::*;
    use crate::Error;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn untouched_artifacts() -> MockArtifactSink {
        let mut artifacts = MockArtifactSink::new();
        artifacts.expect_write().never();
        artifacts
    }

    fn pods(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn deletes_succeed(cluster: &mut MockClusterClient) {
        cluster
            .expect_delete_resource()
            .times(3)
            .returning(|_, _, _| Ok(()));
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    #[tokio::test]
    async fn scale_then_drain_then_deletes_in_fixed_order() {
        let mut cluster = MockClusterClient::new();
        let mut seq = Sequence::new();

        cluster
            .expect_scale_workload()
            .withf(|ns, name, replicas| ns == "default" && name == "test-cm" && *replicas == 0)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        cluster
            .expect_list_pods()
            .withf(|ns, selector| {
                ns == "default" && selector == "statefulset.kubernetes.io/pod-name in (test-cm-0)"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![]));
        for kind in ResourceKind::TEARDOWN_ORDER {
            cluster
                .expect_delete_resource()
                .withf(move |k, ns, name| *k == kind && ns == "default" && name == "test-cm")
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
        }

        let reconciler = reconciler(cluster, untouched_artifacts(), MockClock::new());
        let report = reconciler
            .teardown("default", "test-cm", &CancellationToken::new())
            .await;

        assert!(report.scaled);
        assert_eq!(report.drain, DrainOutcome::Drained { polls: 1 });
        assert_eq!(report.deleted(), 3);
        let kinds: Vec<_> = report.deletions.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, ResourceKind::TEARDOWN_ORDER.to_vec());
    }

    #[tokio::test]
    async fn scale_failure_does_not_abort_teardown() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_scale_workload()
            .returning(|ns, name, _| Err(Error::not_found("StatefulSet", ns, name)));
        cluster.expect_list_pods().returning(|_, _| Ok(vec![]));
        deletes_succeed(&mut cluster);

        let reconciler = reconciler(cluster, untouched_artifacts(), MockClock::new());
        let report = reconciler
            .teardown("default", "test-cm", &CancellationToken::new())
            .await;

        assert!(!report.scaled);
        assert_eq!(report.deleted(), 3);
    }

    // =========================================================================
    // Drain wait
    // =========================================================================

    #[tokio::test]
    async fn drain_polls_until_no_pods_remain() {
        let mut cluster = MockClusterClient::new();
        cluster.expect_scale_workload().returning(|_, _, _| Ok(()));
        let listings = Arc::new(AtomicU32::new(0));
        let counter = listings.clone();
        cluster.expect_list_pods().times(3).returning(move |_, _| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(pods(&["test-cm-0", "test-cm-1"])),
                1 => Ok(pods(&["test-cm-0"])),
                _ => Ok(vec![]),
            }
        });
        deletes_succeed(&mut cluster);

        let mut clock = MockClock::new();
        clock
            .expect_sleep()
            .withf(|d| *d == Duration::from_secs(2))
            .times(2)
            .returning(|_| ());

        let reconciler = reconciler(cluster, untouched_artifacts(), clock);
        let report = reconciler
            .teardown("default", "test-cm", &CancellationToken::new())
            .await;

        assert_eq!(report.drain, DrainOutcome::Drained { polls: 3 });
        assert_eq!(listings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn listing_failure_ends_drain_and_deletes_proceed() {
        let mut cluster = MockClusterClient::new();
        cluster.expect_scale_workload().returning(|_, _, _| Ok(()));
        cluster
            .expect_list_pods()
            .times(1)
            .returning(|_, _| Err(Error::internal_with_context("list", "timeout")));
        deletes_succeed(&mut cluster);

        let mut clock = MockClock::new();
        clock.expect_sleep().never();

        let reconciler = reconciler(cluster, untouched_artifacts(), clock);
        let report = reconciler
            .teardown("default", "test-cm", &CancellationToken::new())
            .await;

        assert_eq!(report.drain, DrainOutcome::ListFailed);
        assert_eq!(report.deleted(), 3);
    }

    #[tokio::test]
    async fn poll_limit_bounds_the_drain_wait() {
        let mut cluster = MockClusterClient::new();
        cluster.expect_scale_workload().returning(|_, _, _| Ok(()));
        cluster
            .expect_list_pods()
            .times(4)
            .returning(|_, _| Ok(pods(&["test-cm-0"])));
        deletes_succeed(&mut cluster);

        let mut clock = MockClock::new();
        clock.expect_sleep().times(3).returning(|_| ());

        let config = ProvisionerConfig {
            drain_max_polls: Some(4),
            ..Default::default()
        };
        let reconciler = reconciler_with_config(cluster, untouched_artifacts(), clock, config);
        let report = reconciler
            .teardown("default", "test-cm", &CancellationToken::new())
            .await;

        assert_eq!(report.drain, DrainOutcome::PollLimitReached { remaining: 1 });
        assert_eq!(report.deleted(), 3);
    }

    #[tokio::test]
    async fn stop_signal_during_drain_abandons_deletes() {
        let stop = CancellationToken::new();
        let trip = stop.clone();

        let mut cluster = MockClusterClient::new();
        cluster.expect_scale_workload().returning(|_, _, _| Ok(()));
        cluster.expect_list_pods().times(1).returning(move |_, _| {
            trip.cancel();
            Ok(pods(&["test-cm-0"]))
        });
        cluster.expect_delete_resource().never();

        // select! builds the sleep future before noticing the stop signal.
        let mut clock = MockClock::new();
        clock.expect_sleep().times(..=1).returning(|_| ());

        let reconciler = reconciler(cluster, untouched_artifacts(), clock);
        let report = reconciler.teardown("default", "test-cm", &stop).await;

        assert!(report.interrupted());
        assert!(report.deletions.is_empty());
    }

    // =========================================================================
    // Deletion retry
    // =========================================================================

    #[tokio::test]
    async fn failing_delete_is_attempted_exactly_three_times_and_others_still_run() {
        let mut cluster = MockClusterClient::new();
        cluster.expect_scale_workload().returning(|_, _, _| Ok(()));
        cluster.expect_list_pods().returning(|_, _| Ok(vec![]));
        cluster
            .expect_delete_resource()
            .withf(|k, _, _| *k == ResourceKind::Workload)
            .times(3)
            .returning(|_, _, _| Err(Error::internal_with_context("delete", "conflict")));
        cluster
            .expect_delete_resource()
            .withf(|k, _, _| *k == ResourceKind::NetworkEndpoint)
            .times(1)
            .returning(|_, _, _| Ok(()));
        cluster
            .expect_delete_resource()
            .withf(|k, _, _| *k == ResourceKind::VolumeClaim)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let reconciler = reconciler(cluster, untouched_artifacts(), MockClock::new());
        let report = reconciler
            .teardown("default", "test-cm", &CancellationToken::new())
            .await;

        assert_eq!(
            report.deletions,
            vec![
                DeletionResult {
                    kind: ResourceKind::Workload,
                    deleted: false
                },
                DeletionResult {
                    kind: ResourceKind::NetworkEndpoint,
                    deleted: true
                },
                DeletionResult {
                    kind: ResourceKind::VolumeClaim,
                    deleted: true
                },
            ]
        );
        assert_eq!(report.unresolved(), 1);
    }

    #[tokio::test]
    async fn transient_delete_failure_recovers_within_the_bound() {
        let mut cluster = MockClusterClient::new();
        cluster.expect_scale_workload().returning(|_, _, _| Ok(()));
        cluster.expect_list_pods().returning(|_, _| Ok(vec![]));

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        cluster
            .expect_delete_resource()
            .withf(|k, _, _| *k == ResourceKind::VolumeClaim)
            .times(2)
            .returning(move |_, _, _| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::internal_with_context("delete", "etcd timeout"))
                } else {
                    Ok(())
                }
            });
        cluster
            .expect_delete_resource()
            .times(2)
            .returning(|_, _, _| Ok(()));

        let reconciler = reconciler(cluster, untouched_artifacts(), MockClock::new());
        let report = reconciler
            .teardown("default", "test-cm", &CancellationToken::new())
            .await;

        assert_eq!(report.deleted(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
