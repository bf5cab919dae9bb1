//! db-provisioner - ConfigMap-driven database provisioning for Kubernetes
//!
//! Watches ConfigMaps cluster-wide. When one carries the
//! `example.org/postgres-cluster: "true"` annotation, a manifest template
//! stored in another ConfigMap is rendered and every resource it describes is
//! created or replaced. When the ConfigMap is deleted, the matching
//! StatefulSet is scaled down and drained, then the StatefulSet, Service and
//! PersistentVolumeClaim of the same name are deleted.
//!
//! # Modules
//!
//! - [`controller`] - Event loop, provisioning and teardown
//! - [`cluster`] - Cluster access trait and its kube-rs implementation
//! - [`template`] - Manifest template rendering
//! - [`manifest`] - Multi-document manifest decoding
//! - [`artifact`] - Rendered-manifest debugging artifact
//! - [`retry`] - Bounded retry for best-effort operations
//! - [`clock`] - Injectable sleep
//! - [`api`] - Administrative HTTP API
//! - [`config`] - Runtime configuration
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod api;
pub mod artifact;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod manifest;
pub mod retry;
pub mod telemetry;
pub mod template;
pub mod yaml;

pub use error::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
