//! Error types for the provisioner
//!
//! Errors carry the resource kind and identity they concern so that log lines
//! emitted by the reconciler are actionable without extra context.

use thiserror::Error;

use crate::template::TemplateError;

/// Main error type for provisioner operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested resource does not exist in the cluster
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (e.g. "StatefulSet")
        kind: String,
        /// Namespace that was queried
        namespace: String,
        /// Name that was queried
        name: String,
    },

    /// Kubernetes API error other than not-found
    #[error("kubernetes error on {kind} {namespace}/{name}: {source}")]
    Kube {
        /// Resource kind the call was made against
        kind: String,
        /// Namespace of the call
        namespace: String,
        /// Name of the object (empty for list/watch calls)
        name: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Template source could not be resolved or rendered
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The resource version a watch was asked to resume from is no longer
    /// available (HTTP 410 Gone)
    #[error("watch on {kind} expired: {message}")]
    WatchExpired {
        /// Resource kind being watched
        kind: String,
        /// Server-provided reason
        message: String,
    },

    /// Writing the rendered-manifest artifact failed
    #[error("artifact write to {path} failed: {source}")]
    Artifact {
        /// Destination path
        path: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration is invalid or incomplete
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "watch", "scale")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given resource identity
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a watch-expired error
    pub fn watch_expired(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WatchExpired {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Classify a kube-rs error, mapping HTTP 404 responses to
    /// [`Error::NotFound`] and HTTP 410 to [`Error::WatchExpired`]
    pub fn from_kube(
        source: kube::Error,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        match &source {
            kube::Error::Api(response) if response.code == 404 => {
                Self::not_found(kind, namespace, name)
            }
            kube::Error::Api(response) if response.code == 410 => {
                Self::watch_expired(kind, response.message.clone())
            }
            _ => Self::Kube {
                kind: kind.into(),
                namespace: namespace.into(),
                name: name.into(),
                source,
            },
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error belongs to the not-found class
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a watch must restart from a fresh listing
    pub fn is_watch_expired(&self) -> bool {
        matches!(self, Self::WatchExpired { .. })
    }
}
