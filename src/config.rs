//! Runtime configuration
//!
//! Plain structs with defaults that reproduce the fixed provisioning contract.
//! The binary fills them from command-line flags and environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use crate::retry::RetryConfig;
use crate::template::RenderContext;

/// Annotation that marks a ConfigMap as a provisioning trigger
pub const TRIGGER_ANNOTATION: &str = "example.org/postgres-cluster";
/// The only annotation value that triggers provisioning
pub const TRIGGER_VALUE: &str = "true";
/// Namespace of the template ConfigMap
pub const TEMPLATE_NAMESPACE: &str = "template-namespace";
/// Name of the template ConfigMap
pub const TEMPLATE_NAME: &str = "db-template";
/// Data key holding the template text
pub const TEMPLATE_KEY: &str = "db.yaml";
/// Interval between drain-wait polls
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Where the manifest template lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateLocation {
    /// ConfigMap namespace
    pub namespace: String,
    /// ConfigMap name
    pub name: String,
    /// Data key holding the template text
    pub key: String,
}

impl Default for TemplateLocation {
    fn default() -> Self {
        Self {
            namespace: TEMPLATE_NAMESPACE.to_string(),
            name: TEMPLATE_NAME.to_string(),
            key: TEMPLATE_KEY.to_string(),
        }
    }
}

impl std::fmt::Display for TemplateLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reconciler configuration
#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    /// Annotation key checked on Added/Modified events
    pub annotation_key: String,
    /// Template source location
    pub template: TemplateLocation,
    /// Values substituted into the template
    pub render: RenderContext,
    /// Pause between drain-wait polls
    pub drain_poll_interval: Duration,
    /// Give up waiting for pods after this many polls (`None` waits forever)
    pub drain_max_polls: Option<u32>,
    /// Retry policy for each teardown delete
    pub delete_retry: RetryConfig,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            annotation_key: TRIGGER_ANNOTATION.to_string(),
            template: TemplateLocation::default(),
            render: RenderContext::default(),
            drain_poll_interval: DRAIN_POLL_INTERVAL,
            drain_max_polls: None,
            delete_retry: RetryConfig::default(),
        }
    }
}

/// Token introspection endpoint settings (OpenID Connect provider)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntrospectionConfig {
    /// Base URL of the identity provider (e.g. `https://sso.example.org`)
    pub base_url: String,
    /// Realm the client is registered in
    pub realm: String,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Request timeout
    pub timeout: Duration,
}

impl IntrospectionConfig {
    /// Full URL of the introspection endpoint
    pub fn introspection_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token/introspect",
            self.base_url.trim_end_matches('/'),
            self.realm
        )
    }
}

/// Admin API server configuration
#[derive(Clone, Debug)]
pub struct AdminConfig {
    /// Address to bind
    pub addr: SocketAddr,
    /// Token introspection settings
    pub introspection: IntrospectionConfig,
}
