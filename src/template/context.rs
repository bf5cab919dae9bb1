//! Render context for the database manifest template
//!
//! Exposes three top-level variables to the template:
//! - `CLUSTERNAME` - name of the database cluster workload
//! - `NAMESPACE` - namespace the workload is rendered for
//! - `SANAME` - service account the workload runs as

use std::collections::BTreeMap;

use minijinja::Value;

/// Default database cluster name
pub const DEFAULT_CLUSTER_NAME: &str = "mycluster";
/// Default target namespace
pub const DEFAULT_NAMESPACE: &str = "default";
/// Default service account name
pub const DEFAULT_SERVICE_ACCOUNT: &str = "my-service-account";

/// Substitution inputs for the manifest template
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderContext {
    /// Value of `CLUSTERNAME`
    pub cluster_name: String,
    /// Value of `NAMESPACE`
    pub namespace: String,
    /// Value of `SANAME`
    pub service_account_name: String,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_account_name: DEFAULT_SERVICE_ACCOUNT.to_string(),
        }
    }
}

impl RenderContext {
    /// Create a context from explicit values
    pub fn new(
        cluster_name: impl Into<String>,
        namespace: impl Into<String>,
        service_account_name: impl Into<String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            namespace: namespace.into(),
            service_account_name: service_account_name.into(),
        }
    }

    /// Template variables keyed by placeholder name
    pub fn variables(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("CLUSTERNAME", self.cluster_name.clone()),
            ("NAMESPACE", self.namespace.clone()),
            ("SANAME", self.service_account_name.clone()),
        ])
    }

    /// Convert to minijinja Value for rendering
    pub fn to_value(&self) -> Value {
        Value::from_iter(self.variables())
    }
}
