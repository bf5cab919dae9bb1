//! Manifest templating
//!
//! The database manifest lives as text inside a ConfigMap. This module turns
//! that text plus a [`RenderContext`] into a rendered multi-document manifest.

mod context;
mod engine;
mod error;

pub use context::{
    RenderContext, DEFAULT_CLUSTER_NAME, DEFAULT_NAMESPACE, DEFAULT_SERVICE_ACCOUNT,
};
pub use engine::TemplateEngine;
pub use error::TemplateError;
