//! Manifest decoding
//!
//! Splits rendered template text into individual resource documents and
//! decodes each into a typed [`ManifestDocument`]. Decoding is resilient per
//! document: [`ManifestDecoder`] yields `Err` for a document it cannot decode
//! and carries on with the next one. Only the end of the input terminates the
//! sequence.

use std::fmt;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::yaml::parse_document;

/// The resource kinds this operator provisions and tears down
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// The database StatefulSet
    Workload,
    /// The Service exposing the database
    NetworkEndpoint,
    /// The PersistentVolumeClaim backing the database
    VolumeClaim,
}

impl ResourceKind {
    /// Teardown deletes dependents in this order
    pub const TEARDOWN_ORDER: [ResourceKind; 3] = [
        ResourceKind::Workload,
        ResourceKind::NetworkEndpoint,
        ResourceKind::VolumeClaim,
    ];

    /// Kubernetes `kind` for this resource
    pub fn as_kind(&self) -> &'static str {
        match self {
            ResourceKind::Workload => "StatefulSet",
            ResourceKind::NetworkEndpoint => "Service",
            ResourceKind::VolumeClaim => "PersistentVolumeClaim",
        }
    }

    /// Resolve a Kubernetes `kind` string
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "StatefulSet" => Some(ResourceKind::Workload),
            "Service" => Some(ResourceKind::NetworkEndpoint),
            "PersistentVolumeClaim" => Some(ResourceKind::VolumeClaim),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_kind())
    }
}

/// A single decoded resource from a rendered manifest
#[derive(Clone, Debug, PartialEq)]
pub enum ManifestDocument {
    /// `apps/v1 StatefulSet`
    StatefulSet(Box<StatefulSet>),
    /// `v1 Service`
    Service(Box<Service>),
    /// `v1 PersistentVolumeClaim`
    PersistentVolumeClaim(Box<PersistentVolumeClaim>),
}

impl ManifestDocument {
    /// Kind of this document
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManifestDocument::StatefulSet(_) => ResourceKind::Workload,
            ManifestDocument::Service(_) => ResourceKind::NetworkEndpoint,
            ManifestDocument::PersistentVolumeClaim(_) => ResourceKind::VolumeClaim,
        }
    }

    fn metadata(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        match self {
            ManifestDocument::StatefulSet(r) => &r.metadata,
            ManifestDocument::Service(r) => &r.metadata,
            ManifestDocument::PersistentVolumeClaim(r) => &r.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        match self {
            ManifestDocument::StatefulSet(r) => &mut r.metadata,
            ManifestDocument::Service(r) => &mut r.metadata,
            ManifestDocument::PersistentVolumeClaim(r) => &mut r.metadata,
        }
    }

    /// `metadata.name`; always present on decoded documents
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// `metadata.namespace`, if the manifest set one
    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// Fill in `metadata.namespace` when the manifest left it unset
    pub fn default_namespace(mut self, namespace: &str) -> Self {
        let meta = self.metadata_mut();
        if meta.namespace.as_deref().map_or(true, str::is_empty) {
            meta.namespace = Some(namespace.to_string());
        }
        self
    }

    /// Decode a document from its JSON value representation
    pub fn from_value(value: Value) -> Result<Self, DecodeFailure> {
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(DecodeFailure::MissingField("kind"))?;
        let resource_kind = ResourceKind::from_kind(kind)
            .ok_or_else(|| DecodeFailure::UnsupportedKind(kind.to_string()))?;

        let has_name = value
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .is_some_and(|n| !n.is_empty());
        if !has_name {
            return Err(DecodeFailure::MissingField("metadata.name"));
        }

        Ok(match resource_kind {
            ResourceKind::Workload => ManifestDocument::StatefulSet(typed(value)?),
            ResourceKind::NetworkEndpoint => ManifestDocument::Service(typed(value)?),
            ResourceKind::VolumeClaim => ManifestDocument::PersistentVolumeClaim(typed(value)?),
        })
    }
}

fn typed<T: DeserializeOwned>(value: Value) -> Result<Box<T>, DecodeFailure> {
    serde_json::from_value(value)
        .map(Box::new)
        .map_err(|e| DecodeFailure::Invalid(e.to_string()))
}

/// Why a single document failed to decode
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    /// The text is not valid YAML/JSON
    #[error("syntax error: {0}")]
    Syntax(String),
    /// A required field is absent
    #[error("missing field {0}")]
    MissingField(&'static str),
    /// The document describes a kind this operator does not manage
    #[error("unsupported kind {0}")]
    UnsupportedKind(String),
    /// The document does not match the schema of its kind
    #[error("invalid resource: {0}")]
    Invalid(String),
}

/// A document in the manifest stream could not be decoded
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("manifest document {index}: {failure}")]
pub struct ManifestError {
    /// 1-based position of the document in the stream
    pub index: usize,
    /// What went wrong
    pub failure: DecodeFailure,
}

/// Lazy sequence of decode results over a multi-document manifest
///
/// Documents are separated by `---` lines. Blank or comment-only documents
/// are passed over without producing an item.
pub struct ManifestDecoder<'a> {
    remaining: &'a str,
    index: usize,
    exhausted: bool,
}

impl<'a> ManifestDecoder<'a> {
    /// Decode documents from rendered manifest text
    pub fn new(input: &'a str) -> Self {
        Self {
            remaining: input,
            index: 0,
            exhausted: false,
        }
    }

    fn next_chunk(&mut self) -> Option<&'a str> {
        if self.exhausted {
            return None;
        }

        let mut offset = 0;
        for line in self.remaining.split_inclusive('\n') {
            if is_separator(line) {
                let chunk = &self.remaining[..offset];
                self.remaining = &self.remaining[offset + line.len()..];
                return Some(chunk);
            }
            offset += line.len();
        }

        self.exhausted = true;
        Some(self.remaining)
    }
}

impl Iterator for ManifestDecoder<'_> {
    type Item = Result<ManifestDocument, ManifestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chunk = self.next_chunk()?;
            if is_blank(chunk) {
                continue;
            }
            self.index += 1;
            return Some(decode_chunk(chunk).map_err(|failure| ManifestError {
                index: self.index,
                failure,
            }));
        }
    }
}

fn decode_chunk(chunk: &str) -> Result<ManifestDocument, DecodeFailure> {
    let value = if chunk.trim_start().starts_with('{') {
        serde_json::from_str(chunk).map_err(|e| DecodeFailure::Syntax(e.to_string()))?
    } else {
        parse_document(chunk).map_err(|e| DecodeFailure::Syntax(e.to_string()))?
    };
    ManifestDocument::from_value(value)
}

/// A `---` line, optionally followed by whitespace or a comment
fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    match line.strip_prefix("---") {
        Some(rest) => {
            rest.is_empty()
                || (rest.starts_with(char::is_whitespace) && rest.trim_start().starts_with('#'))
        }
        None => false,
    }
}

fn is_blank(chunk: &str) -> bool {
    chunk.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    })
}
