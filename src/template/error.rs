//! Template error types

use std::fmt;

/// Errors that can occur while resolving or rendering the manifest template
#[derive(Debug)]
pub enum TemplateError {
    /// The template source object could not be fetched
    SourceUnavailable {
        /// `namespace/name` of the template source
        location: String,
        /// Why the fetch failed
        reason: String,
    },
    /// The template source exists but lacks the template key
    MissingKey {
        /// `namespace/name` of the template source
        location: String,
        /// The expected data key
        key: String,
    },
    /// Template syntax or substitution failed
    Render(minijinja::Error),
}

impl TemplateError {
    /// Create an error for an unavailable template source
    pub fn source_unavailable(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::SourceUnavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an error for a missing template key
    pub fn missing_key(location: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingKey {
            location: location.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable { location, reason } => {
                write!(f, "template source {} unavailable: {}", location, reason)
            }
            Self::MissingKey { location, key } => {
                write!(f, "template source {} has no key '{}'", location, key)
            }
            Self::Render(e) => write!(f, "template render error: {}", e),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            _ => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render(err)
    }
}
