//! Debug artifact sink
//!
//! Every rendered manifest is written out before it is applied so an operator
//! can inspect exactly what the template produced.

use std::path::PathBuf;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Default location of the rendered-manifest artifact
pub const DEFAULT_ARTIFACT_PATH: &str = "/tmp/generated-db.yaml";

/// Destination for rendered manifest text
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist the rendered manifest, replacing any previous artifact
    async fn write(&self, contents: &str) -> Result<(), Error>;
}

/// Writes the artifact to a file on the local filesystem
#[derive(Clone, Debug)]
pub struct FileArtifactSink {
    path: PathBuf,
}

impl FileArtifactSink {
    /// Create a sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target path
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Default for FileArtifactSink {
    fn default() -> Self {
        Self::new(DEFAULT_ARTIFACT_PATH)
    }
}

#[async_trait]
impl ArtifactSink for FileArtifactSink {
    async fn write(&self, contents: &str) -> Result<(), Error> {
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|source| Error::Artifact {
                path: self.path.display().to_string(),
                source,
            })
    }
}
