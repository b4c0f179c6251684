//! Artifact providers.
//!
//! A provider maps a reference (a relative path, a document id) to raw bytes.
//! The filesystem provider is rooted at a directory and refuses references
//! that would escape it; the in-memory provider backs tests and callers that
//! already hold their artifacts.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::BoxFuture;
use crate::error::ArtifactError;

/// Read-only access to artifacts by reference.
pub trait ArtifactProvider: Send + Sync {
    /// Read the artifact's bytes, or [`ArtifactError::NotFound`].
    fn read<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ArtifactError>>;
}

/// Filesystem-backed provider rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactProvider {
    root: PathBuf,
}

impl FsArtifactProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference under the root. Absolute paths and `..` are rejected.
    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || reference.is_empty() {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl ArtifactProvider for FsArtifactProvider {
    fn read<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ArtifactError>> {
        Box::pin(async move {
            let Some(path) = self.resolve(reference) else {
                debug!(reference, "reference escapes artifact root");
                return Err(ArtifactError::NotFound(reference.to_string()));
            };
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(ArtifactError::NotFound(reference.to_string()))
                }
                // A directory is not an artifact
                Err(_) if path.is_dir() => Err(ArtifactError::NotFound(reference.to_string())),
                Err(source) => Err(ArtifactError::Io {
                    reference: reference.to_string(),
                    source,
                }),
            }
        })
    }
}

/// In-memory provider.
#[derive(Debug, Default)]
pub struct MemoryArtifactProvider {
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(self, reference: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(reference, bytes);
        self
    }

    /// Insert or replace an artifact.
    pub fn insert(&self, reference: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let mut artifacts = self
            .artifacts
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        artifacts.insert(reference.into(), bytes.into());
    }

    /// Remove an artifact, returning whether it existed.
    pub fn remove(&self, reference: &str) -> bool {
        let mut artifacts = self
            .artifacts
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        artifacts.remove(reference).is_some()
    }
}

impl ArtifactProvider for MemoryArtifactProvider {
    fn read<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ArtifactError>> {
        let found = self
            .artifacts
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(reference)
            .cloned();
        Box::pin(async move { found.ok_or_else(|| ArtifactError::NotFound(reference.to_string())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_provider_reads_file() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::create_dir_all(tmp.path().join("docs")).await.unwrap();
        tokio::fs::write(tmp.path().join("docs/prd.md"), b"# PRD\n")
            .await
            .unwrap();

        let provider = FsArtifactProvider::new(tmp.path());
        let bytes = provider.read("docs/prd.md").await.unwrap();
        assert_eq!(bytes, b"# PRD\n");
    }

    #[tokio::test]
    async fn test_fs_provider_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let provider = FsArtifactProvider::new(tmp.path());
        let err = provider.read("nope.md").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fs_provider_rejects_escaping_references() {
        let tmp = TempDir::new().unwrap();
        let provider = FsArtifactProvider::new(tmp.path().join("root"));
        for reference in ["../secret", "/etc/passwd", "a/../../b", ""] {
            let err = provider.read(reference).await.unwrap_err();
            assert!(matches!(err, ArtifactError::NotFound(_)), "{reference}");
        }
    }

    #[tokio::test]
    async fn test_fs_provider_directory_is_not_found() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::create_dir_all(tmp.path().join("src")).await.unwrap();
        let provider = FsArtifactProvider::new(tmp.path());
        let err = provider.read("src").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_memory_provider() {
        let provider = MemoryArtifactProvider::new().with("story.md", "As a user...");
        assert_eq!(provider.read("story.md").await.unwrap(), b"As a user...");
        assert!(provider.remove("story.md"));
        assert!(matches!(
            provider.read("story.md").await,
            Err(ArtifactError::NotFound(_))
        ));
    }
}
