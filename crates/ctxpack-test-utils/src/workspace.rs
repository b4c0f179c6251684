//! Temporary artifact workspace.
//!
//! [`TestWorkspace`] owns a temp directory, writes artifacts into it, and
//! hands out a filesystem provider rooted there. The directory is removed
//! when the workspace is dropped, even on panic.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ctxpack_config::AppConfig;
use ctxpack_core::{ArtifactProvider, FsArtifactProvider};
use tempfile::TempDir;

pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write an artifact at `reference`, creating parent directories.
    pub async fn write(&self, reference: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dir.path().join(reference);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .expect("failed to create artifact directory");
        }
        tokio::fs::write(&path, content)
            .await
            .expect("failed to write artifact");
        path
    }

    /// Filesystem provider rooted at the workspace.
    pub fn provider(&self) -> Arc<dyn ArtifactProvider> {
        Arc::new(FsArtifactProvider::new(self.dir.path()))
    }

    /// Write `toml` to `ctxpack.toml` in the workspace and load it.
    pub async fn load_config(&self, toml: &str) -> AppConfig {
        let path = self.write("ctxpack.toml", toml).await;
        AppConfig::load(&path)
            .await
            .expect("failed to parse test config")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
