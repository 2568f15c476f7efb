//! Writes extracted artifacts to disk under a workspace root.
//!
//! Paths reaching this adapter have already passed [`crate::extractor::PathPolicy`],
//! so the only remaining job is directory creation and the later-write-wins
//! collision rule: if two tasks in the same workflow independently target
//! the same path, the later write simply overwrites and a `collision`
//! metric is incremented by the caller.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::extractor::Artifact;

pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| OrchestratorError::Fatal(format!("workspace root not writable: {e}")))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write every artifact under the workspace root, creating parent
    /// directories as needed. Returns the workspace-relative paths actually
    /// written, and whether each write collided with an existing file from
    /// an earlier task in this workflow.
    pub fn write_all(&self, artifacts: &[Artifact]) -> Result<Vec<(String, bool)>> {
        let mut written = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let collided = self.write_one(artifact)?;
            written.push((artifact.path.clone(), collided));
        }
        Ok(written)
    }

    fn write_one(&self, artifact: &Artifact) -> Result<bool> {
        let target = self.root.join(&artifact.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OrchestratorError::Fatal(format!("failed to create {}: {e}", parent.display())))?;
        }

        let collided = target.exists();
        if collided {
            warn!(path = %artifact.path, "artifact path collides with a previous write, later write wins");
        }

        std::fs::write(&target, &artifact.content)
            .map_err(|e| OrchestratorError::Io(format!("failed to write {}: {e}", target.display())))?;

        debug!(path = %artifact.path, bytes = artifact.content.len(), "artifact written");
        Ok(collided)
    }
}
