// ABOUTME: Projects a project's authoritative file set onto a host directory tree
// ABOUTME: The tree is bind-mounted into the sandbox container as its working directory

use crate::error::{Result, SandboxError};
use crate::project::ProjectFile;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Writes project files beneath `<root>/<project_id>/`.
///
/// Relative paths containing `..`, a root, a drive prefix or a NUL byte are
/// rejected rather than normalized.
#[derive(Debug, Clone)]
pub struct FileMaterializer {
    root: PathBuf,
}

impl FileMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Host path of a project's tree. Does not touch the filesystem.
    pub fn project_dir(&self, project_id: &str) -> Result<PathBuf> {
        let segment = sanitize_relative_path(project_id)?;
        if segment.components().count() != 1 {
            return Err(SandboxError::InvalidPath(project_id.to_string()));
        }
        Ok(self.root.join(segment))
    }

    pub async fn ensure_project_directory(&self, project_id: &str) -> Result<PathBuf> {
        let dir = self.project_dir(project_id)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn write_file(&self, project_id: &str, rel_path: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve(project_id, rel_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, content).await?;
        debug!("Wrote {} ({} bytes)", target.display(), content.len());
        Ok(())
    }

    pub async fn delete_file(&self, project_id: &str, rel_path: &str) -> Result<()> {
        let target = self.resolve(project_id, rel_path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create or overwrite every file in `files`. Files on disk that are not
    /// in the set are left alone.
    pub async fn sync_all(&self, project_id: &str, files: &[ProjectFile]) -> Result<PathBuf> {
        // Validate everything up front so a bad path writes nothing.
        let targets = files
            .iter()
            .map(|f| self.resolve(project_id, &f.path))
            .collect::<Result<Vec<_>>>()?;

        let dir = self.ensure_project_directory(project_id).await?;
        for (file, target) in files.iter().zip(targets) {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&target, &file.content).await?;
        }

        info!(
            "Materialized {} files for project {} at {}",
            files.len(),
            project_id,
            dir.display()
        );
        Ok(dir)
    }

    pub async fn delete_project_tree(&self, project_id: &str) -> Result<()> {
        let dir = self.project_dir(project_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Removed project tree {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve(&self, project_id: &str, rel_path: &str) -> Result<PathBuf> {
        let rel = sanitize_relative_path(rel_path)?;
        Ok(self.project_dir(project_id)?.join(rel))
    }
}

/// Reduce `raw` to a path of normal components only.
fn sanitize_relative_path(raw: &str) -> Result<PathBuf> {
    let invalid = || SandboxError::InvalidPath(raw.to_string());

    if raw.contains('\0') {
        return Err(invalid());
    }

    let mut clean = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid())
            }
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(invalid());
    }
    Ok(clean)
}
