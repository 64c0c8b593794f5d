//! Provider manifest discovery
//!
//! Manifests load from local directory trees or from a git repository
//! cloned at a specific ref. The git contract sits behind a trait so the
//! registry can be tested without a network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::manifest::ProviderManifest;
use crate::registry::{ProviderRegistry, RegistryError};

/// Errors assembling a registry from configured sources
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("git source '{0}' must be of the form url@ref")]
    BadSource(String),
}

/// Manifest loading errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("git clone of {url}@{git_ref} failed: {message}")]
    Git {
        url: String,
        git_ref: String,
        message: String,
    },
}

/// Load every `*.yaml`/`*.yml` manifest under a directory tree.
///
/// Parse errors abort the load; validation happens when the registry is
/// built so a reload stays atomic.
pub fn load_dir(root: &Path) -> Result<Vec<ProviderManifest>, LoadError> {
    let mut manifests = Vec::new();
    collect(root, &mut manifests)?;
    manifests.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    Ok(manifests)
}

fn collect(dir: &Path, out: &mut Vec<ProviderManifest>) -> Result<(), LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.is_dir() {
            collect(&path, out)?;
            continue;
        }

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if !is_yaml {
            continue;
        }

        let text = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest = ProviderManifest::from_yaml(&text)
            .map_err(|source| LoadError::Parse { path, source })?;
        out.push(manifest);
    }
    Ok(())
}

/// Contract for materializing a git ref on local disk.
#[async_trait]
pub trait GitCloner: Send + Sync {
    /// Clone `url` at `git_ref` into `dest`.
    async fn clone_at_ref(&self, url: &str, git_ref: &str, dest: &Path) -> Result<(), LoadError>;
}

/// Default cloner shelling out to the `git` binary.
pub struct GitCommandCloner;

#[async_trait]
impl GitCloner for GitCommandCloner {
    async fn clone_at_ref(&self, url: &str, git_ref: &str, dest: &Path) -> Result<(), LoadError> {
        let output = tokio::process::Command::new("git")
            .args(["clone", "--depth", "1", "--branch", git_ref])
            .arg(url)
            .arg(dest)
            .output()
            .await
            .map_err(|e| LoadError::Git {
                url: url.to_string(),
                git_ref: git_ref.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(LoadError::Git {
                url: url.to_string(),
                git_ref: git_ref.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Load manifests from configured directory and git sources.
pub async fn load_sources(
    paths: &[String],
    git_sources: &[String],
) -> Result<Vec<ProviderManifest>, BuildError> {
    let mut manifests = Vec::new();

    for path in paths {
        let loaded = load_dir(Path::new(path))?;
        tracing::info!(path, count = loaded.len(), "loaded provider manifests");
        manifests.extend(loaded);
    }

    let cloner = GitCommandCloner;
    for source in git_sources {
        let (url, git_ref) = source
            .rsplit_once('@')
            .ok_or_else(|| BuildError::BadSource(source.clone()))?;
        let loaded = load_git(&cloner, url, git_ref).await?;
        tracing::info!(source, count = loaded.len(), "loaded provider manifests");
        manifests.extend(loaded);
    }

    Ok(manifests)
}

/// Build a registry from configured directory and git sources.
pub async fn build_registry(
    paths: &[String],
    git_sources: &[String],
    defaults: HashMap<String, String>,
) -> Result<ProviderRegistry, BuildError> {
    let manifests = load_sources(paths, git_sources).await?;
    Ok(ProviderRegistry::new(manifests, defaults)?)
}

/// Clone a provider repository at a ref and load its manifests.
pub async fn load_git(
    cloner: &dyn GitCloner,
    url: &str,
    git_ref: &str,
) -> Result<Vec<ProviderManifest>, LoadError> {
    let dest = std::env::temp_dir().join(format!("conductor-providers-{}", uuid::Uuid::new_v4()));

    cloner.clone_at_ref(url, git_ref, &dest).await?;
    let manifests = load_dir(&dest);

    // The checkout is only needed for the parse.
    let _ = std::fs::remove_dir_all(&dest);
    manifests
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_dir_reads_nested_yaml() {
        let root = std::env::temp_dir().join(format!("conductor-test-{}", uuid::Uuid::new_v4()));
        let nested = root.join("database-team");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join("provider.yaml"),
            r#"
apiVersion: conductor.dev/v1
kind: Provider
metadata:
  name: database-team
capabilities:
  resourceTypes: [postgres]
workflows:
  - name: provision-postgres
    category: provisioner
    provisions: postgres
    steps:
      - name: apply
        type: terraform
"#,
        )
        .unwrap();
        std::fs::write(root.join("README.md"), "not a manifest").unwrap();

        let manifests = load_dir(&root).unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].metadata.name, "database-team");

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_load_dir_surfaces_parse_errors() {
        let root = std::env::temp_dir().join(format!("conductor-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("broken.yaml"), ":: not yaml ::").unwrap();

        let err = load_dir(&root).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
