//! `LocalVcsProvider` over a fixed set of working trees.

use std::path::PathBuf;
use std::sync::Arc;

use domain::{LocalRepository, LocalVcsProvider};
use tracing::{debug, warn};

use crate::repository::GitRepository;

/// The git repositories found under a list of workspace folders.
#[derive(Debug, Default)]
pub struct GitProvider {
    repositories: Vec<Arc<GitRepository>>,
}

impl GitProvider {
    /// Discovers the repository containing each folder, skipping folders that
    /// are not inside a working tree and folders that share a repository.
    pub fn discover(folders: &[PathBuf]) -> Self {
        let mut repositories: Vec<Arc<GitRepository>> = Vec::new();
        for folder in folders {
            match GitRepository::discover(folder) {
                Ok(repository) => {
                    if repositories
                        .iter()
                        .any(|known| known.git_dir() == repository.git_dir())
                    {
                        continue;
                    }
                    debug!(root = %repository.root().display(), "repository discovered");
                    repositories.push(Arc::new(repository));
                }
                Err(error) => {
                    warn!(folder = %folder.display(), %error, "no git repository");
                }
            }
        }
        Self { repositories }
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

impl LocalVcsProvider for GitProvider {
    fn repositories(&self) -> Vec<Arc<dyn LocalRepository>> {
        self.repositories
            .iter()
            .map(|repository| Arc::clone(repository) as Arc<dyn LocalRepository>)
            .collect()
    }
}
