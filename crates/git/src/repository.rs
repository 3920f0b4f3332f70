//! `LocalRepository` backed by libgit2.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use domain::{BranchName, CommitSha, Head, LocalRepository, Remote, RemoteName, VcsError};
use futures::stream::BoxStream;
use git2::{BranchType, ErrorCode};
use tracing::{debug, info, warn};

use crate::errors::GitError;
use crate::watcher::RepositoryWatcher;

/// A local git working tree.
///
/// `git2::Repository` is neither `Send` nor `Sync`, so only paths are kept
/// and every read reopens the repository. Writes run on the blocking pool.
#[derive(Debug)]
pub struct GitRepository {
    root: PathBuf,
    git_dir: PathBuf,
    watcher: RepositoryWatcher,
}

impl GitRepository {
    /// Opens the repository whose working tree or git directory is `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = git2::Repository::open(path.as_ref())?;
        Self::from_repo(&repo)
    }

    /// Opens the repository containing `path`, searching parent directories.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = git2::Repository::discover(path.as_ref())?;
        Self::from_repo(&repo)
    }

    fn from_repo(repo: &git2::Repository) -> Result<Self, GitError> {
        let git_dir = repo.path().to_path_buf();
        let root = repo
            .workdir()
            .ok_or_else(|| GitError::Bare {
                path: git_dir.clone(),
            })?
            .to_path_buf();
        let watcher = RepositoryWatcher::start(&git_dir);
        debug!(root = %root.display(), "git repository opened");
        Ok(Self {
            root,
            git_dir,
            watcher,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn repo(&self) -> Result<git2::Repository, GitError> {
        Ok(git2::Repository::open(&self.git_dir)?)
    }

    /// Reads HEAD; `Ok(None)` while HEAD does not point at a commit yet.
    pub fn read_head(&self) -> Result<Option<Head>, GitError> {
        let repo = self.repo()?;
        read_head(&repo)
    }

    pub fn read_remotes(&self) -> Result<Vec<Remote>, GitError> {
        let repo = self.repo()?;
        let names = repo.remotes()?;
        let mut remotes = Vec::with_capacity(names.len());
        for name in names.iter().flatten() {
            let remote = repo.find_remote(name)?;
            let Some(name) = RemoteName::new(name) else {
                continue;
            };
            remotes.push(Remote {
                name,
                fetch_url: remote.url().map(str::to_owned),
                push_url: remote.pushurl().map(str::to_owned),
            });
        }
        Ok(remotes)
    }
}

fn read_head(repo: &git2::Repository) -> Result<Option<Head>, GitError> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(error) if matches!(error.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            return Ok(None);
        }
        Err(error) => return Err(error.into()),
    };

    let commit = head.target();
    if !head.is_branch() {
        return Ok(Some(Head {
            branch: None,
            commit: commit.and_then(|oid| CommitSha::new(oid.to_string())),
            ahead: None,
            behind: None,
        }));
    }

    let branch = head.shorthand().and_then(BranchName::new);
    let upstream = git2::Branch::wrap(head).upstream().ok();
    let (ahead, behind) = match (commit, upstream.and_then(|upstream| upstream.get().target())) {
        (Some(local), Some(upstream)) => {
            let (ahead, behind) = repo.graph_ahead_behind(local, upstream)?;
            (
                Some(u32::try_from(ahead).unwrap_or(u32::MAX)),
                Some(u32::try_from(behind).unwrap_or(u32::MAX)),
            )
        }
        _ => (None, None),
    };

    Ok(Some(Head {
        branch,
        commit: commit.and_then(|oid| CommitSha::new(oid.to_string())),
        ahead,
        behind,
    }))
}

/// Checks out `name`, creating a local branch that tracks a remote-tracking
/// branch of the same name when no local branch exists.
fn checkout_branch(git_dir: &Path, name: &BranchName) -> Result<(), GitError> {
    let repo = git2::Repository::open(git_dir)?;

    let branch = match repo.find_branch(name.as_str(), BranchType::Local) {
        Ok(branch) => branch,
        Err(error) if error.code() == ErrorCode::NotFound => {
            let tracking = find_remote_tracking(&repo, name)?;
            let tracking_name = tracking.name()?.map(str::to_owned);
            let commit = tracking.get().peel_to_commit()?;
            let mut local = repo.branch(name.as_str(), &commit, false)?;
            local.set_upstream(tracking_name.as_deref())?;
            info!(branch = %name, upstream = ?tracking_name, "created local branch");
            local
        }
        Err(error) => return Err(error.into()),
    };

    let reference = branch.into_reference();
    let refname = reference
        .name()
        .ok_or_else(|| GitError::BranchNotFound {
            branch: name.clone(),
        })?
        .to_owned();
    let target = reference.peel(git2::ObjectType::Commit)?;

    let mut options = git2::build::CheckoutBuilder::new();
    options.safe();
    repo.checkout_tree(&target, Some(&mut options))?;
    repo.set_head(&refname)?;
    Ok(())
}

/// Finds `<remote>/<name>`, preferring `origin`.
fn find_remote_tracking<'r>(
    repo: &'r git2::Repository,
    name: &BranchName,
) -> Result<git2::Branch<'r>, GitError> {
    let mut candidates = Vec::new();
    for entry in repo.branches(Some(BranchType::Remote))? {
        let (branch, _) = entry?;
        let matches = branch
            .name()?
            .and_then(|full| full.split_once('/'))
            .is_some_and(|(_, short)| short == name.as_str());
        if matches {
            candidates.push(branch);
        }
    }

    let origin = candidates.iter().position(|branch| {
        branch
            .name()
            .ok()
            .flatten()
            .is_some_and(|full| full.starts_with("origin/"))
    });
    match origin {
        Some(index) => Ok(candidates.swap_remove(index)),
        None => candidates
            .into_iter()
            .next()
            .ok_or_else(|| GitError::BranchNotFound {
                branch: name.clone(),
            }),
    }
}

#[async_trait]
impl LocalRepository for GitRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn head(&self) -> Option<Head> {
        match self.read_head() {
            Ok(head) => head,
            Err(error) => {
                warn!(root = %self.root.display(), %error, "cannot read HEAD");
                None
            }
        }
    }

    fn remotes(&self) -> Vec<Remote> {
        self.read_remotes().unwrap_or_else(|error| {
            warn!(root = %self.root.display(), %error, "cannot read remotes");
            Vec::new()
        })
    }

    fn changes(&self) -> BoxStream<'static, ()> {
        self.watcher.subscribe()
    }

    async fn checkout(&self, branch: &BranchName) -> Result<(), VcsError> {
        let git_dir = self.git_dir.clone();
        let target = branch.clone();
        let result = tokio::task::spawn_blocking(move || checkout_branch(&git_dir, &target))
            .await
            .map_err(|error| GitError::Runtime(error.to_string()))
            .and_then(|result| result);

        match result {
            Ok(()) => {
                info!(root = %self.root.display(), %branch, "branch checked out");
                self.watcher.poke();
                Ok(())
            }
            Err(error) => Err(error.into_checkout_error(branch)),
        }
    }
}
