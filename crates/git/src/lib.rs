//! Local git adapter for the analysis sync.
//!
//! Implements the [`domain`] crate's `LocalRepository` and
//! `LocalVcsProvider` ports on top of `git2`, with change notifications from
//! a `notify` watcher on each `.git` directory.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. It reports
//! HEAD, remotes, and changes as they are on disk; deciding what they mean is
//! the orchestrator's job.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`repository`] | `GitRepository`: HEAD, remotes, checkout |
//! | [`provider`] | `GitProvider`: repositories discovered from folders |
//! | [`watcher`] | `RepositoryWatcher`: filtered `.git` change events |
//! | [`errors`] | `GitError` |

pub mod errors;
pub mod provider;
pub mod repository;
pub mod watcher;

pub use errors::GitError;
pub use provider::GitProvider;
pub use repository::GitRepository;
pub use watcher::RepositoryWatcher;
