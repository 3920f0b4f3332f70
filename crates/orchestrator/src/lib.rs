//! Repository state orchestration for the analysis sync.
//!
//! This crate keeps one local repository synchronised with the remote
//! code-quality analysis service. [`RepositoryOrchestrator`] resolves the
//! repository's remote identity, drives it through the onboarding and
//! first-analysis states, classifies the checked-out branch, and keeps the
//! issue list and pull request data current as the working tree changes.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The orchestrator sequences calls between the
//! business types in the [`domain`] crate and the port traits infrastructure
//! crates implement (local VCS, remote service, auth store, notifier, CLI
//! wrapper). It performs no I/O of its own.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | `SyncConfig` delays, retry bounds, and pagination limits |
//! | [`events`] | Broadcast topics for state, classification, issues, pull requests |
//! | [`issues`] | Capped, paginated issue cache for the checked-out branch |
//! | [`pull_requests`] | Open pull request collection and the active pull request |
//! | [`registry`] | CLI wrapper handles keyed by repository identity |
//! | [`retry`] | Cancellable timers and bounded retry handles |
//! | [`state_machine`] | `RepositoryOrchestrator` and its state transitions |

pub mod config;
pub mod events;
pub mod issues;
pub mod pull_requests;
pub mod registry;
pub mod retry;
pub mod state_machine;

mod trigger;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, SyncConfig};
pub use events::{Subscription, Topic, Topics};
pub use issues::{IssueCache, IssueList, IssueQuery, RefreshOutcome};
pub use pull_requests::{ActivePullRequest, PullRequestTracker};
pub use registry::CliRegistry;
pub use retry::{RetryHandle, RetryStatus, ScheduledTask};
pub use state_machine::{Collaborators, Diagnostics, RepositoryOrchestrator};
