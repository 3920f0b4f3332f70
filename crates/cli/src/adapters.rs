//! Process-level implementations of the orchestrator's remaining ports.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use domain::{AuthStore, CliWrapper, CliWrapperFactory, Notification, Notifier, RepositoryIdentity};
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{info, warn};

/// Credentials read once from the environment. The token never changes for
/// the lifetime of the process.
#[derive(Debug, Clone)]
pub struct EnvAuthStore {
    has_token: bool,
}

impl EnvAuthStore {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            has_token: token.is_some_and(|token| !token.trim().is_empty()),
        }
    }
}

impl AuthStore for EnvAuthStore {
    fn has_token(&self) -> bool {
        self.has_token
    }

    fn changes(&self) -> BoxStream<'static, ()> {
        stream::pending().boxed()
    }
}

/// Reports notifications through the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match serde_json::to_string(&notification) {
            Ok(json) => warn!(notification = %json, "user notification"),
            Err(error) => warn!(?notification, %error, "user notification"),
        }
    }
}

/// CLI handles that only record which repository they were created for.
///
/// The analysis CLI is not launched by `qsync`; the handle exists so the
/// orchestrator's acquire/evict lifecycle is visible in the logs.
#[derive(Debug, Default)]
pub struct TracingCliFactory;

#[derive(Debug)]
struct TracedCli {
    identity: RepositoryIdentity,
    root: PathBuf,
}

impl CliWrapper for TracedCli {
    fn identity(&self) -> &RepositoryIdentity {
        &self.identity
    }

    fn shutdown(&self) {
        info!(identity = %self.identity, root = %self.root.display(), "analysis CLI released");
    }
}

impl CliWrapperFactory for TracingCliFactory {
    fn create(&self, identity: &RepositoryIdentity, root: &Path) -> Arc<dyn CliWrapper> {
        info!(%identity, root = %root.display(), "analysis CLI acquired");
        Arc::new(TracedCli {
            identity: identity.clone(),
            root: root.to_path_buf(),
        })
    }
}
