//! Change notifications for a git directory.
//!
//! Watches the `.git` directory with `notify` and emits one item per batch of
//! relevant filesystem events: HEAD moves, ref updates, and config edits.
//! Index and object writes are ignored; they happen on every `git add`.

use std::path::Path;

use futures::stream::{self, BoxStream, StreamExt};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Broadcasts change notifications for one git directory.
pub struct RepositoryWatcher {
    sender: broadcast::Sender<()>,
    /// `None` when the platform watcher could not be installed; changes are
    /// then only reported through [`RepositoryWatcher::poke`].
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl RepositoryWatcher {
    /// Starts watching `git_dir` recursively.
    pub fn start(git_dir: &Path) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let events = sender.clone();

        let installed = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) if event.paths.iter().any(|path| is_relevant(path)) => {
                    let _ = events.send(());
                }
                Ok(_) => {}
                Err(error) => warn!(%error, "git directory watch error"),
            },
            Config::default(),
        )
        .and_then(|mut watcher| {
            watcher.watch(git_dir, RecursiveMode::Recursive)?;
            Ok(watcher)
        });

        let watcher = match installed {
            Ok(watcher) => {
                debug!(path = %git_dir.display(), "watching git directory");
                Some(watcher)
            }
            Err(error) => {
                warn!(path = %git_dir.display(), %error, "cannot watch git directory");
                None
            }
        };

        Self {
            sender,
            watcher: Mutex::new(watcher),
        }
    }

    /// A stream of change notifications. Bursts that overflow the channel
    /// collapse into a single item.
    pub fn subscribe(&self) -> BoxStream<'static, ()> {
        let receiver = self.sender.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => Some(((), receiver)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .boxed()
    }

    /// Emits a notification without a filesystem event.
    pub fn poke(&self) {
        let _ = self.sender.send(());
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }
}

impl std::fmt::Debug for RepositoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryWatcher")
            .field("watching", &self.is_watching())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// Returns `true` for paths whose change can move HEAD, a ref, or a remote.
fn is_relevant(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    if name.ends_with(".lock") {
        return false;
    }
    if matches!(name, "HEAD" | "ORIG_HEAD" | "FETCH_HEAD" | "packed-refs" | "config") {
        return true;
    }
    path.components()
        .any(|component| component.as_os_str() == "refs")
}
