//! Registry of external CLI handles keyed by repository identity.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use domain::{CliWrapper, CliWrapperFactory, RepositoryIdentity};
use tracing::{debug, info};

/// Owns at most one [`CliWrapper`] per repository identity.
pub struct CliRegistry {
    factory: Arc<dyn CliWrapperFactory>,
    handles: HashMap<RepositoryIdentity, Arc<dyn CliWrapper>>,
}

impl CliRegistry {
    pub fn new(factory: Arc<dyn CliWrapperFactory>) -> Self {
        Self {
            factory,
            handles: HashMap::new(),
        }
    }

    /// Returns the handle for `identity`, creating it on first use.
    pub fn acquire(&mut self, identity: &RepositoryIdentity, root: &Path) -> Arc<dyn CliWrapper> {
        if let Some(handle) = self.handles.get(identity) {
            debug!(%identity, "reusing CLI handle");
            return Arc::clone(handle);
        }

        info!(%identity, root = %root.display(), "creating CLI handle");
        let handle = self.factory.create(identity, root);
        self.handles.insert(identity.clone(), Arc::clone(&handle));
        handle
    }

    /// Removes and shuts down the handle for `identity`, if any.
    pub fn evict(&mut self, identity: &RepositoryIdentity) -> bool {
        match self.handles.remove(identity) {
            Some(handle) => {
                info!(%identity, "evicting CLI handle");
                handle.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl std::fmt::Debug for CliRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliRegistry")
            .field("identities", &self.handles.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::testing::{identity, RecordingCliFactory};

    #[test]
    fn test_acquire_reuses_handle_per_identity() {
        let factory = Arc::new(RecordingCliFactory::default());
        let mut registry = CliRegistry::new(factory.clone());
        let root = PathBuf::from("/work/widgets");

        let first = registry.acquire(&identity("acme", "widgets"), &root);
        let second = registry.acquire(&identity("acme", "widgets"), &root);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_evict_shuts_down_handle() {
        let factory = Arc::new(RecordingCliFactory::default());
        let mut registry = CliRegistry::new(factory.clone());
        let root = PathBuf::from("/work/widgets");

        registry.acquire(&identity("acme", "widgets"), &root);
        assert!(registry.evict(&identity("acme", "widgets")));
        assert!(!registry.evict(&identity("acme", "widgets")));

        assert!(registry.is_empty());
        assert_eq!(factory.shut_down(), 1);
    }
}
