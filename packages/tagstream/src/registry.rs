// Handle registry - explicit table from opaque handles to live instances
//
// Each registry has its own lock; lookups of unrelated registries never
// contend. The table owns one `Arc` per entry and `unregister` hands it back,
// so the caller decides how the instance is torn down.

use crate::error::{Result, TagStreamError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque external name of a registered instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(Uuid);

impl Handle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Handle {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for Handle {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

pub struct HandleRegistry<T: ?Sized> {
    entries: RwLock<HashMap<Handle, Arc<T>>>,
    max_entries: usize,
}

impl<T: ?Sized> HandleRegistry<T> {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Registry that rejects registrations beyond `max_entries`
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    pub fn register(&self, instance: Arc<T>) -> Result<Handle> {
        let mut entries = self.entries.write();

        if let Some((handle, _)) = entries.iter().find(|(_, e)| Arc::ptr_eq(e, &instance)) {
            return Err(TagStreamError::AlreadyRegistered(*handle));
        }
        if entries.len() >= self.max_entries {
            return Err(TagStreamError::RegistryFull(self.max_entries));
        }

        let handle = Handle::new();
        entries.insert(handle, instance);
        log::debug!("Registered handle {} ({} live)", handle, entries.len());
        Ok(handle)
    }

    pub fn resolve(&self, handle: &Handle) -> Result<Arc<T>> {
        self.entries
            .read()
            .get(handle)
            .cloned()
            .ok_or(TagStreamError::UnknownHandle(*handle))
    }

    /// Remove the entry and return the registry's reference to it
    pub fn unregister(&self, handle: &Handle) -> Result<Arc<T>> {
        let removed = self.entries.write().remove(handle);
        match removed {
            Some(instance) => {
                log::debug!("Unregistered handle {}", handle);
                Ok(instance)
            }
            None => Err(TagStreamError::UnknownHandle(*handle)),
        }
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.entries.read().contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.entries.read().keys().copied().collect()
    }

    /// Remove every entry, returning them for teardown
    pub fn drain(&self) -> Vec<(Handle, Arc<T>)> {
        self.entries.write().drain().collect()
    }
}

impl<T: ?Sized> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Instance(String);

    impl Named for Instance {
        fn name(&self) -> &str {
            &self.0
        }
    }

    #[test]
    fn test_register_resolve() {
        let registry: HandleRegistry<dyn Named> = HandleRegistry::new();
        let handle = registry
            .register(Arc::new(Instance("tagger".to_string())))
            .unwrap();
        assert_eq!(registry.resolve(&handle).unwrap().name(), "tagger");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_after_unregister_fails() {
        let registry: HandleRegistry<Instance> = HandleRegistry::new();
        let handle = registry.register(Arc::new(Instance("x".into()))).unwrap();
        registry.unregister(&handle).unwrap();

        assert!(matches!(
            registry.resolve(&handle),
            Err(TagStreamError::UnknownHandle(h)) if h == handle
        ));
        assert!(matches!(
            registry.unregister(&handle),
            Err(TagStreamError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_double_register_rejected() {
        let registry: HandleRegistry<Instance> = HandleRegistry::new();
        let instance = Arc::new(Instance("x".into()));
        let handle = registry.register(Arc::clone(&instance)).unwrap();
        assert!(matches!(
            registry.register(instance),
            Err(TagStreamError::AlreadyRegistered(h)) if h == handle
        ));
    }

    #[test]
    fn test_capacity_limit() {
        let registry: HandleRegistry<Instance> = HandleRegistry::with_capacity(1);
        registry.register(Arc::new(Instance("a".into()))).unwrap();
        assert!(matches!(
            registry.register(Arc::new(Instance("b".into()))),
            Err(TagStreamError::RegistryFull(1))
        ));
    }

    #[test]
    fn test_handle_parse_roundtrip() {
        let handle = Handle::new();
        let parsed: Handle = handle.to_string().parse().unwrap();
        assert_eq!(parsed, handle);
        assert!("not-a-handle".parse::<Handle>().is_err());
    }

    #[test]
    fn test_concurrent_registration() {
        let registry: Arc<HandleRegistry<Instance>> = Arc::new(HandleRegistry::new());
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let handle = registry
                        .register(Arc::new(Instance(format!("w{}", i))))
                        .unwrap();
                    registry.resolve(&handle).unwrap();
                    handle
                })
            })
            .collect();
        let handles: Vec<Handle> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(registry.len(), 8);

        for handle in handles {
            registry.unregister(&handle).unwrap();
        }
        assert!(registry.is_empty());
    }
}
