//! Named registry of live clients owned by the core.
//!
//! # Invariants
//! - At most one client exists per name.
//! - `get_or_create` runs the factory at most once per name while the entry
//!   exists, even under concurrent callers.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

pub struct ClientNamespace<C> {
    clients: RwLock<BTreeMap<String, Arc<C>>>,
}

impl<C> Default for ClientNamespace<C> {
    fn default() -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<C> ClientNamespace<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the client called `name`, building it with `factory` if absent.
    ///
    /// A factory error leaves the namespace unchanged.
    pub fn get_or_create<E>(
        &self,
        name: &str,
        factory: impl FnOnce() -> Result<C, E>,
    ) -> Result<Arc<C>, E> {
        if let Some(client) = self.get(name) {
            return Ok(client);
        }

        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(name) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(factory()?);
        clients.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    pub fn get(&self, name: &str) -> Option<Arc<C>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Detaches the client called `name`; it closes once the last handle drops.
    pub fn remove(&self, name: &str) -> Option<Arc<C>> {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::ClientNamespace;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn factory_runs_once_per_name_under_contention() {
        let namespace = Arc::new(ClientNamespace::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let namespace = Arc::clone(&namespace);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    namespace
                        .get_or_create("shared", || {
                            Ok::<_, ()>(calls.fetch_add(1, Ordering::SeqCst))
                        })
                        .unwrap()
                })
            })
            .collect();

        let values: Vec<usize> = handles.into_iter().map(|h| *h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|value| *value == 0));
    }

    #[test]
    fn failed_factory_leaves_no_entry() {
        let namespace = ClientNamespace::<u8>::new();
        let result = namespace.get_or_create("broken", || Err("boom"));
        assert_eq!(result.unwrap_err(), "boom");
        assert!(namespace.is_empty());
    }

    #[test]
    fn remove_detaches_entry() {
        let namespace = ClientNamespace::<u8>::new();
        namespace.get_or_create("a", || Ok::<_, ()>(1)).unwrap();
        assert_eq!(namespace.names(), vec!["a".to_string()]);
        assert!(namespace.remove("a").is_some());
        assert!(!namespace.contains("a"));
    }
}
