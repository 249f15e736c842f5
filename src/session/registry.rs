//! Insertion-ordered registry of live sessions.
//!
//! Keys are connection identities, values are session handles. Each entry
//! carries the sequence number it was first inserted with; iteration sorts
//! by it, so order is stable while other entries come and go.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::net::channel::ChannelId;
use crate::observability::metrics;
use crate::session::Session;

struct Entry {
    seq: u64,
    session: Arc<dyn Session>,
}

/// Identity → session mapping shared by every concurrency domain.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<ChannelId, Entry>,
    next_seq: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under `id`.
    ///
    /// Registering an identity twice is a caller bug; the handle is replaced
    /// but the entry keeps its original position.
    pub fn put(&self, id: ChannelId, session: Arc<dyn Session>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                tracing::warn!(connection = %occupied.key(), "Identity registered twice, replacing session");
                occupied.get_mut().session = session;
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry { seq, session });
            }
        }
        metrics::record_registry_size(self.entries.len());
    }

    pub fn get(&self, id: &ChannelId) -> Option<Arc<dyn Session>> {
        self.entries.get(id).map(|entry| Arc::clone(&entry.session))
    }

    /// Remove `id`. Absent identities are a no-op.
    pub fn remove(&self, id: &ChannelId) -> Option<Arc<dyn Session>> {
        let removed = self.entries.remove(id).map(|(_, entry)| entry.session);
        if removed.is_some() {
            metrics::record_registry_size(self.entries.len());
        }
        removed
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<(ChannelId, Arc<dyn Session>)> {
        let mut snapshot: Vec<(u64, ChannelId, Arc<dyn Session>)> = self
            .entries
            .iter()
            .map(|e| (e.seq, e.key().clone(), Arc::clone(&e.session)))
            .collect();
        snapshot.sort_unstable_by_key(|(seq, _, _)| *seq);
        snapshot
            .into_iter()
            .map(|(_, id, session)| (id, session))
            .collect()
    }

    /// Identities in insertion order.
    pub fn identities(&self) -> Vec<ChannelId> {
        self.entries().into_iter().map(|(id, _)| id).collect()
    }

    /// Visit every session in insertion order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ChannelId, &Arc<dyn Session>),
    {
        for (id, session) in self.entries() {
            f(&id, &session);
        }
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct StubSession {
        disconnects: AtomicUsize,
    }

    impl Session for StubSession {
        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn id(s: &str) -> ChannelId {
        ChannelId::from(s)
    }

    #[test]
    fn put_get_remove() {
        let registry = ConnectionRegistry::new();
        registry.put(id("a"), Arc::new(StubSession::default()));

        assert!(registry.get(&id("a")).is_some());
        assert!(registry.get(&id("b")).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&id("a")).is_some());
        assert!(registry.remove(&id("a")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn iteration_keeps_insertion_order() {
        let registry = ConnectionRegistry::new();
        for name in ["a", "b", "c"] {
            registry.put(id(name), Arc::new(StubSession::default()));
        }
        registry.remove(&id("b"));
        assert_eq!(registry.identities(), vec![id("a"), id("c")]);

        registry.put(id("b"), Arc::new(StubSession::default()));
        assert_eq!(registry.identities(), vec![id("a"), id("c"), id("b")]);
    }

    #[test]
    fn duplicate_put_keeps_position() {
        let registry = ConnectionRegistry::new();
        let first = Arc::new(StubSession::default());
        let second = Arc::new(StubSession::default());
        registry.put(id("a"), first);
        registry.put(id("b"), Arc::new(StubSession::default()));
        registry.put(id("a"), second.clone());

        assert_eq!(registry.identities(), vec![id("a"), id("b")]);
        registry.get(&id("a")).unwrap().disconnect();
        assert_eq!(second.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn present_set_matches_put_minus_remove() {
        let registry = ConnectionRegistry::new();
        let ops: &[(bool, &str)] = &[
            (true, "a"),
            (true, "b"),
            (false, "z"),
            (true, "c"),
            (false, "a"),
            (false, "a"),
            (true, "d"),
            (false, "c"),
        ];
        let mut expected: Vec<&str> = Vec::new();
        for (insert, name) in ops {
            if *insert {
                registry.put(id(name), Arc::new(StubSession::default()));
                expected.push(name);
            } else {
                registry.remove(&id(name));
                expected.retain(|n| n != name);
            }
        }
        let expected: Vec<ChannelId> = expected.into_iter().map(id).collect();
        assert_eq!(registry.identities(), expected);
    }

    #[test]
    fn concurrent_mutation_and_iteration() {
        let registry = Arc::new(ConnectionRegistry::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = id(&format!("{t}-{i}"));
                        registry.put(key.clone(), Arc::new(StubSession::default()));
                        if i % 2 == 0 {
                            registry.remove(&key);
                        }
                    }
                })
            })
            .collect();
        let reader = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let ids = registry.identities();
                    let mut seen = std::collections::HashSet::new();
                    assert!(ids.iter().all(|i| seen.insert(i.clone())));
                }
            })
        };
        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(registry.len(), 4 * 250);

        // Each writer's surviving keys appear in the order that writer inserted them.
        let ids = registry.identities();
        let mine: Vec<&ChannelId> = ids.iter().filter(|i| i.as_str().starts_with("0-")).collect();
        let expected: Vec<ChannelId> = (0..500).filter(|i| i % 2 == 1).map(|i| id(&format!("0-{i}"))).collect();
        assert_eq!(mine, expected.iter().collect::<Vec<_>>());
    }
}
