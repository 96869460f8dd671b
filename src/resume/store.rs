//! Registry of resumable sessions on a server.
//!
//! `SessionStore` maps resume tokens to live connection handles so a RESUME
//! arriving on a fresh transport can be routed to the connection that owns
//! the session state. It is the only state shared across connection actors;
//! `DashMap` guards it. Dead entries can be pruned opportunistically.

use dashmap::DashMap;

use super::ResumeToken;

/// Concurrent registry of resumable sessions keyed by [`ResumeToken`].
pub struct SessionStore<H>(DashMap<ResumeToken, H>);

impl<H: Clone> SessionStore<H> {
    #[must_use]
    pub fn new() -> Self { Self(DashMap::new()) }

    /// Retrieve the handle registered for `token`.
    #[must_use]
    pub fn get(&self, token: &ResumeToken) -> Option<H> {
        self.0.get(token).map(|entry| entry.value().clone())
    }

    /// Register a freshly accepted resumable session.
    pub fn insert(&self, token: ResumeToken, handle: H) { self.0.insert(token, handle); }

    /// Remove a session, typically once its connection closes for good.
    pub fn remove(&self, token: &ResumeToken) { self.0.remove(token); }

    /// Drop entries for which `alive` returns false.
    pub fn prune(&self, alive: impl Fn(&H) -> bool) { self.0.retain(|_, handle| alive(handle)); }

    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl<H: Clone> Default for SessionStore<H> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let store = SessionStore::new();
        let token = ResumeToken::from_bytes(&b"tok"[..]);
        store.insert(token.clone(), 7u32);
        assert_eq!(store.get(&token), Some(7));
        store.remove(&token);
        assert!(store.get(&token).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn prune_drops_dead_sessions() {
        let store = SessionStore::new();
        store.insert(ResumeToken::from_bytes(&b"a"[..]), 1u32);
        store.insert(ResumeToken::from_bytes(&b"b"[..]), 2u32);
        store.prune(|value| *value == 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&ResumeToken::from_bytes(&b"b"[..])), Some(2));
    }
}
