//! Ownership contexts and the shareable export table.
//!
//! Every installed applet lives in its own context. Arrays belong to the
//! context that was active when they were allocated; the firewall in
//! [`MemoryManager`](super::MemoryManager) compares the caller's context
//! with the owner on every access. Context 0 is the runtime itself and may
//! touch anything.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::aid::Aid;

use super::region::ArrayRef;

/// Identifier of an isolation context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u16);

impl ContextId {
    /// The runtime's own context.
    pub const SYSTEM: ContextId = ContextId(0);

    #[inline]
    pub fn is_system(self) -> bool {
        self == ContextId::SYSTEM
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// A registered context.
#[derive(Clone, Debug)]
pub struct Context {
    pub id: ContextId,
    /// AID of the applet bound to this context, once it has registered.
    pub aid: Option<Aid>,
}

#[derive(Clone, Debug)]
struct Export {
    array: ArrayRef,
    /// Restrict the export to one client; `None` admits any context.
    client: Option<Aid>,
}

/// Tracks contexts, their AIDs and what each one exports.
#[derive(Debug)]
pub struct ContextTable {
    contexts: BTreeMap<ContextId, Context>,
    exports: HashMap<(ContextId, u8), Export>,
    next_id: u16,
}

impl Default for ContextTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTable {
    /// A table holding only the system context.
    pub fn new() -> Self {
        let mut contexts = BTreeMap::new();
        contexts.insert(
            ContextId::SYSTEM,
            Context {
                id: ContextId::SYSTEM,
                aid: None,
            },
        );
        ContextTable {
            contexts,
            exports: HashMap::new(),
            next_id: 1,
        }
    }

    /// Allocate a fresh context. `None` once the id space is exhausted.
    pub fn create(&mut self) -> Option<ContextId> {
        let id = ContextId(self.next_id);
        self.next_id = self.next_id.checked_add(1)?;
        self.contexts.insert(id, Context { id, aid: None });
        Some(id)
    }

    /// Bind the applet AID to a context.
    pub fn bind_aid(&mut self, id: ContextId, aid: Aid) {
        if let Some(ctx) = self.contexts.get_mut(&id) {
            ctx.aid = Some(aid);
        }
    }

    pub fn aid_of(&self, id: ContextId) -> Option<&Aid> {
        self.contexts.get(&id).and_then(|ctx| ctx.aid.as_ref())
    }

    /// Context whose applet is registered under exactly `aid`.
    pub fn find_by_aid(&self, aid: &[u8]) -> Option<ContextId> {
        self.contexts
            .values()
            .find(|ctx| ctx.aid.as_ref().is_some_and(|a| a.as_bytes() == aid))
            .map(|ctx| ctx.id)
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.contains_key(&id)
    }

    /// Number of contexts, the system context included.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Forget a context and everything it exported.
    pub fn remove(&mut self, id: ContextId) -> Option<Context> {
        if id.is_system() {
            return None;
        }
        self.exports.retain(|(server, _), _| *server != id);
        self.contexts.remove(&id)
    }

    /// Publish `array` from `server` under `parameter`.
    pub fn export(&mut self, server: ContextId, parameter: u8, array: ArrayRef, client: Option<Aid>) {
        self.exports.insert((server, parameter), Export { array, client });
    }

    /// Resolve an export for a client, honouring its client restriction.
    pub fn lookup_export(
        &self,
        server: ContextId,
        parameter: u8,
        client: Option<&Aid>,
    ) -> Option<ArrayRef> {
        let export = self.exports.get(&(server, parameter))?;
        match (&export.client, client) {
            (None, _) => Some(export.array),
            (Some(allowed), Some(client)) if allowed == client => Some(export.array),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_bind() {
        let mut table = ContextTable::new();
        let a = table.create().unwrap();
        let b = table.create().unwrap();
        assert_ne!(a, b);
        assert!(!a.is_system());

        let aid: Aid = "F000000001".parse().unwrap();
        table.bind_aid(a, aid.clone());
        assert_eq!(table.aid_of(a), Some(&aid));
        assert_eq!(table.find_by_aid(aid.as_bytes()), Some(a));
        assert_eq!(table.aid_of(b), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_system_context_cannot_be_removed() {
        let mut table = ContextTable::new();
        assert!(table.remove(ContextId::SYSTEM).is_none());
        assert!(table.contains(ContextId::SYSTEM));
    }

    #[test]
    fn test_export_restrictions() {
        let mut table = ContextTable::new();
        let server = table.create().unwrap();
        let array = ArrayRef::new(11, server);
        let friend: Aid = "A000000001".parse().unwrap();
        let stranger: Aid = "A000000002".parse().unwrap();

        table.export(server, 1, array, Some(friend.clone()));
        table.export(server, 2, array, None);

        assert_eq!(table.lookup_export(server, 1, Some(&friend)), Some(array));
        assert_eq!(table.lookup_export(server, 1, Some(&stranger)), None);
        assert_eq!(table.lookup_export(server, 1, None), None);
        assert_eq!(table.lookup_export(server, 2, Some(&stranger)), Some(array));
        assert_eq!(table.lookup_export(server, 3, Some(&friend)), None);

        table.remove(server);
        assert_eq!(table.lookup_export(server, 2, None), None);
    }
}
