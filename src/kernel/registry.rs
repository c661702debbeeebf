//! Installed applets keyed by AID.

use thiserror::Error;

use crate::aid::Aid;
use crate::memory::ContextId;

use super::applet::{Applet, InstallParams};

/// Install, registration and lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("AID {0} is already registered")]
    DuplicateAid(Aid),

    /// The factory returned without registering the applet.
    #[error("applet did not register during installation")]
    NotRegistered,

    /// `register` called a second time by the same install.
    #[error("applet already registered as {0}")]
    AlreadyRegistered(Aid),

    /// `register` called outside an install.
    #[error("register is only legal during installation")]
    NotInstalling,

    #[error("applet registry full ({capacity} applets)")]
    RegistryFull { capacity: usize },

    #[error("no context identifiers left")]
    ContextsExhausted,

    #[error("no applet registered as {0}")]
    UnknownAid(Aid),

    #[error("no applet class named {0:?}")]
    UnknownClass(String),

    #[error("malformed install parameters")]
    MalformedInstallParams,

    #[error("install data of {0} bytes exceeds 255")]
    InstallDataTooLong(usize),
}

/// One installed applet.
#[derive(Debug)]
pub struct Registration {
    pub(crate) aid: Aid,
    pub(crate) context: ContextId,
    pub(crate) params: InstallParams,
    pub(crate) applet: Box<dyn Applet>,
}

impl Registration {
    pub fn aid(&self) -> &Aid {
        &self.aid
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn params(&self) -> &InstallParams {
        &self.params
    }

    pub fn multi_selectable(&self) -> bool {
        self.applet.multi_selectable()
    }
}

/// The dispatch table.
///
/// Entries keep install order, which is also the order partial AID
/// selection searches in.
#[derive(Debug)]
pub struct AppletRegistry {
    entries: Vec<Registration>,
    capacity: usize,
}

impl AppletRegistry {
    pub fn new(capacity: usize) -> Self {
        AppletRegistry {
            entries: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Add a fully installed applet.
    pub fn insert(&mut self, registration: Registration) -> Result<(), RegistryError> {
        if self.is_full() {
            return Err(RegistryError::RegistryFull {
                capacity: self.capacity,
            });
        }
        if self.find(registration.aid.as_bytes()).is_some() {
            return Err(RegistryError::DuplicateAid(registration.aid));
        }
        self.entries.push(registration);
        Ok(())
    }

    pub fn remove(&mut self, context: ContextId) -> Option<Registration> {
        let index = self.entries.iter().position(|r| r.context == context)?;
        Some(self.entries.remove(index))
    }

    /// Exact AID lookup.
    pub fn find(&self, aid: &[u8]) -> Option<&Registration> {
        self.entries.iter().find(|r| r.aid.as_bytes() == aid)
    }

    /// Resolve the AID bytes of a SELECT: an exact match first, then the
    /// first applet whose AID starts with them.
    pub fn resolve_select(&self, aid: &[u8]) -> Option<&Registration> {
        self.find(aid)
            .or_else(|| self.entries.iter().find(|r| r.aid.partial_matches(aid)))
    }

    pub fn by_context(&self, context: ContextId) -> Option<&Registration> {
        self.entries.iter().find(|r| r.context == context)
    }

    pub fn by_context_mut(&mut self, context: ContextId) -> Option<&mut Registration> {
        self.entries.iter_mut().find(|r| r.context == context)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.iter()
    }
}
