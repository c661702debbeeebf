//! The system surface applets program against.
//!
//! A `Runtime` is handed to every applet entry point. It is bound to the
//! applet's own context, so every allocation is attributed to the right
//! owner and every array access is checked against the firewall without
//! the applet having to say who it is.

use tracing::{debug, info};

use crate::aid::Aid;
use crate::error::CardError;
use crate::memory::{ArrayRef, ContextId, ElementKind, Lifetime, MemoryError};

use super::applet::InstallParams;
use super::card::CardCore;
use super::registry::RegistryError;

/// Install state visible to `register`.
#[derive(Debug)]
pub(crate) struct InstallScope {
    pub(crate) params: InstallParams,
    pub(crate) registered: Option<Aid>,
}

impl InstallScope {
    pub(crate) fn new(params: InstallParams) -> Self {
        InstallScope {
            params,
            registered: None,
        }
    }
}

/// Applet-facing runtime bound to one context.
pub struct Runtime<'a> {
    core: &'a mut CardCore,
    context: ContextId,
    channel: u8,
    selecting: bool,
    install: Option<&'a mut InstallScope>,
}

impl<'a> Runtime<'a> {
    pub(crate) fn new(core: &'a mut CardCore, context: ContextId, channel: u8, selecting: bool) -> Self {
        Runtime {
            core,
            context,
            channel,
            selecting,
            install: None,
        }
    }

    pub(crate) fn installing(core: &'a mut CardCore, context: ContextId, scope: &'a mut InstallScope) -> Self {
        Runtime {
            core,
            context,
            channel: 0,
            selecting: false,
            install: Some(scope),
        }
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    /// AID the current applet registered under. `None` during install until
    /// `register` has been called.
    pub fn aid(&self) -> Option<&Aid> {
        self.core.contexts.aid_of(self.context)
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The installed applet whose AID is exactly `aid`, if any.
    pub fn lookup_aid(&self, aid: &[u8]) -> Option<Aid> {
        let context = self.core.contexts.find_by_aid(aid)?;
        self.core.contexts.aid_of(context).cloned()
    }

    /// Logical channel of the current exchange.
    pub fn assigned_channel(&self) -> u8 {
        self.channel
    }

    /// True while processing the SELECT that activated this applet.
    pub fn is_selecting(&self) -> bool {
        self.selecting
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register under the instance AID from the install parameters.
    pub fn register(&mut self) -> Result<(), CardError> {
        let aid = self
            .install
            .as_ref()
            .map(|scope| scope.params.instance_aid.clone())
            .ok_or(RegistryError::NotInstalling)?;
        self.bind(aid)
    }

    /// Register under `len` bytes of `bytes` starting at `offset`.
    pub fn register_aid(&mut self, bytes: &[u8], offset: usize, len: usize) -> Result<(), CardError> {
        let aid = Aid::from_slice(bytes, offset, len)?;
        self.bind(aid)
    }

    fn bind(&mut self, aid: Aid) -> Result<(), CardError> {
        let scope = self.install.as_mut().ok_or(RegistryError::NotInstalling)?;
        if let Some(existing) = &scope.registered {
            return Err(RegistryError::AlreadyRegistered(existing.clone()).into());
        }
        if self.core.contexts.find_by_aid(aid.as_bytes()).is_some() {
            return Err(RegistryError::DuplicateAid(aid).into());
        }
        self.core.contexts.bind_aid(self.context, aid.clone());
        info!(%aid, context = %self.context, "applet registered");
        scope.registered = Some(aid);
        Ok(())
    }

    // =========================================================================
    // ALLOCATION
    // =========================================================================

    pub fn make_byte_array(&mut self, lifetime: Lifetime, len: usize) -> Result<ArrayRef, CardError> {
        self.allocate(lifetime, ElementKind::Byte, len)
    }

    pub fn make_short_array(&mut self, lifetime: Lifetime, len: usize) -> Result<ArrayRef, CardError> {
        self.allocate(lifetime, ElementKind::Short, len)
    }

    pub fn make_boolean_array(&mut self, lifetime: Lifetime, len: usize) -> Result<ArrayRef, CardError> {
        self.allocate(lifetime, ElementKind::Boolean, len)
    }

    pub fn make_object_array(&mut self, lifetime: Lifetime, len: usize) -> Result<ArrayRef, CardError> {
        self.allocate(lifetime, ElementKind::Object, len)
    }

    fn allocate(&mut self, lifetime: Lifetime, kind: ElementKind, len: usize) -> Result<ArrayRef, CardError> {
        let core = &mut *self.core;
        Ok(core
            .memory
            .allocate(&mut core.transaction, self.context, lifetime, kind, len)?)
    }

    /// Remaining quota for `lifetime`.
    pub fn available_memory(&self, lifetime: Lifetime) -> usize {
        self.core.memory.available(lifetime)
    }

    pub fn array_len(&self, array: ArrayRef) -> Result<usize, CardError> {
        Ok(self.core.memory.len(array.id())?)
    }

    pub fn lifetime_of(&self, array: ArrayRef) -> Result<Lifetime, CardError> {
        Ok(self.core.memory.lifetime_of(array.id())?)
    }

    pub fn is_transient(&self, array: ArrayRef) -> Result<bool, CardError> {
        Ok(self.lifetime_of(array)?.is_transient())
    }

    // =========================================================================
    // ARRAY ACCESS
    // =========================================================================

    pub fn get_byte(&self, array: ArrayRef, index: usize) -> Result<u8, CardError> {
        Ok(self.core.memory.get_byte(self.context, array, index)?)
    }

    pub fn set_byte(&mut self, array: ArrayRef, index: usize, value: u8) -> Result<(), CardError> {
        let core = &mut *self.core;
        Ok(core
            .memory
            .set_byte(&mut core.transaction, self.context, array, index, value)?)
    }

    pub fn get_short(&self, array: ArrayRef, index: usize) -> Result<i16, CardError> {
        Ok(self.core.memory.get_short(self.context, array, index)?)
    }

    pub fn set_short(&mut self, array: ArrayRef, index: usize, value: i16) -> Result<(), CardError> {
        let core = &mut *self.core;
        Ok(core
            .memory
            .set_short(&mut core.transaction, self.context, array, index, value)?)
    }

    pub fn get_boolean(&self, array: ArrayRef, index: usize) -> Result<bool, CardError> {
        Ok(self.core.memory.get_boolean(self.context, array, index)?)
    }

    pub fn set_boolean(&mut self, array: ArrayRef, index: usize, value: bool) -> Result<(), CardError> {
        let core = &mut *self.core;
        Ok(core
            .memory
            .set_boolean(&mut core.transaction, self.context, array, index, value)?)
    }

    pub fn get_ref(&self, array: ArrayRef, index: usize) -> Result<Option<ArrayRef>, CardError> {
        Ok(self.core.memory.get_ref(self.context, array, index)?)
    }

    pub fn set_ref(&mut self, array: ArrayRef, index: usize, value: Option<ArrayRef>) -> Result<(), CardError> {
        let core = &mut *self.core;
        Ok(core
            .memory
            .set_ref(&mut core.transaction, self.context, array, index, value)?)
    }

    pub fn read_bytes(&self, array: ArrayRef, offset: usize, len: usize) -> Result<Vec<u8>, CardError> {
        Ok(self.core.memory.read_bytes(self.context, array, offset, len)?)
    }

    /// The whole byte array.
    pub fn to_vec(&self, array: ArrayRef) -> Result<Vec<u8>, CardError> {
        let len = self.array_len(array)?;
        self.read_bytes(array, 0, len)
    }

    pub fn write_bytes(&mut self, array: ArrayRef, offset: usize, data: &[u8]) -> Result<(), CardError> {
        let core = &mut *self.core;
        Ok(core
            .memory
            .write_bytes(&mut core.transaction, self.context, array, offset, data)?)
    }

    pub fn fill_bytes(&mut self, array: ArrayRef, offset: usize, len: usize, value: u8) -> Result<(), CardError> {
        let core = &mut *self.core;
        Ok(core
            .memory
            .fill_bytes(&mut core.transaction, self.context, array, offset, len, value)?)
    }

    /// Copy `len` bytes between two byte arrays (which may be the same one).
    pub fn copy_bytes(
        &mut self,
        src: ArrayRef,
        src_offset: usize,
        dst: ArrayRef,
        dst_offset: usize,
        len: usize,
    ) -> Result<(), CardError> {
        let data = self.read_bytes(src, src_offset, len)?;
        self.write_bytes(dst, dst_offset, &data)
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    pub fn begin_transaction(&mut self) -> Result<(), CardError> {
        Ok(self.core.transaction.begin()?)
    }

    pub fn commit_transaction(&mut self) -> Result<(), CardError> {
        self.core.transaction.commit()?;
        Ok(())
    }

    /// Abort and roll back the open transaction.
    pub fn abort_transaction(&mut self) -> Result<(), CardError> {
        let journal = self.core.transaction.abort()?;
        let replayed = self.core.memory.roll_back(journal);
        debug!(context = %self.context, replayed, "applet aborted transaction");
        Ok(())
    }

    pub fn transaction_depth(&self) -> u8 {
        self.core.transaction.depth()
    }

    pub fn max_commit_capacity(&self) -> usize {
        self.core.transaction.max_commit_capacity()
    }

    pub fn unused_commit_capacity(&self) -> usize {
        self.core.transaction.unused_commit_capacity()
    }

    // =========================================================================
    // SHAREABLE OBJECTS
    // =========================================================================

    /// Publish an owned array to other contexts under `parameter`.
    ///
    /// With `client` set, only the applet registered under that AID may
    /// obtain it.
    pub fn export_shareable(
        &mut self,
        array: ArrayRef,
        parameter: u8,
        client: Option<&Aid>,
    ) -> Result<(), CardError> {
        let owner = self.core.memory.owner_of(array.id())?;
        if owner != self.context {
            return Err(MemoryError::SecurityViolation {
                caller: self.context,
                owner,
            }
            .into());
        }
        self.core
            .contexts
            .export(self.context, parameter, array, client.cloned());
        Ok(())
    }

    /// Obtain an array another applet exported, gaining access to it.
    pub fn shareable_object(&mut self, server: &Aid, parameter: u8) -> Option<ArrayRef> {
        let server_ctx = self.core.contexts.find_by_aid(server.as_bytes())?;
        let client = self.core.contexts.aid_of(self.context).cloned();
        let array = self
            .core
            .contexts
            .lookup_export(server_ctx, parameter, client.as_ref())?;
        self.core.memory.grant(array.id(), self.context).ok()?;
        debug!(%server, parameter, client = %self.context, "shareable object granted");
        Some(array)
    }
}
