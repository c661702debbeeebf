//! Applet install and uninstall.

use tracing::{info, warn};

use crate::aid::Aid;
use crate::error::CardError;
use crate::memory::ContextId;

use super::super::applet::{Applet, AppletCatalog, InstallParams};
use super::super::registry::{Registration, RegistryError};
use super::super::runtime::{InstallScope, Runtime};
use super::{contain, CardInstance};

impl CardInstance {
    /// Install an applet instance.
    ///
    /// # Semantics
    ///
    /// 1. Refuse if the registry is full or `aid` is taken.
    /// 2. Create a fresh context and run `factory` in it.
    /// 3. The factory must register before returning.
    /// 4. On any failure, every array allocated during install is freed and
    ///    the context removed. No partly installed applet is ever
    ///    selectable.
    pub fn install<F>(&mut self, aid: &Aid, applet_data: &[u8], factory: F) -> Result<ContextId, CardError>
    where
        F: FnOnce(&mut Runtime<'_>, &InstallParams) -> Result<Box<dyn Applet>, CardError>,
    {
        // Step 1: capacity and uniqueness
        if self.registry.is_full() {
            return Err(RegistryError::RegistryFull {
                capacity: self.registry.capacity(),
            }
            .into());
        }
        if self.core.contexts.find_by_aid(aid.as_bytes()).is_some() {
            return Err(RegistryError::DuplicateAid(aid.clone()).into());
        }
        let params = InstallParams::new(aid.clone(), applet_data)?;

        // Step 2: fresh context
        let context = self
            .core
            .contexts
            .create()
            .ok_or(RegistryError::ContextsExhausted)?;

        // Step 3: run the factory
        let mut scope = InstallScope::new(params.clone());
        let built = {
            let mut rt = Runtime::installing(&mut self.core, context, &mut scope);
            contain(|| factory(&mut rt, &params))
        };
        self.core.abort_open_transaction();

        // Step 4: commit or undo
        let outcome = built.and_then(|applet| match scope.registered.take() {
            Some(registered) => Ok((registered, applet)),
            None => Err(RegistryError::NotRegistered.into()),
        });
        let (registered, applet) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                self.discard_context(context);
                warn!(%aid, error = %e, "install failed");
                return Err(e);
            }
        };

        if let Err(e) = self.registry.insert(Registration {
            aid: registered.clone(),
            context,
            params,
            applet,
        }) {
            self.discard_context(context);
            return Err(e.into());
        }
        info!(aid = %registered, %context, "applet installed");
        Ok(context)
    }

    /// Install an applet by catalog class name.
    pub fn install_from_catalog(
        &mut self,
        catalog: &AppletCatalog,
        class: &str,
        aid: &Aid,
        applet_data: &[u8],
    ) -> Result<ContextId, CardError> {
        let factory = catalog
            .get(class)
            .ok_or_else(|| RegistryError::UnknownClass(class.to_string()))?;
        self.install(aid, applet_data, factory)
    }

    /// Install every applet the configuration lists, in order.
    ///
    /// Stops at the first failure; applets installed before it stay.
    pub fn install_configured(&mut self, catalog: &AppletCatalog) -> Result<Vec<Aid>, CardError> {
        let requests = self.config.applets.clone();
        let mut installed = Vec::with_capacity(requests.len());
        for request in &requests {
            let (Ok(aid), Ok(data)) = (request.aid(), request.params()) else {
                return Err(RegistryError::MalformedInstallParams.into());
            };
            self.install_from_catalog(catalog, &request.class, &aid, &data)?;
            installed.push(aid);
        }
        Ok(installed)
    }

    /// Remove an applet and everything it owns.
    pub fn uninstall(&mut self, aid: &Aid) -> Result<(), CardError> {
        let context = self
            .registry
            .find(aid.as_bytes())
            .map(|r| r.context())
            .ok_or_else(|| RegistryError::UnknownAid(aid.clone()))?;

        for channel in self.channels.channels_of(context) {
            self.deselect_channel(channel);
        }

        if let Some(entry) = self.registry.by_context_mut(context) {
            let mut rt = Runtime::new(&mut self.core, context, 0, false);
            let outcome = contain(|| {
                entry.applet.uninstall(&mut rt);
                Ok(())
            });
            if let Err(e) = outcome {
                warn!(%aid, error = %e, "uninstall hook failed");
            }
        }
        self.core.abort_open_transaction();

        self.registry.remove(context);
        let freed = self.discard_context(context);
        info!(%aid, freed, "applet uninstalled");
        Ok(())
    }

    /// Free a context's arrays and forget the context. Returns arrays freed.
    fn discard_context(&mut self, context: ContextId) -> usize {
        let freed = self.core.memory.release_owned_by(context);
        self.core.contexts.remove(context);
        freed
    }
}
