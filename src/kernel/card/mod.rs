mod dispatch;
mod install;
mod select;


use std::panic::{self, AssertUnwindSafe};

use tracing::{info, warn};

use crate::aid::Aid;
use crate::config::{CardConfig, ConfigError};
use crate::error::CardError;
use crate::memory::{ContextTable, Lifetime, MemoryManager};
use crate::transaction::TransactionManager;

use super::channels::ChannelTable;
use super::registry::AppletRegistry;
use super::runtime::Runtime;

/// Memory, transactions and contexts: everything a [`Runtime`] borrows.
///
/// Kept apart from the registry so an applet can be borrowed out of the
/// registry while its runtime borrows the core.
#[derive(Debug)]
pub(crate) struct CardCore {
    pub(crate) memory: MemoryManager,
    pub(crate) transaction: TransactionManager,
    pub(crate) contexts: ContextTable,
}

impl CardCore {
    /// Abort a transaction left open by applet code.
    ///
    /// Returns the number of journal entries replayed, or `None` if no
    /// transaction was active.
    pub(crate) fn abort_open_transaction(&mut self) -> Option<usize> {
        let journal = self.transaction.abort().ok()?;
        Some(self.memory.roll_back(journal))
    }
}

/// One simulated card.
///
/// Owns every piece of card state. Separate instances share nothing, so a
/// host may run as many as it likes, each on its own thread.
#[derive(Debug)]
pub struct CardInstance {
    config: CardConfig,
    atr: Vec<u8>,
    core: CardCore,
    registry: AppletRegistry,
    channels: ChannelTable,
}

impl CardInstance {
    /// Build a powered-up card with nothing installed.
    pub fn new(config: CardConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let atr = config.atr_bytes()?;
        Ok(CardInstance {
            atr,
            core: CardCore {
                memory: MemoryManager::new(config.quotas()),
                transaction: TransactionManager::new(config.commit_capacity),
                contexts: ContextTable::new(),
            },
            registry: AppletRegistry::new(config.max_applets),
            channels: ChannelTable::new(config.logical_channels),
            config,
        })
    }

    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    /// Answer-To-Reset bytes.
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Power-cycle the card.
    ///
    /// Transient memory is cleared, every supplementary channel closed and
    /// every selection dropped. Deselect hooks do not run: the card lost
    /// power. Returns the ATR.
    pub fn reset(&mut self) -> Vec<u8> {
        if let Some(replayed) = self.core.abort_open_transaction() {
            warn!(replayed, "transaction open at reset rolled back");
        }
        let cleared = self.core.memory.reset_clear_on_reset();
        self.channels.reset();
        info!(cleared, "card reset");
        self.atr.clone()
    }

    /// AID of the applet selected on `channel`.
    pub fn currently_active(&self, channel: u8) -> Option<&Aid> {
        let context = self.channels.selected(channel)?;
        self.registry.by_context(context).map(|r| r.aid())
    }

    /// AIDs of every installed applet, in install order.
    pub fn applets(&self) -> Vec<Aid> {
        self.registry.iter().map(|r| r.aid().clone()).collect()
    }

    /// Open logical channels.
    pub fn open_channels(&self) -> Vec<u8> {
        self.channels.open_channels()
    }

    pub fn available_memory(&self, lifetime: Lifetime) -> usize {
        self.core.memory.available(lifetime)
    }

    pub fn transaction_depth(&self) -> u8 {
        self.core.transaction.depth()
    }

    /// Let `after_writes` more persistent writes through, then fail the next
    /// one as if power was lost.
    pub fn arm_tear(&mut self, after_writes: usize) {
        self.core.transaction.tear_injector_mut().arm(after_writes);
    }

    pub fn disarm_tear(&mut self) {
        self.core.transaction.tear_injector_mut().disarm();
    }

    /// Tears fired so far.
    pub fn tears_fired(&self) -> u64 {
        self.core.transaction.tear_injector().times_fired()
    }

    /// Run `f` with a runtime bound to the applet registered as `aid`.
    ///
    /// Lets the terminal side and tests look at an applet's memory through
    /// the same checked primitives the applet uses. A transaction `f` leaves
    /// open is rolled back.
    pub fn inspect<R>(&mut self, aid: &Aid, f: impl FnOnce(&mut Runtime<'_>) -> R) -> Option<R> {
        let context = self.registry.find(aid.as_bytes())?.context();
        let result = {
            let mut rt = Runtime::new(&mut self.core, context, 0, false);
            f(&mut rt)
        };
        self.core.abort_open_transaction();
        Some(result)
    }
}

/// Run applet code, turning a panic into [`CardError::Uncaught`].
pub(crate) fn contain<R>(f: impl FnOnce() -> Result<R, CardError>) -> Result<R, CardError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(msg) = payload.downcast_ref::<&str>() {
                msg.to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "<unknown panic>".to_string()
            };
            Err(CardError::Uncaught(message))
        }
    }
}
