//! Selection and logical channel management.

use tracing::{debug, info, warn};

use crate::aid::Aid;
use crate::apdu::StatusWord;
use crate::memory::ContextId;

use super::super::runtime::Runtime;
use super::{contain, CardInstance};

impl CardInstance {
    /// Select the applet registered as `aid` on `channel`.
    ///
    /// Returns false if the channel is closed, the AID unknown, the applet
    /// is already active elsewhere without multi-select support, or its
    /// select hook refused.
    pub fn select(&mut self, aid: &Aid, channel: u8) -> bool {
        let Some(target) = self.registry.find(aid.as_bytes()).map(|r| r.context()) else {
            return false;
        };
        if !self.channels.is_open(channel) {
            return false;
        }
        self.select_on(channel, target).is_ok()
    }

    /// Deselect whatever is active on `channel`.
    pub fn deselect(&mut self, channel: u8) {
        self.deselect_channel(channel);
    }

    /// Make `target` the selected applet on `channel`.
    ///
    /// # Semantics
    ///
    /// 1. A non-multi-selectable applet already active on another channel
    ///    is refused with `6985` before anything is deselected.
    /// 2. The applet currently on `channel` is deselected (even if it is
    ///    `target` itself).
    /// 3. `target`'s select hook runs. If it refuses or fails, the channel
    ///    is left with nothing selected and `6999` is returned.
    pub(super) fn select_on(&mut self, channel: u8, target: ContextId) -> Result<(), StatusWord> {
        let multi = self
            .registry
            .by_context(target)
            .map(|r| r.multi_selectable())
            .ok_or(StatusWord::FILE_NOT_FOUND)?;
        if !multi && self.channels.active_elsewhere(target, channel) {
            warn!(context = %target, channel, "applet not multi-selectable, already active");
            return Err(StatusWord::CONDITIONS_NOT_SATISFIED);
        }

        self.deselect_channel(channel);
        self.channels.set_selected(channel, Some(target));

        let accepted = match self.registry.by_context_mut(target) {
            Some(entry) => {
                let mut rt = Runtime::new(&mut self.core, target, channel, true);
                contain(|| Ok(entry.applet.select(&mut rt)))
            }
            None => Ok(false),
        };
        if let Some(replayed) = self.core.abort_open_transaction() {
            debug!(replayed, "select hook left a transaction open");
        }

        match accepted {
            Ok(true) => {
                info!(context = %target, channel, "applet selected");
                Ok(())
            }
            outcome => {
                if let Err(e) = outcome {
                    warn!(context = %target, error = %e, "select hook failed");
                }
                self.channels.set_selected(channel, None);
                if !self.channels.active_elsewhere(target, channel) {
                    self.core.memory.reset_clear_on_deselect(target);
                }
                info!(context = %target, channel, "selection refused");
                Err(StatusWord::APPLET_SELECT_FAILED)
            }
        }
    }

    /// Run the deselect path for `channel`.
    ///
    /// Clear-on-deselect memory is only cleared once the applet is no
    /// longer active on any channel.
    pub(super) fn deselect_channel(&mut self, channel: u8) {
        let Some(context) = self.channels.selected(channel) else {
            return;
        };
        self.channels.set_selected(channel, None);

        if let Some(entry) = self.registry.by_context_mut(context) {
            let mut rt = Runtime::new(&mut self.core, context, channel, false);
            let outcome = contain(|| {
                entry.applet.deselect(&mut rt);
                Ok(())
            });
            if let Err(e) = outcome {
                warn!(%context, error = %e, "deselect hook failed");
            }
        }
        if let Some(replayed) = self.core.abort_open_transaction() {
            debug!(replayed, "deselect hook left a transaction open");
        }

        if self.channels.channels_of(context).is_empty() {
            self.core.memory.reset_clear_on_deselect(context);
        }
        info!(%context, channel, "applet deselected");
    }

    /// Open the lowest free supplementary channel from `origin`.
    ///
    /// From the basic channel the new channel starts empty. From any other
    /// channel the origin's applet is selected on the new one too, which
    /// requires multi-select support; if that fails the channel is closed
    /// again.
    pub fn open_channel(&mut self, origin: u8) -> Result<u8, StatusWord> {
        self.open_channel_with(origin, None)
    }

    /// Open channel `requested` (or the lowest free one) from `origin`.
    pub(super) fn open_channel_with(&mut self, origin: u8, requested: Option<u8>) -> Result<u8, StatusWord> {
        if !self.channels.is_open(origin) || self.channels.count() == 1 {
            return Err(StatusWord::LOGICAL_CHANNEL_NOT_SUPPORTED);
        }
        let channel = match requested {
            None => self
                .channels
                .open_lowest()
                .ok_or(StatusWord::FUNC_NOT_SUPPORTED)?,
            Some(n) if n >= self.channels.count() => {
                return Err(StatusWord::LOGICAL_CHANNEL_NOT_SUPPORTED)
            }
            Some(n) => {
                if !self.channels.open(n) {
                    return Err(StatusWord::INCORRECT_P1P2);
                }
                n
            }
        };

        if origin != 0 {
            if let Some(context) = self.channels.selected(origin) {
                if let Err(sw) = self.select_on(channel, context) {
                    self.channels.close(channel);
                    return Err(sw);
                }
            }
        }
        info!(channel, origin, "logical channel opened");
        Ok(channel)
    }

    /// Close a supplementary channel, deselecting its applet.
    pub fn close_channel(&mut self, channel: u8) -> Result<(), StatusWord> {
        if channel == 0 || !self.channels.is_open(channel) {
            return Err(StatusWord::INCORRECT_P1P2);
        }
        self.deselect_channel(channel);
        self.channels.close(channel);
        info!(channel, "logical channel closed");
        Ok(())
    }
}
