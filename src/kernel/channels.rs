//! Logical channel table.
//!
//! Channel 0 is the basic channel and is always open. Supplementary
//! channels are opened and closed by MANAGE CHANNEL. Each open channel
//! holds at most one selected applet and any response bytes still waiting
//! for GET RESPONSE.

use crate::memory::ContextId;

#[derive(Clone, Debug, Default)]
struct Channel {
    open: bool,
    selected: Option<ContextId>,
    pending: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ChannelTable {
    slots: Vec<Channel>,
}

impl ChannelTable {
    /// A table of `count` channels with only the basic channel open.
    pub fn new(count: u8) -> Self {
        let mut slots = vec![Channel::default(); usize::from(count.max(1))];
        slots[0].open = true;
        ChannelTable { slots }
    }

    /// Number of channels, open or not.
    pub fn count(&self) -> u8 {
        self.slots.len() as u8
    }

    pub fn is_open(&self, channel: u8) -> bool {
        self.slot(channel).is_some_and(|c| c.open)
    }

    /// Open the lowest closed channel.
    pub fn open_lowest(&mut self) -> Option<u8> {
        let channel = self.slots.iter().position(|c| !c.open)?;
        self.slots[channel].open = true;
        Some(channel as u8)
    }

    /// Open a specific channel. False if it is out of range or already open.
    pub fn open(&mut self, channel: u8) -> bool {
        match self.slot_mut(channel) {
            Some(slot) if !slot.open => {
                slot.open = true;
                true
            }
            _ => false,
        }
    }

    /// Close a supplementary channel. The caller deselects first.
    pub fn close(&mut self, channel: u8) {
        if channel == 0 {
            return;
        }
        if let Some(slot) = self.slot_mut(channel) {
            *slot = Channel::default();
        }
    }

    pub fn selected(&self, channel: u8) -> Option<ContextId> {
        self.slot(channel).and_then(|c| c.selected)
    }

    pub fn set_selected(&mut self, channel: u8, context: Option<ContextId>) {
        if let Some(slot) = self.slot_mut(channel) {
            slot.selected = context;
        }
    }

    /// Channels on which `context` is currently selected.
    pub fn channels_of(&self, context: ContextId) -> Vec<u8> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, c)| c.selected == Some(context))
            .map(|(i, _)| i as u8)
            .collect()
    }

    /// True if `context` is selected on any channel other than `except`.
    pub fn active_elsewhere(&self, context: ContextId, except: u8) -> bool {
        self.channels_of(context).iter().any(|&c| c != except)
    }

    /// Open channels, in order.
    pub fn open_channels(&self) -> Vec<u8> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, c)| c.open)
            .map(|(i, _)| i as u8)
            .collect()
    }

    pub fn has_pending(&self, channel: u8) -> bool {
        self.slot(channel).is_some_and(|c| !c.pending.is_empty())
    }

    pub(crate) fn set_pending(&mut self, channel: u8, bytes: Vec<u8>) {
        if let Some(slot) = self.slot_mut(channel) {
            slot.pending = bytes;
        }
    }

    pub(crate) fn take_pending(&mut self, channel: u8) -> Vec<u8> {
        self.slot_mut(channel)
            .map(|c| std::mem::take(&mut c.pending))
            .unwrap_or_default()
    }

    /// Back to power-up state: basic channel open, nothing selected.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = Channel::default();
        }
        self.slots[0].open = true;
    }

    fn slot(&self, channel: u8) -> Option<&Channel> {
        self.slots.get(usize::from(channel))
    }

    fn slot_mut(&mut self, channel: u8) -> Option<&mut Channel> {
        self.slots.get_mut(usize::from(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_cycle() {
        let mut table = ChannelTable::new(3);
        assert_eq!(table.open_channels(), vec![0]);
        assert_eq!(table.open_lowest(), Some(1));
        assert!(table.open(2));
        assert!(!table.open(2));
        assert!(!table.open(3));
        assert_eq!(table.open_lowest(), None);

        table.close(1);
        assert!(!table.is_open(1));
        assert_eq!(table.open_lowest(), Some(1));

        table.close(0);
        assert!(table.is_open(0));
    }

    #[test]
    fn test_selection_tracking() {
        let mut table = ChannelTable::new(4);
        table.open(1);
        table.set_selected(0, Some(ContextId(5)));
        table.set_selected(1, Some(ContextId(5)));
        assert_eq!(table.channels_of(ContextId(5)), vec![0, 1]);
        assert!(table.active_elsewhere(ContextId(5), 0));

        table.close(1);
        assert!(!table.active_elsewhere(ContextId(5), 0));
        assert_eq!(table.selected(1), None);
    }

    #[test]
    fn test_reset_clears_everything_but_channel_zero() {
        let mut table = ChannelTable::new(2);
        table.open(1);
        table.set_selected(0, Some(ContextId(1)));
        table.set_pending(1, vec![1, 2, 3]);
        table.reset();
        assert_eq!(table.open_channels(), vec![0]);
        assert_eq!(table.selected(0), None);
        assert!(!table.has_pending(1));
    }

    #[test]
    fn test_pending_is_taken_once() {
        let mut table = ChannelTable::new(1);
        table.set_pending(0, vec![9; 4]);
        assert!(table.has_pending(0));
        assert_eq!(table.take_pending(0), vec![9; 4]);
        assert!(table.take_pending(0).is_empty());
    }
}
