//! Threaded card terminal.
//!
//! Runs each `CardInstance` on its own thread and feeds it through a
//! command queue, so at most one exchange is ever in flight per card no
//! matter how many host threads hold the terminal.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info};

use crate::kernel::CardInstance;

/// How long a caller waits for the card thread to answer.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

type CardJob = Box<dyn FnOnce(&mut CardInstance) + Send>;

/// Commands that can be sent to a card thread.
pub enum TerminalCommand {
    /// Send a command APDU, reply with the response APDU.
    Transmit(Vec<u8>, Sender<Vec<u8>>),
    /// Power-cycle the card, reply with the ATR.
    Reset(Sender<Vec<u8>>),
    /// Run arbitrary code against the card between exchanges.
    Execute(CardJob),
    /// Stop the card thread.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminalError {
    #[error("card thread has stopped")]
    Disconnected,

    #[error("card did not answer within {0:?}")]
    Timeout(Duration),
}

/// Handle to a card running on its own thread.
pub struct CardTerminal {
    name: String,
    command_tx: Sender<TerminalCommand>,
    thread_handle: Option<JoinHandle<CardInstance>>,
}

impl CardTerminal {
    /// Move `card` onto a new thread.
    pub fn spawn(name: impl Into<String>, card: CardInstance) -> std::io::Result<Self> {
        let name = name.into();
        let (command_tx, command_rx) = unbounded();
        let thread_handle = thread::Builder::new()
            .name(format!("card-{}", name))
            .spawn(move || run_card(card, command_rx))?;
        info!(terminal = %name, "card inserted");
        Ok(CardTerminal {
            name,
            command_tx,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exchange one APDU.
    pub fn transmit(&self, command: &[u8]) -> Result<Vec<u8>, TerminalError> {
        let (resp_tx, resp_rx) = bounded(1);
        self.send(TerminalCommand::Transmit(command.to_vec(), resp_tx))?;
        wait(&resp_rx)
    }

    /// Reset the card and return its ATR.
    pub fn reset(&self) -> Result<Vec<u8>, TerminalError> {
        let (resp_tx, resp_rx) = bounded(1);
        self.send(TerminalCommand::Reset(resp_tx))?;
        wait(&resp_rx)
    }

    /// Run `f` on the card thread and return its result.
    pub fn with_card<R, F>(&self, f: F) -> Result<R, TerminalError>
    where
        R: Send + 'static,
        F: FnOnce(&mut CardInstance) -> R + Send + 'static,
    {
        let (resp_tx, resp_rx) = bounded(1);
        self.send(TerminalCommand::Execute(Box::new(move |card| {
            let _ = resp_tx.send(f(card));
        })))?;
        wait(&resp_rx)
    }

    /// Stop the thread and take the card back.
    pub fn eject(mut self) -> Option<CardInstance> {
        self.shutdown()
    }

    fn send(&self, command: TerminalCommand) -> Result<(), TerminalError> {
        self.command_tx
            .send(command)
            .map_err(|_| TerminalError::Disconnected)
    }

    fn shutdown(&mut self) -> Option<CardInstance> {
        let _ = self.command_tx.send(TerminalCommand::Stop);
        let card = self.thread_handle.take()?.join().ok();
        info!(terminal = %self.name, "card removed");
        card
    }
}

impl Drop for CardTerminal {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wait<T>(rx: &Receiver<T>) -> Result<T, TerminalError> {
    rx.recv_timeout(REPLY_TIMEOUT).map_err(|e| {
        if e.is_timeout() {
            TerminalError::Timeout(REPLY_TIMEOUT)
        } else {
            TerminalError::Disconnected
        }
    })
}

/// The card thread: one command at a time until told to stop.
fn run_card(mut card: CardInstance, command_rx: Receiver<TerminalCommand>) -> CardInstance {
    while let Ok(command) = command_rx.recv() {
        match command {
            TerminalCommand::Transmit(apdu, resp_tx) => {
                let response = card.dispatch_apdu(&apdu);
                let _ = resp_tx.send(response);
            }
            TerminalCommand::Reset(resp_tx) => {
                let _ = resp_tx.send(card.reset());
            }
            TerminalCommand::Execute(job) => job(&mut card),
            TerminalCommand::Stop => break,
        }
    }
    debug!("card thread exiting");
    card
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::aid::Aid;
    use crate::applets::{self, PURSE_AID};
    use crate::config::CardConfig;

    fn purse_card() -> CardInstance {
        let mut card = CardInstance::new(CardConfig::default()).unwrap();
        let aid: Aid = PURSE_AID.parse().unwrap();
        card.install_from_catalog(&applets::catalog(), "purse", &aid, &[])
            .unwrap();
        card
    }

    fn select_purse() -> Vec<u8> {
        let mut apdu = vec![0x00, 0xA4, 0x04, 0x00, 0x05];
        apdu.extend(hex::decode(PURSE_AID).unwrap());
        apdu
    }

    #[test]
    fn test_transmit_and_reset() {
        let terminal = CardTerminal::spawn("t0", purse_card()).unwrap();
        assert_eq!(terminal.transmit(&select_purse()).unwrap(), vec![0x90, 0x00]);
        assert_eq!(
            terminal.transmit(&[0x00, 0x30, 0x00, 0x00, 0x02, 0x00, 0x0A]).unwrap(),
            vec![0x90, 0x00]
        );
        let atr = terminal.reset().unwrap();
        assert_eq!(atr, CardConfig::default().atr_bytes().unwrap());
        // Reset dropped the selection.
        assert_eq!(terminal.transmit(&[0x00, 0x50, 0x00, 0x00]).unwrap(), vec![0x69, 0x86]);
    }

    #[test]
    fn test_cards_are_isolated() {
        let a = CardTerminal::spawn("a", purse_card()).unwrap();
        let b = CardTerminal::spawn("b", purse_card()).unwrap();
        for t in [&a, &b] {
            t.transmit(&select_purse()).unwrap();
        }
        a.transmit(&[0x00, 0x30, 0x00, 0x00, 0x02, 0x00, 0x64]).unwrap();

        assert_eq!(a.transmit(&[0x00, 0x50, 0x00, 0x00]).unwrap(), vec![0x00, 0x64, 0x90, 0x00]);
        assert_eq!(b.transmit(&[0x00, 0x50, 0x00, 0x00]).unwrap(), vec![0x00, 0x00, 0x90, 0x00]);
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let terminal = Arc::new(CardTerminal::spawn("shared", purse_card()).unwrap());
        terminal.transmit(&select_purse()).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let terminal = Arc::clone(&terminal);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let response = terminal
                            .transmit(&[0x00, 0x30, 0x00, 0x00, 0x02, 0x00, 0x01])
                            .unwrap();
                        assert_eq!(response, vec![0x90, 0x00]);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(
            terminal.transmit(&[0x00, 0x50, 0x00, 0x00]).unwrap(),
            vec![0x00, 100, 0x90, 0x00]
        );
        assert_eq!(
            terminal.transmit(&[0x00, 0x60, 0x00, 0x00]).unwrap(),
            vec![0x00, 100, 0x90, 0x00]
        );
    }

    #[test]
    fn test_with_card_and_eject() {
        let terminal = CardTerminal::spawn("inspect", purse_card()).unwrap();
        let depth = terminal.with_card(|card| card.transaction_depth()).unwrap();
        assert_eq!(depth, 0);
        let card = terminal.eject().unwrap();
        assert_eq!(card.applets().len(), 1);
    }
}
