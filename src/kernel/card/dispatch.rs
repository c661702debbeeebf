//! The command path: raw bytes in, raw bytes out.

use tracing::{debug, info, warn};

use crate::apdu::header::ins;
use crate::apdu::{Apdu, CommandApdu, StatusWord};
use crate::error::CardError;
use crate::memory::ContextId;

use super::super::runtime::Runtime;
use super::{contain, CardInstance};

/// P1 of SELECT by DF name (AID).
const SELECT_BY_NAME: u8 = 0x04;

/// MANAGE CHANNEL P1 values.
const MANAGE_OPEN: u8 = 0x00;
const MANAGE_CLOSE: u8 = 0x80;

impl CardInstance {
    /// Process one command APDU and return the response APDU.
    ///
    /// Never fails: every problem, whether a malformed command, an applet
    /// error or a panic inside applet code, comes back as a bare status
    /// word.
    pub fn dispatch_apdu(&mut self, raw: &[u8]) -> Vec<u8> {
        match self.dispatch(raw) {
            Ok(response) => response,
            Err(sw) => {
                debug!(%sw, "command failed");
                sw.to_bytes().to_vec()
            }
        }
    }

    /// # Semantics
    ///
    /// 1. Parse the header and length fields.
    /// 2. Resolve the logical channel from CLA; it must be open.
    /// 3. GET RESPONSE with chained output pending returns the next chunk.
    ///    Any other command drops whatever was pending.
    /// 4. MANAGE CHANNEL is handled by the runtime.
    /// 5. SELECT by AID for an installed applet selects it, then hands the
    ///    SELECT to its `process`. An unknown AID falls through to step 6.
    /// 6. Everything else goes to the applet selected on the channel.
    fn dispatch(&mut self, raw: &[u8]) -> Result<Vec<u8>, StatusWord> {
        // Step 1: parse
        let command = CommandApdu::parse(raw, self.config.extended_length)?;
        if command.cla() == 0xFF {
            return Err(StatusWord::CLA_NOT_SUPPORTED);
        }
        debug!(
            cla = command.cla(),
            ins = command.ins(),
            p1 = command.p1(),
            p2 = command.p2(),
            lc = command.lc(),
            "dispatching command"
        );

        // Step 2: channel
        let channel = command.channel();
        if !self.channels.is_open(channel) {
            return Err(StatusWord::LOGICAL_CHANNEL_NOT_SUPPORTED);
        }
        let iso = command.cla() & 0x80 == 0;

        // Step 3: response chaining
        let pending = self.channels.take_pending(channel);
        if iso && command.ins() == ins::GET_RESPONSE && !pending.is_empty() {
            return Ok(self.chain(channel, pending, command.ne()));
        }

        // Step 4: channel management
        if iso && command.ins() == ins::MANAGE_CHANNEL {
            return self.manage_channel(&command);
        }

        // Step 5: selection
        let selecting = iso && command.ins() == ins::SELECT && command.p1() == SELECT_BY_NAME;
        if selecting {
            let found = self
                .registry
                .resolve_select(command.data())
                .map(|r| r.context());
            if let Some(target) = found {
                self.select_on(channel, target)?;
                return self.process(channel, target, command, true);
            }
        }

        // Step 6: the selected applet
        let target = self.channels.selected(channel).ok_or(if selecting {
            StatusWord::FILE_NOT_FOUND
        } else {
            StatusWord::COMMAND_NOT_ALLOWED
        })?;
        self.process(channel, target, command, false)
    }

    /// Run `process` on `target` inside the panic boundary.
    fn process(
        &mut self,
        channel: u8,
        target: ContextId,
        command: CommandApdu,
        selecting: bool,
    ) -> Result<Vec<u8>, StatusWord> {
        let ne = command.ne();
        let mut apdu = Apdu::new(command, self.config.apdu_buffer_size, selecting);

        let result = match self.registry.by_context_mut(target) {
            Some(entry) => {
                let mut rt = Runtime::new(&mut self.core, target, channel, selecting);
                contain(|| entry.applet.process(&mut rt, &mut apdu))
            }
            None => return Err(StatusWord::COMMAND_NOT_ALLOWED),
        };

        // A transaction never outlives its exchange.
        if let Some(replayed) = self.core.abort_open_transaction() {
            match &result {
                Ok(()) => warn!(context = %target, replayed, "process returned with open transaction; rolled back"),
                Err(e) => info!(context = %target, replayed, error = %e, "transaction aborted"),
            }
        }

        match result {
            Ok(()) => match apdu.into_response() {
                Ok(output) => Ok(self.chain(channel, output, ne)),
                Err(e) => {
                    let error = CardError::from(e);
                    let sw = error.status_word();
                    warn!(context = %target, %sw, %error, "applet left response short");
                    Err(sw)
                }
            },
            Err(e) => {
                let sw = e.status_word();
                if e.is_tear() {
                    warn!(context = %target, %sw, "simulated tear");
                } else {
                    debug!(context = %target, %sw, error = %e, "applet error");
                }
                Err(sw)
            }
        }
    }

    /// Append the status word, parking anything beyond `ne` for GET RESPONSE.
    fn chain(&mut self, channel: u8, mut output: Vec<u8>, ne: usize) -> Vec<u8> {
        let sw = if output.len() > ne {
            let rest = output.split_off(ne);
            let sw = StatusWord::bytes_remaining(rest.len());
            self.channels.set_pending(channel, rest);
            sw
        } else {
            StatusWord::NO_ERROR
        };
        output.extend_from_slice(&sw.to_bytes());
        output
    }

    /// MANAGE CHANNEL: P1 `00` opens (P2 = channel, or 0 for any), P1 `80`
    /// closes (P2 = channel, or 0 for the one the command arrived on).
    fn manage_channel(&mut self, command: &CommandApdu) -> Result<Vec<u8>, StatusWord> {
        let origin = command.channel();
        match command.p1() {
            MANAGE_OPEN => {
                let requested = (command.p2() != 0).then_some(command.p2());
                let channel = self.open_channel_with(origin, requested)?;
                let mut response = Vec::with_capacity(3);
                if requested.is_none() {
                    response.push(channel);
                }
                response.extend_from_slice(&StatusWord::NO_ERROR.to_bytes());
                Ok(response)
            }
            MANAGE_CLOSE => {
                let channel = if command.p2() == 0 { origin } else { command.p2() };
                self.close_channel(channel)?;
                Ok(StatusWord::NO_ERROR.to_bytes().to_vec())
            }
            _ => Err(StatusWord::INCORRECT_P1P2),
        }
    }
}
