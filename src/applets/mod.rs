//! Sample applets used by the CLI demo and the end-to-end tests.

pub mod hello;
pub mod purse;

pub use hello::HelloWorld;
pub use purse::Purse;

use crate::apdu::Apdu;
use crate::error::CardError;
use crate::kernel::AppletCatalog;

/// Default instance AID of the hello-world applet.
pub const HELLO_AID: &str = "F000000001";

/// Default instance AID of the purse applet.
pub const PURSE_AID: &str = "F000000002";

/// Catalog holding every sample applet class.
pub fn catalog() -> AppletCatalog {
    let mut catalog = AppletCatalog::new();
    catalog
        .register("hello", HelloWorld::install)
        .register("purse", Purse::install);
    catalog
}

/// Pull all command data through the buffer, however many chunks it takes.
pub(crate) fn receive_all(apdu: &mut Apdu) -> Result<Vec<u8>, CardError> {
    let offset = apdu.offset_cdata();
    let mut chunk = apdu.set_incoming_and_receive()?;
    let mut data = Vec::with_capacity(apdu.incoming_length());
    loop {
        data.extend_from_slice(&apdu.buffer()[offset..offset + chunk]);
        if data.len() >= apdu.incoming_length() {
            return Ok(data);
        }
        chunk = apdu.receive_bytes(offset)?;
    }
}

/// Send `data` as the whole response.
pub(crate) fn respond(apdu: &mut Apdu, data: &[u8]) -> Result<(), CardError> {
    apdu.set_outgoing()?;
    apdu.set_outgoing_length(data.len())?;
    if !data.is_empty() {
        apdu.send_bytes_long(data, 0, data.len())?;
    }
    Ok(())
}
