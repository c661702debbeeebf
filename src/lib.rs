//! jcre: a simulated Java Card runtime environment.
//!
//! A [`CardInstance`] hosts applets that talk to a terminal only through
//! command/response APDUs. The runtime provides:
//! - APDU dispatch across logical channels, with selection and response
//!   chaining
//! - All-or-nothing transactions over persistent memory, with tear
//!   injection to prove it
//! - Persistent, clear-on-reset and clear-on-deselect memory with
//!   per-applet ownership checks
//!
//! Each card instance owns all of its state. [`terminal::CardTerminal`]
//! runs one on a dedicated thread behind a command queue, and
//! [`tear::run_tear_campaign`] hammers one with simulated power loss.

pub mod aid;
pub mod apdu;
pub mod applets;
pub mod config;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod tear;
pub mod terminal;
pub mod transaction;

pub use aid::Aid;
pub use apdu::{Apdu, StatusWord};
pub use config::CardConfig;
pub use error::CardError;
pub use kernel::{Applet, AppletCatalog, CardInstance, InstallParams, Runtime};
pub use memory::{ArrayRef, Lifetime};
pub use terminal::CardTerminal;
