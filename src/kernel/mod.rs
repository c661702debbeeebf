//! Kernel module: the card runtime that hosts applets.
//!
//! The kernel sits on top of the memory and transaction layers and provides:
//! - Applet install, registration and uninstall
//! - Selection across logical channels
//! - APDU dispatch with panic containment
//! - The applet-facing `Runtime` API

pub mod applet;
pub mod card;
pub mod channels;
pub mod registry;
pub mod runtime;

pub use applet::{Applet, AppletCatalog, AppletFactory, InstallParams};
pub use card::CardInstance;
pub use channels::ChannelTable;
pub use registry::{AppletRegistry, Registration, RegistryError};
pub use runtime::Runtime;
