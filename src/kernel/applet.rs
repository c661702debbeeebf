//! The contract between the runtime and applet code.

use std::collections::BTreeMap;
use std::fmt;

use crate::aid::Aid;
use crate::apdu::Apdu;
use crate::error::CardError;

use super::registry::RegistryError;
use super::runtime::Runtime;

// =============================================================================
// APPLET
// =============================================================================

/// An installed applet.
///
/// All state an applet wants to keep across exchanges (balances, counters,
/// keys) must live in arrays obtained from the [`Runtime`]; fields on the
/// implementing struct are the equivalent of object references and should
/// hold [`ArrayRef`](crate::memory::ArrayRef) handles, not data. Only array
/// contents take part in transactions and lifetime resets.
pub trait Applet: Send {
    /// Handle one command.
    ///
    /// Output goes through `apdu`. Returning `Err` discards any output and
    /// sends the error's status word instead. A transaction left open when
    /// this returns is aborted.
    fn process(&mut self, rt: &mut Runtime<'_>, apdu: &mut Apdu) -> Result<(), CardError>;

    /// Called when the applet becomes selected on a channel.
    ///
    /// Returning `false` refuses the selection.
    fn select(&mut self, _rt: &mut Runtime<'_>) -> bool {
        true
    }

    /// Called when the applet stops being selected on a channel.
    fn deselect(&mut self, _rt: &mut Runtime<'_>) {}

    /// Whether the applet may be selected on several channels at once.
    fn multi_selectable(&self) -> bool {
        false
    }

    /// Called once before the applet's context is torn down.
    fn uninstall(&mut self, _rt: &mut Runtime<'_>) {}
}

impl fmt::Debug for dyn Applet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Applet")
            .field("multi_selectable", &self.multi_selectable())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// INSTALL PARAMETERS
// =============================================================================

/// The install byte array handed to an applet factory.
///
/// Wire layout: `[len][instance AID][len][control info][len][applet data]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallParams {
    pub instance_aid: Aid,
    pub control_info: Vec<u8>,
    pub applet_data: Vec<u8>,
}

impl InstallParams {
    /// Parameters for `instance_aid` with no control info.
    pub fn new(instance_aid: Aid, applet_data: &[u8]) -> Result<Self, RegistryError> {
        if applet_data.len() > u8::MAX as usize {
            return Err(RegistryError::InstallDataTooLong(applet_data.len()));
        }
        Ok(InstallParams {
            instance_aid,
            control_info: Vec::new(),
            applet_data: applet_data.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            3 + self.instance_aid.len() + self.control_info.len() + self.applet_data.len(),
        );
        for field in [
            self.instance_aid.as_bytes(),
            &self.control_info[..],
            &self.applet_data[..],
        ] {
            out.push(field.len() as u8);
            out.extend_from_slice(field);
        }
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, RegistryError> {
        let mut rest = bytes;
        let aid = take_field(&mut rest)?;
        let control_info = take_field(&mut rest)?.to_vec();
        let applet_data = take_field(&mut rest)?.to_vec();
        let instance_aid = Aid::new(aid).map_err(|_| RegistryError::MalformedInstallParams)?;
        Ok(InstallParams {
            instance_aid,
            control_info,
            applet_data,
        })
    }
}

/// Split one length-prefixed field off the front of `rest`.
fn take_field<'a>(rest: &mut &'a [u8]) -> Result<&'a [u8], RegistryError> {
    let (&len, tail) = rest
        .split_first()
        .ok_or(RegistryError::MalformedInstallParams)?;
    let len = len as usize;
    if tail.len() < len {
        return Err(RegistryError::MalformedInstallParams);
    }
    let (field, tail) = tail.split_at(len);
    *rest = tail;
    Ok(field)
}

// =============================================================================
// CATALOG
// =============================================================================

/// Builds an applet inside its fresh context.
///
/// The factory must call [`Runtime::register`] or [`Runtime::register_aid`]
/// before returning, or the install is rolled back.
pub type AppletFactory =
    fn(&mut Runtime<'_>, &InstallParams) -> Result<Box<dyn Applet>, CardError>;

/// Named applet factories, so configuration can install applets by class.
#[derive(Clone, Default)]
pub struct AppletCatalog {
    factories: BTreeMap<String, AppletFactory>,
}

impl AppletCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: impl Into<String>, factory: AppletFactory) -> &mut Self {
        self.factories.insert(class.into(), factory);
        self
    }

    pub fn get(&self, class: &str) -> Option<AppletFactory> {
        self.factories.get(class).copied()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for AppletCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::StatusWord;

    #[test]
    fn test_install_params_wire_layout() {
        let params = InstallParams {
            instance_aid: "F000000001".parse().unwrap(),
            control_info: vec![0xC9],
            applet_data: vec![1, 2, 3],
        };
        let bytes = params.to_bytes();
        assert_eq!(
            bytes,
            vec![5, 0xF0, 0, 0, 0, 1, 1, 0xC9, 3, 1, 2, 3]
        );
        assert_eq!(InstallParams::parse(&bytes).unwrap(), params);
    }

    #[test]
    fn test_install_params_rejects_truncation() {
        for bytes in [&[][..], &[5, 0xF0, 0, 0][..], &[5, 0xF0, 0, 0, 0, 1, 0][..], &[3, 1, 2, 3, 0, 0][..]] {
            assert_eq!(
                InstallParams::parse(bytes),
                Err(RegistryError::MalformedInstallParams),
                "accepted {:02X?}",
                bytes
            );
        }
    }

    #[test]
    fn test_catalog_lists_classes_in_order() {
        fn refuse(_rt: &mut Runtime<'_>, _params: &InstallParams) -> Result<Box<dyn Applet>, CardError> {
            CardError::status(StatusWord::CONDITIONS_NOT_SATISFIED)
        }
        let mut catalog = AppletCatalog::new();
        catalog.register("wallet", refuse).register("counter", refuse);
        assert_eq!(catalog.classes().collect::<Vec<_>>(), vec!["counter", "wallet"]);
        assert!(catalog.get("counter").is_some());
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_install_data_limit() {
        let aid: Aid = "F000000001".parse().unwrap();
        assert!(InstallParams::new(aid.clone(), &[0; 255]).is_ok());
        assert_eq!(
            InstallParams::new(aid, &[0; 256]),
            Err(RegistryError::InstallDataTooLong(256))
        );
    }
}
