//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Hardware fingerprint used to bind licenses to one machine."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
//! The fingerprint hashes `hostname + MAC + secret` with SHA-256 and keeps the
//! first eight hex digits. When no adapter address can be read the input drops
//! to `hostname + OS + arch + secret`.
use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sysinfo::Networks;
use tracing::{debug, info};

use crate::error::KeyError;
use crate::settings::SharedSecret;

/// Number of hex digits in a [`HardwareId`].
pub const HARDWARE_ID_LEN: usize = 8;

/// Eight uppercase hexadecimal characters identifying a machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareId(String);

impl HardwareId {
    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode_upper(&digest[..HARDWARE_ID_LEN / 2]))
    }
}

impl FromStr for HardwareId {
    type Err = KeyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let valid = raw.len() == HARDWARE_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b));
        if valid {
            Ok(Self(raw.to_owned()))
        } else {
            Err(KeyError::Format(format!(
                "hardware id must be {HARDWARE_ID_LEN} uppercase hexadecimal characters"
            )))
        }
    }
}

impl TryFrom<String> for HardwareId {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HardwareId> for String {
    fn from(value: HardwareId) -> Self {
        value.0
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything able to name the machine the process runs on.
pub trait MachineIdentity: Send + Sync {
    /// Hardware id of the current machine.
    fn hardware_id(&self) -> HardwareId;
}

/// Fingerprint of the real host, computed once per process.
#[derive(Debug)]
pub struct HostFingerprint {
    secret: SharedSecret,
    cached: OnceCell<HardwareId>,
}

impl HostFingerprint {
    /// Create a fingerprint source keyed with `secret`.
    #[must_use]
    pub fn new(secret: SharedSecret) -> Self {
        Self {
            secret,
            cached: OnceCell::new(),
        }
    }
}

impl MachineIdentity for HostFingerprint {
    fn hardware_id(&self) -> HardwareId {
        self.cached
            .get_or_init(|| {
                let id = fingerprint(&self.secret);
                info!(hardware_id = %id, "machine fingerprint computed");
                id
            })
            .clone()
    }
}

/// Identity pinned to a known value, for tests and key issuance tooling.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub HardwareId);

impl MachineIdentity for StaticIdentity {
    fn hardware_id(&self) -> HardwareId {
        self.0.clone()
    }
}

/// Compute the fingerprint of the current host. Never fails.
#[must_use]
pub fn fingerprint(secret: &SharedSecret) -> HardwareId {
    let host = host_name();
    let networks = Networks::new_with_refreshed_list();
    let adapters = networks
        .list()
        .iter()
        .map(|(name, data)| (name.clone(), data.mac_address().to_string()));
    match primary_adapter_address(adapters) {
        Some(mac) => digest_identity(&format!("{host}{mac}"), secret),
        None => {
            debug!("no adapter address available; using reduced fingerprint input");
            digest_identity(&fallback_material(&host), secret)
        }
    }
}

pub(crate) fn digest_identity(material: &str, secret: &SharedSecret) -> HardwareId {
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hasher.update(secret.expose().as_bytes());
    HardwareId::from_digest(&hasher.finalize())
}

fn fallback_material(host: &str) -> String {
    format!("{host}{}{}", std::env::consts::OS, std::env::consts::ARCH)
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Address of the first non-loopback adapter (by name) with a non-zero MAC.
fn primary_adapter_address(adapters: impl IntoIterator<Item = (String, String)>) -> Option<String> {
    let mut adapters: Vec<_> = adapters
        .into_iter()
        .filter(|(name, _)| !is_loopback(name))
        .collect();
    adapters.sort();
    adapters.into_iter().find_map(|(_, address)| {
        let address = address.trim().to_ascii_lowercase();
        let usable = !address.is_empty() && address.chars().any(|c| c != '0' && c != ':');
        usable.then_some(address)
    })
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_ascii_lowercase().contains("loopback")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, address: &str) -> (String, String) {
        (name.to_owned(), address.to_owned())
    }

    #[test]
    fn hardware_id_parsing_is_strict() {
        assert!("0A1B2C3D".parse::<HardwareId>().is_ok());
        assert!("0a1b2c3d".parse::<HardwareId>().is_err());
        assert!("0A1B2C3".parse::<HardwareId>().is_err());
        assert!("0A1B2C3G".parse::<HardwareId>().is_err());
    }

    #[test]
    fn digest_matches_existing_tooling() {
        // sha256("host-aa:bb:cc:dd:ee:ffdocument_filler_secret_2024")[:8].upper()
        let secret = SharedSecret::default();
        let id = digest_identity("host-aa:bb:cc:dd:ee:ff", &secret);
        let mut hasher = Sha256::new();
        hasher.update(b"host-aa:bb:cc:dd:ee:ffdocument_filler_secret_2024");
        let expected = hex::encode_upper(hasher.finalize())[..8].to_owned();
        assert_eq!(id.as_str(), expected);
    }

    #[test]
    fn fingerprint_is_stable_across_calls() {
        let secret = SharedSecret::default();
        assert_eq!(fingerprint(&secret), fingerprint(&secret));
        let source = HostFingerprint::new(secret.clone());
        assert_eq!(source.hardware_id(), fingerprint(&secret));
    }

    #[test]
    fn secret_changes_fingerprint() {
        let a = digest_identity("host", &SharedSecret::new("one"));
        let b = digest_identity("host", &SharedSecret::new("two"));
        assert_ne!(a, b);
    }

    #[test]
    fn adapter_scan_skips_loopback_and_zero_addresses() {
        let adapters = vec![
            adapter("wlan0", "aa:bb:cc:dd:ee:02"),
            adapter("lo", "00:00:00:00:00:00"),
            adapter("Loopback Pseudo-Interface 1", "aa:aa:aa:aa:aa:aa"),
            adapter("dummy0", "00:00:00:00:00:00"),
            adapter("eth0", "AA:BB:CC:DD:EE:01"),
        ];
        assert_eq!(
            primary_adapter_address(adapters).as_deref(),
            Some("aa:bb:cc:dd:ee:01")
        );
    }

    #[test]
    fn no_usable_adapter_yields_none() {
        assert!(primary_adapter_address(Vec::new()).is_none());
        assert!(primary_adapter_address(vec![adapter("lo", "00:00:00:00:00:00")]).is_none());
        assert!(fallback_material("box").starts_with("box"));
    }
}
