//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Error taxonomy for the licensing crate."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::fingerprint::HardwareId;

/// Reasons an activation key is refused.
///
/// Messages name the failed check but never include signatures or the secret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Wrong prefix, field count, or an unparseable field.
    #[error("invalid license key format: {0}")]
    Format(String),
    /// The key's expiration date has passed.
    #[error("license key expired on {expired_on}")]
    Expired {
        /// Calendar date encoded in the key.
        expired_on: NaiveDate,
    },
    /// The key was issued for another machine.
    #[error("license key belongs to a different computer (this computer: {expected}, key: {got})")]
    WrongMachine {
        /// Fingerprint of the current machine.
        expected: HardwareId,
        /// Hardware id embedded in the key.
        got: HardwareId,
    },
    /// The signature segment does not match the key contents.
    #[error("license key signature is invalid")]
    BadSignature,
}

impl KeyError {
    /// Short label used for telemetry.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            KeyError::Format(_) => "format",
            KeyError::Expired { .. } => "expired",
            KeyError::WrongMachine { .. } => "wrong_machine",
            KeyError::BadSignature => "bad_signature",
        }
    }
}

/// Failures reading or writing the license store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("license store io error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The store document could not be parsed.
    #[error("license store {path} is unreadable: {reason}")]
    Corrupt {
        /// Store file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
    /// The store document could not be serialised.
    #[error("license store serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure touching a single trial witness location.
#[derive(Debug, Error)]
#[error("trial witness {location} unavailable: {source}")]
pub struct WitnessError {
    /// Human readable location of the witness.
    pub location: String,
    /// Underlying error.
    #[source]
    pub source: std::io::Error,
}

/// Transient failures talking to the remote authority.
///
/// The evaluator treats every variant as "no remote opinion".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The request exceeded its deadline.
    #[error("remote authority timed out")]
    Timeout,
    /// DNS or connection failure.
    #[error("remote authority unreachable: {0}")]
    Connect(String),
    /// Non-2xx response.
    #[error("remote authority answered with HTTP {0}")]
    Status(u16),
    /// Response body was not a valid entitlement document.
    #[error("remote authority returned a malformed document: {0}")]
    Body(String),
    /// Client construction or other transport failure.
    #[error("remote authority request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout
        } else if err.is_connect() {
            NetworkError::Connect(err.to_string())
        } else if err.is_decode() {
            NetworkError::Body(err.to_string())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

/// Activation failures. The previous record is left untouched in every case.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The key was refused.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The key was valid but the new record could not be stored.
    #[error("activation could not be saved: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_machine_names_both_ids() {
        let err = KeyError::WrongMachine {
            expected: "AAAAAAAA".parse().unwrap(),
            got: "BBBBBBBB".parse().unwrap(),
        };
        let message = err.to_string();
        assert!(message.contains("AAAAAAAA"));
        assert!(message.contains("BBBBBBBB"));
        assert_eq!(err.reason(), "wrong_machine");
    }

    #[test]
    fn activation_error_is_transparent_for_keys() {
        let err = ActivationError::from(KeyError::BadSignature);
        assert_eq!(err.to_string(), "license key signature is invalid");
    }
}
