//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Optional remote entitlement lookup."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::end_of_day;
use crate::error::NetworkError;
use crate::features::FeatureSet;
use crate::fingerprint::HardwareId;
use crate::record::LicenseKind;

/// Deadline for a single lookup.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// One user entry published by the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntitlement {
    /// Machine the entry applies to.
    pub hardware_id: String,
    /// Entries without the flag grant nothing.
    #[serde(default)]
    pub active: bool,
    /// ISO-8601 date or date-time; absent or empty means unbounded.
    #[serde(default)]
    pub expires: Option<String>,
    /// `premium`, `standard`, `trial`, ...
    #[serde(default)]
    pub license_type: Option<String>,
    /// Licensee name.
    #[serde(default)]
    pub name: Option<String>,
    /// Licensee e-mail.
    #[serde(default)]
    pub email: Option<String>,
}

/// Parsed expiry of a remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteExpiry {
    /// No expiration.
    Unbounded,
    /// Local time the entitlement ends.
    At(NaiveDateTime),
    /// The field could not be read.
    Unreadable,
}

impl RemoteEntitlement {
    /// Whether the entry names `hardware_id`.
    #[must_use]
    pub fn matches(&self, hardware_id: &HardwareId) -> bool {
        self.hardware_id.trim().eq_ignore_ascii_case(hardware_id.as_str())
    }

    /// Interpret the `expires` field.
    #[must_use]
    pub fn expiry(&self) -> RemoteExpiry {
        let Some(raw) = self.expires.as_deref().map(str::trim).filter(|raw| !raw.is_empty())
        else {
            return RemoteExpiry::Unbounded;
        };
        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return RemoteExpiry::At(instant.with_timezone(&Local).naive_local());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return RemoteExpiry::At(naive);
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return RemoteExpiry::At(end_of_day(date));
        }
        RemoteExpiry::Unreadable
    }

    /// Active and not past its expiry at `now`.
    #[must_use]
    pub fn grants(&self, now: NaiveDateTime) -> bool {
        self.active
            && match self.expiry() {
                RemoteExpiry::Unbounded => true,
                RemoteExpiry::At(expires) => now <= expires,
                RemoteExpiry::Unreadable => {
                    warn!(hardware_id = %self.hardware_id, "remote entry has an unreadable expiry");
                    false
                }
            }
    }

    /// Features implied by `license_type`.
    #[must_use]
    pub fn features(&self) -> FeatureSet {
        match self.license_type.as_deref() {
            Some(kind) if kind.eq_ignore_ascii_case("premium") => {
                FeatureSet::for_kind(LicenseKind::Premium)
            }
            _ => FeatureSet::for_kind(LicenseKind::Standard),
        }
    }
}

/// Document served by the remote authority.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteDocument {
    /// Published entries.
    #[serde(default)]
    pub users: Vec<RemoteEntitlement>,
}

impl RemoteDocument {
    /// Entry for `hardware_id`, preferring an active one.
    #[must_use]
    pub fn find(&self, hardware_id: &HardwareId) -> Option<&RemoteEntitlement> {
        let mut matching = self.users.iter().filter(|user| user.matches(hardware_id));
        let first = matching.clone().next();
        matching.find(|user| user.active).or(first)
    }
}

/// Source of remote entitlements.
///
/// `Ok(None)` means the authority answered and knows nothing about this
/// machine. Errors mean it could not be asked.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Look up the entry for `hardware_id`.
    async fn lookup(
        &self,
        hardware_id: &HardwareId,
    ) -> Result<Option<RemoteEntitlement>, NetworkError>;
}

/// Remote authority reached with a single HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpRemoteAuthority {
    client: reqwest::Client,
    url: String,
}

impl HttpRemoteAuthority {
    /// Client for `url` with the given request deadline. No retries are made.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("docfill-licensing/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Lookup endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn lookup(
        &self,
        hardware_id: &HardwareId,
    ) -> Result<Option<RemoteEntitlement>, NetworkError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        let document: RemoteDocument =
            serde_json::from_slice(&body).map_err(|err| NetworkError::Body(err.to_string()))?;
        debug!(entries = document.users.len(), "remote entitlement document fetched");
        Ok(document.find(hardware_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn entry(json: serde_json::Value) -> RemoteEntitlement {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn missing_active_flag_grants_nothing() {
        let user = entry(serde_json::json!({ "hardware_id": "AAAAAAAA" }));
        assert!(!user.grants(at("2025-01-01 00:00:00")));
    }

    #[test]
    fn expiry_formats_are_accepted() {
        let now = at("2025-01-01 00:00:00");
        for expires in ["2025-06-30", "2025-06-30T12:00:00", "2025-06-30T12:00:00Z", ""] {
            let user = entry(serde_json::json!({
                "hardware_id": "AAAAAAAA",
                "active": true,
                "expires": expires,
            }));
            assert!(user.grants(now), "{expires}");
        }
        let lapsed = entry(serde_json::json!({
            "hardware_id": "AAAAAAAA",
            "active": true,
            "expires": "2024-12-31",
        }));
        assert!(!lapsed.grants(now));
        assert_eq!(lapsed.expiry(), RemoteExpiry::At(at("2024-12-31 23:59:59")));
    }

    #[test]
    fn document_prefers_active_matching_entry() {
        let document: RemoteDocument = serde_json::from_value(serde_json::json!({
            "users": [
                { "hardware_id": "BBBBBBBB", "active": true },
                { "hardware_id": "aaaaaaaa", "active": false },
                { "hardware_id": "AAAAAAAA", "active": true, "license_type": "premium" }
            ]
        }))
        .unwrap();
        let id: HardwareId = "AAAAAAAA".parse().unwrap();
        let found = document.find(&id).unwrap();
        assert!(found.active);
        assert!(found.features().contains(crate::Feature::Premium));
        assert!(document.find(&"CCCCCCCC".parse().unwrap()).is_none());
    }
}
