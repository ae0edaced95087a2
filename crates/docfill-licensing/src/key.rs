//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Offline activation key encoding, decoding, and signing."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
//! Keys look like `DF-HHHHHHHH-YYYYMMDD-DDD-SSSSSSSSSSSSSSSS`. The signature is
//! the first sixteen uppercase hex digits of
//! `SHA-256(HHHHHHHH + YYYYMMDD + DDD + secret)`, computed over the fields
//! exactly as they appear in the key.
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::clock::end_of_day;
use crate::error::KeyError;
use crate::fingerprint::HardwareId;
use crate::settings::SharedSecret;

/// Literal prefix of every key.
pub const KEY_PREFIX: &str = "DF";
/// Largest day count that fits the three-digit field.
pub const MAX_KEY_DAYS: u32 = 999;

const SIGNATURE_LEN: usize = 16;
const DATE_FORMAT: &str = "%Y%m%d";

/// An encoded activation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Borrow the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields recovered from a key that passed every check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedKey {
    /// Machine the key was issued for.
    pub hardware_id: HardwareId,
    /// End of the last licensed day.
    pub expiration: NaiveDateTime,
    /// Day count the key was issued with.
    pub days: u32,
}

/// Independent outcome of each check, for display and support tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyAudit {
    /// Hardware id embedded in the key.
    pub hardware_id: HardwareId,
    /// Expiration encoded in the key.
    pub expiration: NaiveDateTime,
    /// Day count encoded in the key.
    pub days: u32,
    /// `now` is past the expiration.
    pub expired: bool,
    /// The key names the inspecting machine.
    pub hardware_matches: bool,
    /// The signature matches the other fields.
    pub signature_valid: bool,
}

impl KeyAudit {
    /// True when the key would activate on the inspecting machine.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.expired && self.hardware_matches && self.signature_valid
    }
}

struct KeyParts<'a> {
    hardware_raw: &'a str,
    date_raw: &'a str,
    days_raw: &'a str,
    signature: &'a str,
    hardware_id: HardwareId,
    expiration: NaiveDateTime,
    days: u32,
}

/// Encodes and validates activation keys.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    secret: SharedSecret,
}

impl KeyCodec {
    /// Codec signing with `secret`.
    #[must_use]
    pub fn new(secret: SharedSecret) -> Self {
        Self { secret }
    }

    /// Issue a key for `hardware_id` valid for `days` full days after `today`.
    pub fn encode(
        &self,
        hardware_id: &HardwareId,
        days: u32,
        today: NaiveDate,
    ) -> Result<LicenseKey, KeyError> {
        if !(1..=MAX_KEY_DAYS).contains(&days) {
            return Err(KeyError::Format(format!(
                "day count must be between 1 and {MAX_KEY_DAYS}"
            )));
        }
        let expiration = today + Duration::days(i64::from(days));
        let date = expiration.format(DATE_FORMAT).to_string();
        let days = format!("{days:03}");
        let signature = self.sign(hardware_id.as_str(), &date, &days);
        Ok(LicenseKey(format!(
            "{KEY_PREFIX}-{hardware_id}-{date}-{days}-{signature}"
        )))
    }

    /// Validate `key` for `machine` at `now`.
    ///
    /// Checks run in a fixed order: structure, field syntax, expiry, hardware,
    /// signature. The first failure is returned.
    pub fn decode(
        &self,
        key: &str,
        machine: &HardwareId,
        now: NaiveDateTime,
    ) -> Result<DecodedKey, KeyError> {
        let parts = parse(key)?;
        if now > parts.expiration {
            return Err(KeyError::Expired {
                expired_on: parts.expiration.date(),
            });
        }
        if &parts.hardware_id != machine {
            return Err(KeyError::WrongMachine {
                expected: machine.clone(),
                got: parts.hardware_id,
            });
        }
        if !self.signature_matches(&parts) {
            return Err(KeyError::BadSignature);
        }
        Ok(DecodedKey {
            hardware_id: parts.hardware_id,
            expiration: parts.expiration,
            days: parts.days,
        })
    }

    /// Run every check and report each result; only structural problems fail.
    pub fn audit(
        &self,
        key: &str,
        machine: &HardwareId,
        now: NaiveDateTime,
    ) -> Result<KeyAudit, KeyError> {
        let parts = parse(key)?;
        Ok(KeyAudit {
            expired: now > parts.expiration,
            hardware_matches: &parts.hardware_id == machine,
            signature_valid: self.signature_matches(&parts),
            hardware_id: parts.hardware_id,
            expiration: parts.expiration,
            days: parts.days,
        })
    }

    fn signature_matches(&self, parts: &KeyParts<'_>) -> bool {
        let expected = self.sign(parts.hardware_raw, parts.date_raw, parts.days_raw);
        expected.as_bytes().ct_eq(parts.signature.as_bytes()).into()
    }

    fn sign(&self, hardware: &str, date: &str, days: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(hardware.as_bytes());
        hasher.update(date.as_bytes());
        hasher.update(days.as_bytes());
        hasher.update(self.secret.expose().as_bytes());
        let mut signature = hex::encode_upper(hasher.finalize());
        signature.truncate(SIGNATURE_LEN);
        signature
    }
}

fn parse(key: &str) -> Result<KeyParts<'_>, KeyError> {
    let fields: Vec<&str> = key.trim().split('-').collect();
    let &[prefix, hardware_raw, date_raw, days_raw, signature] = fields.as_slice() else {
        return Err(KeyError::Format(format!(
            "expected 5 fields separated by '-', found {}",
            fields.len()
        )));
    };
    if prefix != KEY_PREFIX {
        return Err(KeyError::Format(format!("key must start with {KEY_PREFIX}-")));
    }
    let hardware_id: HardwareId = hardware_raw.parse()?;
    if date_raw.len() != 8 || !date_raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyError::Format("expiration date must be YYYYMMDD".to_owned()));
    }
    let date = NaiveDate::parse_from_str(date_raw, DATE_FORMAT)
        .map_err(|_| KeyError::Format("expiration date is not a calendar date".to_owned()))?;
    if days_raw.len() != 3 || !days_raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyError::Format("day count must be three digits".to_owned()));
    }
    let days = days_raw
        .parse::<u32>()
        .map_err(|_| KeyError::Format("day count is out of range".to_owned()))?;
    if signature.len() != SIGNATURE_LEN || !signature.bytes().all(is_upper_hex) {
        return Err(KeyError::Format(format!(
            "signature must be {SIGNATURE_LEN} uppercase hex digits"
        )));
    }
    Ok(KeyParts {
        hardware_raw,
        date_raw,
        days_raw,
        signature,
        hardware_id,
        expiration: end_of_day(date),
        days,
    })
}

fn is_upper_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> KeyCodec {
        KeyCodec::new(SharedSecret::default())
    }

    fn hw(raw: &str) -> HardwareId {
        raw.parse().unwrap()
    }

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn encoded_key_follows_the_grammar() {
        let key = codec().encode(&hw("AAAAAAAA"), 30, date("2025-01-01")).unwrap();
        let fields: Vec<&str> = key.as_str().split('-').collect();
        assert_eq!(fields[0], "DF");
        assert_eq!(fields[1], "AAAAAAAA");
        assert_eq!(fields[2], "20250131");
        assert_eq!(fields[3], "030");
        assert_eq!(fields[4].len(), 16);
        assert!(fields[4].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn signature_matches_existing_tooling() {
        let mut hasher = Sha256::new();
        hasher.update(b"AAAAAAAA20250131030document_filler_secret_2024");
        let expected = hex::encode_upper(hasher.finalize())[..16].to_owned();
        let key = codec().encode(&hw("AAAAAAAA"), 30, date("2025-01-01")).unwrap();
        assert!(key.as_str().ends_with(&expected));
    }

    #[test]
    fn decode_accepts_until_end_of_expiration_day() {
        let key = codec().encode(&hw("AAAAAAAA"), 30, date("2025-01-01")).unwrap();
        let decoded = codec()
            .decode(key.as_str(), &hw("AAAAAAAA"), at("2025-01-31 23:59:59"))
            .unwrap();
        assert_eq!(decoded.days, 30);
        assert_eq!(decoded.expiration, at("2025-01-31 23:59:59"));
        assert_eq!(
            codec().decode(key.as_str(), &hw("AAAAAAAA"), at("2025-02-01 00:00:00")),
            Err(KeyError::Expired {
                expired_on: date("2025-01-31")
            })
        );
    }

    #[test]
    fn expiry_is_reported_before_machine_and_signature() {
        let key = "DF-BBBBBBBB-20200101-030-0000000000000000";
        let err = codec().decode(key, &hw("AAAAAAAA"), at("2025-01-01 00:00:00"));
        assert!(matches!(err, Err(KeyError::Expired { .. })));
    }

    #[test]
    fn malformed_keys_are_format_errors() {
        let now = at("2025-01-01 00:00:00");
        for key in [
            "",
            "XX-AAAAAAAA-20250131-030-0123456789ABCDEF",
            "DF-AAAAAAAA-20250131-030",
            "DF-AAAAAAAA-20250131-030-0123-456789ABCDEF",
            "DF-AAAAAAAA-2025013X-030-0123456789ABCDEF",
            "DF-AAAAAAAA-20251341-030-0123456789ABCDEF",
            "DF-AAAAAAAA-20250131-0x0-0123456789ABCDEF",
            "DF-aaaaaaaa-20250131-030-0123456789ABCDEF",
        ] {
            assert!(
                matches!(codec().decode(key, &hw("AAAAAAAA"), now), Err(KeyError::Format(_))),
                "{key}"
            );
        }
    }

    #[test]
    fn day_field_must_be_exactly_three_digits() {
        let codec = codec();
        let now = at("2025-01-01 00:00:00");
        for days in ["30", "0030"] {
            let signature = codec.sign("AAAAAAAA", "20990101", days);
            let key = format!("DF-AAAAAAAA-20990101-{days}-{signature}");
            assert!(
                matches!(codec.decode(&key, &hw("AAAAAAAA"), now), Err(KeyError::Format(_))),
                "{key}"
            );
        }
    }

    #[test]
    fn signature_must_be_sixteen_uppercase_hex_digits() {
        let codec = codec();
        let now = at("2025-01-01 00:00:00");
        let key = codec.encode(&hw("AAAAAAAA"), 30, date("2025-01-01")).unwrap();
        let (body, signature) = key.as_str().rsplit_once('-').unwrap();
        let short = format!("{body}-{}", &signature[..15]);
        let lower = format!("{body}-{}", signature.to_ascii_lowercase());
        let non_hex = format!("{body}-{}G", &signature[..15]);
        for forged in [short, lower, non_hex] {
            assert!(
                matches!(codec.decode(&forged, &hw("AAAAAAAA"), now), Err(KeyError::Format(_))),
                "{forged}"
            );
        }
    }

    #[test]
    fn day_count_bounds_are_enforced() {
        assert!(codec().encode(&hw("AAAAAAAA"), 0, date("2025-01-01")).is_err());
        assert!(codec().encode(&hw("AAAAAAAA"), 1000, date("2025-01-01")).is_err());
        assert!(codec().encode(&hw("AAAAAAAA"), 999, date("2025-01-01")).is_ok());
    }

    #[test]
    fn audit_reports_each_check() {
        let key = codec().encode(&hw("AAAAAAAA"), 30, date("2025-01-01")).unwrap();
        let mut tampered = key.as_str().to_owned();
        let last = if tampered.ends_with('0') { "1" } else { "0" };
        tampered.replace_range(tampered.len() - 1.., last);
        let audit = codec()
            .audit(&tampered, &hw("BBBBBBBB"), at("2025-01-02 00:00:00"))
            .unwrap();
        assert!(!audit.expired);
        assert!(!audit.hardware_matches);
        assert!(!audit.signature_valid);
        assert!(!audit.is_valid());
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let key = codec().encode(&hw("AAAAAAAA"), 5, date("2025-01-01")).unwrap();
        let padded = format!("  {key}\n");
        assert!(codec()
            .decode(&padded, &hw("AAAAAAAA"), at("2025-01-02 00:00:00"))
            .is_ok());
    }
}
