//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Keyed integrity tags over persisted license records."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::record::LicenseRecord;
use crate::settings::SharedSecret;

type HmacSha256 = Hmac<Sha256>;

const TAG_DOMAIN: &[u8] = b"docfill-license-record-v1";

/// Computes and checks record integrity tags.
#[derive(Debug, Clone)]
pub struct IntegrityKey {
    secret: SharedSecret,
}

impl IntegrityKey {
    /// Key the tags with `secret`.
    #[must_use]
    pub fn new(secret: SharedSecret) -> Self {
        Self { secret }
    }

    fn mac_for(&self, record: &LicenseRecord) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(self.secret.expose().as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac keys have no length limit"));
        mac.update(TAG_DOMAIN);
        for field in canonical_fields(record) {
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field.as_bytes());
        }
        mac
    }

    /// Hex-encoded tag over every field except `integrity_tag`.
    #[must_use]
    pub fn tag(&self, record: &LicenseRecord) -> String {
        hex::encode(self.mac_for(record).finalize().into_bytes())
    }

    /// Return `record` with a fresh tag.
    #[must_use]
    pub fn seal(&self, mut record: LicenseRecord) -> LicenseRecord {
        record.integrity_tag = self.tag(&record);
        record
    }

    /// Recompute the tag and compare it in constant time.
    #[must_use]
    pub fn verify(&self, record: &LicenseRecord) -> bool {
        let Ok(claimed) = hex::decode(&record.integrity_tag) else {
            return false;
        };
        self.mac_for(record).verify_slice(&claimed).is_ok()
    }
}

fn canonical_fields(record: &LicenseRecord) -> [String; 8] {
    let features: Vec<String> = record.features.iter().map(|f| f.to_string()).collect();
    [
        record.hardware_id.to_string(),
        record.license_key.clone(),
        record.activation_date.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        record
            .expiration_date
            .map(|exp| exp.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            .unwrap_or_default(),
        record.kind.to_string(),
        features.join(","),
        record.activated.to_string(),
        record.is_trial.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn record() -> LicenseRecord {
        let now = NaiveDateTime::parse_from_str("2025-01-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        LicenseRecord::trial("AAAAAAAA".parse().unwrap(), now, 7)
    }

    #[test]
    fn sealed_record_verifies() {
        let key = IntegrityKey::new(SharedSecret::default());
        assert!(key.verify(&key.seal(record())));
        assert!(!key.verify(&record()));
    }

    #[test]
    fn any_field_change_breaks_the_tag() {
        let key = IntegrityKey::new(SharedSecret::default());
        let sealed = key.seal(record());

        let mut extended = sealed.clone();
        extended.expiration_date = extended.expiration_date.map(|exp| exp + chrono::Duration::days(30));
        assert!(!key.verify(&extended));

        let mut promoted = sealed.clone();
        promoted.features = crate::FeatureSet::full();
        assert!(!key.verify(&promoted));

        let mut flipped = sealed;
        flipped.is_trial = false;
        assert!(!key.verify(&flipped));
    }

    #[test]
    fn tags_depend_on_the_secret() {
        let sealed = IntegrityKey::new(SharedSecret::new("a")).seal(record());
        assert!(!IntegrityKey::new(SharedSecret::new("b")).verify(&sealed));
    }
}
