//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Build metadata and tolerant release version comparison."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::cmp::Ordering;

const UNKNOWN: &str = "unknown";

/// Identity of the running DocumentFiller build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    /// Package version, compared against release tags.
    pub version: String,
    /// Abbreviated commit the build came from.
    pub commit: String,
    /// Build timestamp.
    pub built_at: String,
    /// Target triple.
    pub target: String,
}

impl BuildInfo {
    /// Metadata of this build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            commit: option_env!("VERGEN_GIT_SHA").unwrap_or(UNKNOWN).to_owned(),
            built_at: option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or(UNKNOWN).to_owned(),
            target: option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or(UNKNOWN).to_owned(),
        }
    }

    /// One-line product banner.
    #[must_use]
    pub fn banner(&self) -> String {
        format!("DocumentFiller {} ({})", self.version, self.commit)
    }

    /// Banner followed by the build details, one per line.
    #[must_use]
    pub fn details(&self) -> String {
        format!(
            "{}
built:  {}
target: {}",
            self.banner(),
            self.built_at,
            self.target
        )
    }
}

/// Numeric components of the first `N(.N)*` run in `raw`.
///
/// `"v1.0.10"` gives `[1, 0, 10]`, `"build-2024.05"` gives `[2024, 5]`.
/// Returns `None` when `raw` holds no digits or a component overflows.
#[must_use]
pub fn version_components(raw: &str) -> Option<Vec<u64>> {
    let bytes = raw.as_bytes();
    let start = bytes.iter().position(u8::is_ascii_digit)?;
    let mut end = start;
    while end < bytes.len() {
        let b = bytes[end];
        let dot_then_digit =
            b == b'.' && bytes.get(end + 1).is_some_and(u8::is_ascii_digit);
        if b.is_ascii_digit() || dot_then_digit {
            end += 1;
        } else {
            break;
        }
    }
    raw[start..end]
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Compare two component lists after padding the shorter with zeros.
#[must_use]
pub fn compare_components(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let left = a.get(i).copied().unwrap_or(0);
            let right = b.get(i).copied().unwrap_or(0);
            left.cmp(&right)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// True only when both strings parse and `candidate` is strictly newer.
#[must_use]
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (version_components(candidate), version_components(current)) {
        (Some(candidate), Some(current)) => {
            compare_components(&candidate, &current) == Ordering::Greater
        }
        _ => false,
    }
}
