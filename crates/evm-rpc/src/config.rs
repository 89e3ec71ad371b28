//! Dispatcher settings. Missing JSON fields keep their defaults.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TEST_IDENTITY: &str = "default";
pub const DEFAULT_FILTER_EXPIRY_SECS: u64 = 300;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RpcConfig {
    /// Serve pinned requests from the response cache.
    pub cache_enabled: bool,
    /// Where recordings are flushed; `None` keeps the cache in memory.
    pub cache_dir: Option<PathBuf>,
    /// Names the recording within `cache_dir/<chain id>/`.
    pub test_identity: String,
    /// Filters not polled for this long are dropped.
    pub filter_expiry_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_dir: None,
            test_identity: DEFAULT_TEST_IDENTITY.to_string(),
            filter_expiry_secs: DEFAULT_FILTER_EXPIRY_SECS,
        }
    }
}

impl RpcConfig {
    pub fn filter_expiry(&self) -> Duration {
        Duration::from_secs(self.filter_expiry_secs)
    }

    /// `<cache_dir>/<chain_id>/<identity>.har.json`.
    pub fn recording_path(&self, chain_id: u64) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        Some(
            dir.join(chain_id.to_string())
                .join(format!("{}.har.json", sanitize(&self.test_identity))),
        )
    }
}

/// Keeps the identity a single path component.
fn sanitize(identity: &str) -> String {
    let cleaned: String = identity
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        DEFAULT_TEST_IDENTITY.to_string()
    } else {
        cleaned
    }
}
