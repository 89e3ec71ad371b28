//! Where: process start of an embedding host / What: JSON tracing output
//! filtered by `LOG_FILTER` / Why: the host may already own a subscriber.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

const LOG_FILTER_VAR: &str = "LOG_FILTER";
const DEFAULT_FILTER: &str = "info";
const LOG_FILTER_MAX_LEN: usize = 1024;

/// Installs the global subscriber once. Later calls, or a subscriber set by
/// the embedding process, are left alone.
pub fn init_tracing() {
    static LOG_INIT: OnceLock<()> = OnceLock::new();
    let _ = LOG_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_new(resolve_log_filter())
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::fmt()
            .json()
            .with_target(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_env_filter(env_filter)
            .try_init();
    });
}

fn resolve_log_filter() -> String {
    std::env::var(LOG_FILTER_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && value.len() <= LOG_FILTER_MAX_LEN)
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}
