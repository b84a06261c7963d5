use std::env;

use crate::ordering::OrderStrategy;

pub(crate) const ORDERING_VAR: &str = "GRADMEM_ORDERING";
pub(crate) const NAMESCOPE_VAR: &str = "GRADMEM_NAMESCOPE";
pub(crate) const VERIFY_VAR: &str = "GRADMEM_VERIFY";

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn non_empty(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

/// Unset, blank, or unparsable values fall back to `None`.
pub(crate) fn ordering() -> Option<OrderStrategy> {
    match non_empty(ORDERING_VAR)?.parse() {
        Ok(strategy) => Some(strategy),
        Err(err) => {
            tracing::warn!(var = ORDERING_VAR, "{err}; using default ordering");
            None
        }
    }
}

pub(crate) fn namescope() -> Option<String> {
    non_empty(NAMESCOPE_VAR)
}

pub(crate) fn verify() -> Option<bool> {
    non_empty(VERIFY_VAR).map(|value| parse_bool(&value))
}
