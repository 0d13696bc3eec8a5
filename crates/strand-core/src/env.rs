//! Environment variable helpers
//!
//! Runtime knobs are read through these so every override follows the
//! same rules: unset or unparsable values fall back to the default.
//!
//! ```ignore
//! use strand_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("STRAND_WORKERS", 4);
//! let debug = env_get_bool("STRAND_DEBUG", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or return `default`
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Boolean flag; "1", "true", "yes" and "on" (any case) are true
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// `Some` only when the variable is set and parses
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
