use chrono::{DateTime, Utc};

use crate::error::GshError;

const GIB: u64 = 1024 * 1024 * 1024;

/// Parse a disk size like `"20GB"`, `"1TB"` or `"10"` (GiB implied) into
/// whole gibibytes.
pub fn parse_disk_size_gb(s: &str) -> Result<u64, GshError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(GshError::argument("disk size cannot be empty"));
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (&s[..i], s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| GshError::argument(format!("invalid disk size number: '{num_str}'")))?;

    let bytes = match suffix.as_str() {
        "" | "G" | "GB" => num.checked_mul(GIB),
        "T" | "TB" => num.checked_mul(1024 * GIB),
        _ => {
            return Err(GshError::argument(format!(
                "unknown disk size suffix: '{suffix}' (use GB or TB)"
            )));
        }
    }
    .ok_or_else(|| GshError::argument(format!("disk size overflows: '{s}'")))?;

    Ok(bytes / GIB)
}

/// Split a `KEY=VALUE` flag argument.
pub fn parse_key_value(s: &str) -> Result<(String, String), GshError> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(GshError::argument(format!(
            "expected KEY=VALUE with a non-empty key, got '{s}'"
        ))),
    }
}

/// Local login name, used when no `user@` prefix is given.
pub fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .map(|u| u.to_ascii_lowercase())
        .unwrap_or_else(|_| "root".into())
}

pub fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

/// Parse an RFC 3339 timestamp (`2026-01-02T03:04:05.678-07:00`) into unix
/// seconds. Fractional seconds are dropped.
pub fn parse_rfc3339(s: &str) -> Option<u64> {
    let parsed = DateTime::parse_from_rfc3339(s.trim()).ok()?;
    u64::try_from(parsed.timestamp()).ok()
}
