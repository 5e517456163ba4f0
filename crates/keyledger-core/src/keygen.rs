//! Key generation and platform format validation.

use std::sync::LazyLock;

use rand::Rng;
use regex_lite::Regex;

use crate::{LedgerError, Platform};

/// Characters used in key segments. Visually ambiguous characters
/// (`I`, `O`, `0`, `1`) are left out.
pub const KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Segment lengths used when a platform has no pattern.
pub const DEFAULT_PATTERN: [u8; 4] = [4, 4, 4, 4];

/// Allowed length of a single segment.
pub const SEGMENT_LEN_RANGE: std::ops::RangeInclusive<u8> = 2..=8;

static PLATFORM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{1,20}$").expect("valid platform id regex"));

static PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3,4}$").expect("valid prefix regex"));

/// Generate a key of the form `PREFIX-XXXX-XXXX-…`.
pub fn generate_key(prefix: &str, pattern: &[u8]) -> String {
    let pattern = if pattern.is_empty() {
        &DEFAULT_PATTERN[..]
    } else {
        pattern
    };
    let mut rng = rand::rng();
    let mut key = String::with_capacity(prefix.len() + pattern.iter().map(|n| *n as usize + 1).sum::<usize>());
    key.push_str(prefix);
    for len in pattern {
        key.push('-');
        for _ in 0..*len {
            key.push(KEY_ALPHABET[rng.random_range(0..KEY_ALPHABET.len())] as char);
        }
    }
    key
}

/// Generate a key in the platform's format.
pub fn generate_for(platform: &Platform) -> String {
    generate_key(&platform.prefix, &platform.pattern)
}

/// Parse a dash-separated pattern such as `4-4-4`.
pub fn parse_pattern(input: &str) -> Result<Vec<u8>, LedgerError> {
    let invalid = || {
        LedgerError::Validation(format!(
            "invalid pattern '{}': each part must be a number from 2 to 8 separated by '-' (e.g. 4-4-4)",
            input
        ))
    };
    input
        .split('-')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .ok()
                .filter(|n| SEGMENT_LEN_RANGE.contains(n))
                .ok_or_else(invalid)
        })
        .collect()
}

/// Validate a platform id (2-21 chars: lowercase letters, digits, `-`, `_`).
pub fn validate_platform_id(id: &str) -> Result<(), LedgerError> {
    if PLATFORM_ID.is_match(id) {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "invalid platform id '{}': use 2-21 lowercase letters, digits, '-' or '_'",
            id
        )))
    }
}

/// Validate and normalise a platform definition before it is stored.
pub fn validate_platform(id: &str, platform: &mut Platform) -> Result<(), LedgerError> {
    validate_platform_id(id)?;
    if platform.title.trim().is_empty() {
        return Err(LedgerError::Validation("platform title is required".into()));
    }
    platform.prefix = platform.prefix.trim().to_uppercase();
    if !PREFIX.is_match(&platform.prefix) {
        return Err(LedgerError::Validation(format!(
            "invalid prefix '{}': use 3-4 uppercase letters",
            platform.prefix
        )));
    }
    if platform.pattern.is_empty() {
        platform.pattern = DEFAULT_PATTERN.to_vec();
    }
    if let Some(bad) = platform
        .pattern
        .iter()
        .find(|n| !SEGMENT_LEN_RANGE.contains(n))
    {
        return Err(LedgerError::Validation(format!(
            "invalid segment length {}: must be between 2 and 8",
            bad
        )));
    }
    Ok(())
}
