//! # Engine Primitives
//!
//! Hardcoded runtime constants for the topiq engine.
//!
//! These are compiled into the binary and immutable at runtime. All query
//! and input limits live here so every bound the engine enforces is visible
//! in one place.

/// Magic bytes for the topiq binary snapshot header.
///
/// - File header = magic bytes ("TOPQ") + version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"TOPQ";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum allowed payload size for the snapshot format.
///
/// Validated BEFORE attempting deserialization so corrupted or malicious
/// input cannot trigger allocation-based memory exhaustion.
pub const MAX_SNAPSHOT_PAYLOAD_SIZE: usize = 500 * 1024 * 1024; // 500 MB

/// Maximum length of a locator IRI, in bytes.
///
/// Locators longer than this are rejected on construction.
pub const MAX_LOCATOR_LENGTH: usize = 4096;

/// Maximum length of a literal or name value, in bytes (64 KB).
///
/// Values longer than this are rejected to prevent memory exhaustion from
/// malformed input.
pub const MAX_VALUE_LENGTH: usize = 65536;

/// Maximum page size for paged index queries.
///
/// Requested limits are clamped to this bound; all queries must be
/// computationally bounded.
pub const MAX_PAGE_LIMIT: usize = 10_000;

/// Maximum depth for transitive supertype/subtype walks.
///
/// Bounds the closure computation even on (invalid) cyclic type graphs.
pub const MAX_TYPE_DEPTH: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"TOPQ");
    }

    #[test]
    fn page_limit_is_bounded() {
        assert!(MAX_PAGE_LIMIT <= MAX_SNAPSHOT_PAYLOAD_SIZE);
    }
}
