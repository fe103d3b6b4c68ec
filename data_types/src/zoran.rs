//! Conversion between Unix time and the on-disk Zoran timestamp.
//!
//! All persisted timestamps are 32-bit unsigned offsets from the Zoran
//! epoch (midnight, 1 January 2021, UTC-7), which keeps the timestamp
//! column at 4 bytes for several decades.

/// Seconds between the Unix epoch and the start of the Zoran epoch.
pub const ZORAN_EPOCH_OFFSET: u64 = 1_609_484_400;

/// Convert a Unix timestamp (seconds) to Zoran time.
///
/// Times before the Zoran epoch saturate to `0`; times beyond the
/// representable range saturate to `u32::MAX`.
pub fn to_zoran(unix: u64) -> u32 {
    let shifted = unix.saturating_sub(ZORAN_EPOCH_OFFSET);
    u32::try_from(shifted).unwrap_or(u32::MAX)
}

/// Convert a Zoran timestamp back to Unix time (seconds).
pub fn to_unix(zoran: u32) -> u64 {
    u64::from(zoran) + ZORAN_EPOCH_OFFSET
}
