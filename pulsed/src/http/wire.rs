//! Codec for the binary worker-upload body.
//!
//! The body is a fixed 64-byte header followed by any number of 12-byte
//! sample entries:
//!
//! | Offset      | Bytes | Field |
//! |-------------|-------|-------|
//! | 0x00        | 4     | IPv4 address, byte 0 = least significant |
//! | 0x04        | 16    | IPv6 address, big-endian |
//! | 0x14        | 4     | Service rate, LE unsigned 24.8 fixed point |
//! | 0x18        | 2     | CPU loading, LE unsigned 4.12 fixed point |
//! | 0x1A        | 2     | Memory loading, LE unsigned 0.16 fixed point |
//! | 0x1C        | 1     | Server status code |
//! | 0x1D        | 35    | Reserved, ignored |
//! | 0x40 + 12·N | 4     | Monitor id, LE u32 |
//! | 0x44 + 12·N | 4     | Zoran timestamp, LE u32 |
//! | 0x48 + 12·N | 4     | Latency microseconds, LE u32 |

use std::net::{Ipv4Addr, Ipv6Addr};

use data_types::ServerStatus;

/// Size of the fixed upload header.
pub const HEADER_LEN: usize = 64;
/// Size of one sample entry.
pub const ENTRY_LEN: usize = 12;

/// Why an upload body was rejected. Either way the response is an empty
/// HTTP 400.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The body is shorter than the fixed header.
    #[error("upload body of {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    TooShort(usize),

    /// The bytes after the header are not a whole number of entries.
    #[error("upload body carries {0} trailing bytes, not a multiple of {ENTRY_LEN}")]
    Misaligned(usize),
}

/// The fixed upload header: who is reporting, and its telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadHeader {
    /// Reporting worker's IPv4 address; unspecified when IPv6-only.
    pub ipv4: Ipv4Addr,
    /// Reporting worker's IPv6 address.
    pub ipv6: Ipv6Addr,
    /// Monitors polled per second.
    pub monitors_per_second: f32,
    /// CPU loading; may exceed 1.0 on an oversubscribed host.
    pub cpu_loading: f32,
    /// Memory loading in `[0, 1)`.
    pub memory_loading: f32,
    /// Raw server status code; see [`UploadHeader::status`].
    pub status_code: u8,
}

impl UploadHeader {
    /// The textual identifier the worker is registered under in the
    /// servers catalog: its IPv4 address, or the IPv6 address for
    /// IPv6-only workers.
    pub fn identifier(&self) -> String {
        if self.ipv4.is_unspecified() {
            self.ipv6.to_string()
        } else {
            self.ipv4.to_string()
        }
    }

    /// Decoded server status; `None` for out-of-range codes.
    pub fn status(&self) -> Option<ServerStatus> {
        ServerStatus::from_wire(self.status_code)
    }
}

/// One uploaded latency observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadEntry {
    /// The probed monitor.
    pub monitor_id: u32,
    /// Observation time, Zoran seconds.
    pub zoran_timestamp: u32,
    /// Measured latency, microseconds.
    pub latency_micros: u32,
}

/// Decode an upload body into its header and entries.
pub fn decode_upload(body: &[u8]) -> Result<(UploadHeader, Vec<UploadEntry>), WireError> {
    if body.len() < HEADER_LEN {
        return Err(WireError::TooShort(body.len()));
    }

    let trailing = body.len() - HEADER_LEN;
    if trailing % ENTRY_LEN != 0 {
        return Err(WireError::Misaligned(trailing));
    }

    // IPv4 arrives least-significant byte first.
    let ipv4 = Ipv4Addr::new(body[3], body[2], body[1], body[0]);

    let mut ipv6_bytes = [0_u8; 16];
    ipv6_bytes.copy_from_slice(&body[4..20]);
    let ipv6 = Ipv6Addr::from(ipv6_bytes);

    let rate_raw = u32::from_le_bytes(body[0x14..0x18].try_into().expect("4-byte slice"));
    let cpu_raw = u16::from_le_bytes(body[0x18..0x1A].try_into().expect("2-byte slice"));
    let memory_raw = u16::from_le_bytes(body[0x1A..0x1C].try_into().expect("2-byte slice"));

    let header = UploadHeader {
        ipv4,
        ipv6,
        monitors_per_second: rate_raw as f32 / 256.0,
        cpu_loading: f32::from(cpu_raw) / 4096.0,
        memory_loading: f32::from(memory_raw) / 65536.0,
        status_code: body[0x1C],
    };

    let entries = body[HEADER_LEN..]
        .chunks_exact(ENTRY_LEN)
        .map(|chunk| UploadEntry {
            monitor_id: u32::from_le_bytes(chunk[0..4].try_into().expect("4-byte slice")),
            zoran_timestamp: u32::from_le_bytes(chunk[4..8].try_into().expect("4-byte slice")),
            latency_micros: u32::from_le_bytes(chunk[8..12].try_into().expect("4-byte slice")),
        })
        .collect();

    Ok((header, entries))
}
