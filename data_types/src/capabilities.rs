//! Per-customer capability record.

use crate::CustomerId;

/// What a customer account is entitled to, plus its polling quota settings.
///
/// The boolean capabilities are stored and transported as a 16-bit flag
/// word. Bit positions are stable wire format shared with the website and
/// the polling workers; do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomerCapabilities {
    /// The customer this record belongs to.
    pub customer_id: CustomerId,
    /// Seconds between successive polls of one monitor.
    pub polling_interval: u32,
    /// Largest number of monitors the customer may define.
    pub maximum_number_monitors: u32,
    /// Days of latency history retained for this customer.
    pub expiration_days: u32,
    /// The capability flag word.
    pub flags: u16,
}

impl CustomerCapabilities {
    /// The account is active.
    pub const ACTIVE: u16 = 1 << 0;
    /// Monitors may be polled from more than one region.
    pub const MULTI_REGION: u16 = 1 << 1;
    /// WordPress integration is enabled.
    pub const WORDPRESS: u16 = 1 << 2;
    /// The customer may drive the REST API directly.
    pub const REST_API: u16 = 1 << 3;
    /// Content-change checking.
    pub const CONTENT_CHECK: u16 = 1 << 4;
    /// Keyword checking.
    pub const KEYWORD_CHECK: u16 = 1 << 5;
    /// POST-method probes.
    pub const POST_METHOD: u16 = 1 << 6;
    /// Latency tracking and history.
    pub const LATENCY_TRACKING: u16 = 1 << 7;
    /// SSL certificate expiration checking.
    pub const SSL_EXPIRATION: u16 = 1 << 8;
    /// Ping-based polling.
    pub const PING_POLLING: u16 = 1 << 9;
    /// Blacklist checking.
    pub const BLACKLIST: u16 = 1 << 10;
    /// Domain expiration checking.
    pub const DOMAIN_EXPIRATION: u16 = 1 << 11;
    /// Maintenance mode support.
    pub const MAINTENANCE: u16 = 1 << 12;
    /// Roll-up report support.
    pub const ROLLUPS: u16 = 1 << 13;
    // Bit 14 reserved.
    /// Polling for the account is paused.
    pub const PAUSED: u16 = 1 << 15;

    /// Whether every capability bit in `mask` is set.
    pub fn has(&self, mask: u16) -> bool {
        self.flags & mask == mask
    }

    /// Whether the account may read latency data right now: active, not
    /// paused, and entitled to latency tracking.
    pub fn may_read_latency(&self) -> bool {
        self.has(Self::ACTIVE | Self::LATENCY_TRACKING) && !self.has(Self::PAUSED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(flags: u16) -> CustomerCapabilities {
        CustomerCapabilities {
            customer_id: CustomerId::new(1),
            polling_interval: 60,
            maximum_number_monitors: 10,
            expiration_days: 90,
            flags,
        }
    }

    #[test]
    fn bit_positions_are_stable() {
        assert_eq!(CustomerCapabilities::ACTIVE, 0x0001);
        assert_eq!(CustomerCapabilities::LATENCY_TRACKING, 0x0080);
        assert_eq!(CustomerCapabilities::ROLLUPS, 0x2000);
        assert_eq!(CustomerCapabilities::PAUSED, 0x8000);
    }

    #[test]
    fn latency_read_gate() {
        let ok = caps(CustomerCapabilities::ACTIVE | CustomerCapabilities::LATENCY_TRACKING);
        assert!(ok.may_read_latency());

        let inactive = caps(CustomerCapabilities::LATENCY_TRACKING);
        assert!(!inactive.may_read_latency());

        let paused = caps(
            CustomerCapabilities::ACTIVE
                | CustomerCapabilities::LATENCY_TRACKING
                | CustomerCapabilities::PAUSED,
        );
        assert!(!paused.may_read_latency());

        let no_latency = caps(CustomerCapabilities::ACTIVE);
        assert!(!no_latency.may_read_latency());
    }
}
