//! HTTP server CLI config.

use std::net::SocketAddr;

/// Where the JSON/binary API listens, and where outbound notifications go.
#[derive(Debug, Clone, clap::Parser)]
pub struct HttpConfig {
    /// Address the API server binds.
    #[clap(
        long = "api-bind",
        env = "PULSE_API_BIND",
        default_value = "127.0.0.1:8080",
        action
    )]
    pub bind_address: SocketAddr,

    /// Authority (scheme://host[:port]) of the customer website that
    /// receives purge and event notifications. Notifications are skipped
    /// when unset.
    #[clap(long = "website-authority", env = "PULSE_WEBSITE_AUTHORITY", action)]
    pub website_authority: Option<String>,
}
