//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

use std::net::Ipv4Addr;

/// Errors that can occur during DHCP server operation.
///
/// Every protocol-level variant is recoverable at the datagram boundary:
/// the receive loop logs it and moves on to the next packet.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Datagram too short to contain a BOOTP fixed header (236 bytes).
    #[error("Truncated BOOTP header: {len} bytes (minimum 236)")]
    TruncatedHeader { len: usize },

    /// The IP address pool is exhausted.
    ///
    /// Every pool address carries a live lease. No offer is sent; the
    /// client retries or times out.
    #[error("No available IP addresses in pool")]
    PoolExhausted,

    /// A client requested an address outside the pool and the reservation
    /// table.
    #[error("Address {0} is not managed by this server")]
    AddressNotManaged(Ipv4Addr),

    /// A client requested an address held by a live lease of a different
    /// hardware address, or reserved for a different hardware address.
    #[error("Address {0} is in use by another client")]
    AddressInUse(Ipv4Addr),

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when the
    /// configuration contains invalid values (e.g., pool_start > pool_end).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without administrator
    /// privileges.
    #[error("Socket error: {0}")]
    Socket(String),
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
