//! # tinydhcp
//!
//! A minimal DHCP server for a single network segment.
//!
//! ## Features
//!
//! - DISCOVER/OFFER/REQUEST/ACK/RELEASE handling
//! - Lenient BOOTP-compatible packet decoding
//! - Static MAC-to-IP reservations
//! - First-fit dynamic allocation with lazy lease expiry
//! - Async/await with Tokio
//!
//! All lease state is in memory; nothing survives a restart.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tinydhcp::{Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> tinydhcp::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let server = DhcpServer::new(config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - Server configuration (IP pool, lease duration, DNS, etc.)
//! - [`DhcpServer`] - UDP front end listening on port 67
//! - [`MessageHandler`] - Per-datagram transaction logic
//! - [`LeasePool`] - Thread-safe address allocator and lease table
//! - [`DhcpPacket`] - DHCP packet parsing and encoding
//! - [`DhcpOption`] - The subset of RFC 2132 options this server speaks

pub mod config;
pub mod error;
pub mod lease;
pub mod options;
pub mod packet;
pub mod server;

pub use config::{Config, StaticReservation};
pub use error::{Error, Result};
pub use lease::{Lease, LeasePool};
pub use options::{DhcpOption, MessageType, OptionCode};
pub use packet::{DhcpPacket, MacAddr};
pub use server::{DhcpServer, MessageHandler};
