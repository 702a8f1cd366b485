//! Raw-link I/O: per-interface packet sockets, DHCP frame filtering and
//! assembly, and DHCPv6 multicast group membership.
//!
//! This is the engines' only I/O path. Clients without an address cannot be
//! reached through the normal UDP/IP socket path, so replies are built as
//! full Ethernet frames and written to the wire directly.

use thiserror::Error;

pub mod iface;
pub mod multicast;
pub mod socket;
pub mod v4;
pub mod v6;

pub use iface::InterfaceInfo;
pub use v4::{DhcpV4Conn, ReceivedV4};
pub use v6::{DhcpV6Conn, ReceivedV6};

pub const SERVER_PORT_V4: u16 = 67;
pub const CLIENT_PORT_V4: u16 = 68;
pub const SERVER_PORT_V6: u16 = 547;
pub const CLIENT_PORT_V6: u16 = 546;

/// TTL / hop limit on outgoing replies.
pub const REPLY_HOP_LIMIT: u8 = 128;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("network interface `{0}` not found")]
    InterfaceNotFound(String),
    #[error("interface `{0}` has no hardware address")]
    NoHardwareAddress(String),
    #[error("interface `{iface}` has no usable {what} address")]
    NoAddress { iface: String, what: &'static str },
    #[error("`{0}` is a multicast address, which cannot be a reply source")]
    MulticastReplyFrom(std::net::Ipv6Addr),
    #[error("no DHCPv6 listen addresses configured")]
    NoListenAddresses,
    #[error("reply has no ServerIdentifier option to use as source address")]
    MissingServerIdentifier,
    #[error("failed to encode reply: {0}")]
    Encode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
