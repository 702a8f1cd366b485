use advmac::MacAddr6;
use dhcproto::v4::{self, DhcpOption};
use std::net::Ipv4Addr;

/// Helpers for interacting with dhcproto::v4::Message
pub trait MessageExtV4 {
    fn message_type(&self) -> Option<v4::MessageType>;
    fn server_id(&self) -> Option<&Ipv4Addr>;
    fn requested_ip_addr(&self) -> Option<&Ipv4Addr>;
    fn chaddr_mac(&self) -> Option<MacAddr6>;
}

impl MessageExtV4 for v4::Message {
    fn message_type(&self) -> Option<v4::MessageType> {
        self.opts().iter().find_map(|o| match o.1 {
            DhcpOption::MessageType(mt) => Some(*mt),
            _ => None,
        })
    }

    fn server_id(&self) -> Option<&Ipv4Addr> {
        self.opts().iter().find_map(|o| match o.1 {
            DhcpOption::ServerIdentifier(addr) => Some(addr),
            _ => None,
        })
    }

    fn requested_ip_addr(&self) -> Option<&Ipv4Addr> {
        self.opts().iter().find_map(|o| match o.1 {
            DhcpOption::RequestedIpAddress(addr) => Some(addr),
            _ => None,
        })
    }

    /// First six bytes of `chaddr` as a MAC address.
    fn chaddr_mac(&self) -> Option<MacAddr6> {
        let chaddr = self.chaddr();
        if chaddr.len() < 6 {
            return None;
        }
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&chaddr[..6]);
        Some(MacAddr6::new(bytes))
    }
}
