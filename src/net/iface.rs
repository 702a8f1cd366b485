//! Network interface metadata needed to open listeners and source replies.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use advmac::MacAddr6;

use super::NetError;

#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub mac: MacAddr6,
    pub v4_addrs: Vec<Ipv4Addr>,
    pub v6_addrs: Vec<Ipv6Addr>,
}

impl InterfaceInfo {
    /// Snapshot the named interface at startup.
    pub fn lookup(name: &str) -> Result<InterfaceInfo, NetError> {
        let iface = pnet::datalink::interfaces()
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| NetError::InterfaceNotFound(name.to_string()))?;

        let mac = iface
            .mac
            .ok_or_else(|| NetError::NoHardwareAddress(name.to_string()))?;
        let mac = MacAddr6::new(mac.octets());

        let mut v4_addrs = Vec::new();
        let mut v6_addrs = Vec::new();
        for network in &iface.ips {
            match network.ip() {
                IpAddr::V4(addr) => v4_addrs.push(addr),
                IpAddr::V6(addr) => v6_addrs.push(addr),
            }
        }

        Ok(InterfaceInfo {
            name: iface.name,
            index: iface.index,
            mac,
            v4_addrs,
            v6_addrs,
        })
    }

    /// First IPv4 address, used when `reply_from` is the zero or broadcast
    /// placeholder.
    pub fn first_v4(&self) -> Option<Ipv4Addr> {
        self.v4_addrs.first().copied()
    }

    /// First link-local IPv6 address, the default v6 reply source.
    pub fn first_link_local_v6(&self) -> Option<Ipv6Addr> {
        self.v6_addrs
            .iter()
            .copied()
            .find(|a| is_link_local(*a))
    }
}

/// fe80::/10
pub fn is_link_local(addr: Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_local_detection() {
        assert!(is_link_local("fe80::1".parse().unwrap()));
        assert!(is_link_local("febf::1".parse().unwrap()));
        assert!(!is_link_local("fec0::1".parse().unwrap()));
        assert!(!is_link_local("2001:db8::1".parse().unwrap()));
        assert!(!is_link_local(Ipv6Addr::UNSPECIFIED));
    }

    #[test]
    fn first_link_local_skips_global_addresses() {
        let info = InterfaceInfo {
            name: "test0".into(),
            index: 1,
            mac: MacAddr6::new([0, 1, 2, 3, 4, 5]),
            v4_addrs: vec![],
            v6_addrs: vec!["2001:db8::1".parse().unwrap(), "fe80::42".parse().unwrap()],
        };
        assert_eq!(
            info.first_link_local_v6(),
            Some("fe80::42".parse().unwrap())
        );
    }

    #[test]
    fn missing_interface_is_an_error() {
        let err = InterfaceInfo::lookup("definitely-not-a-real-interface-name").unwrap_err();
        assert!(matches!(err, NetError::InterfaceNotFound(_)));
    }
}
