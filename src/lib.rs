use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use advmac::MacAddr6;
use serde::{Deserialize, Serialize};

use crate::config::DhcpConfig;

pub mod cache;
pub mod config;
pub mod daemon;
pub mod duid;
pub mod logging;
pub mod net;
pub mod netbox;
pub mod resolver;
pub mod v4;
pub mod v6;

pub use duid::{Duid, ServerDuid};

/// Address family tag used in cache keys and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => write!(f, "v4"),
            Family::V6 => write!(f, "v6"),
        }
    }
}

/// How a client identifies itself: the hardware address from `chaddr`, or a
/// DUID plus the client-chosen IAID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientId {
    Mac(MacAddr6),
    DuidIaid { duid: Duid, iaid: u32 },
}

impl ClientId {
    /// Cache key under which an acknowledged lease for this client lives.
    /// At most one lease is resident per key; writing a new lease supersedes
    /// any prior value.
    pub fn lease_key(&self, family: Family) -> String {
        match self {
            ClientId::Mac(mac) => format!("{family};{}", mac_colon_upper(*mac)),
            ClientId::DuidIaid { duid, iaid } => {
                format!("{family};{};{iaid:08x}", duid.hex())
            }
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientId::Mac(mac) => write!(f, "{}", mac_colon_upper(*mac)),
            ClientId::DuidIaid { duid, iaid } => write!(f, "{duid}/{iaid:08x}"),
        }
    }
}

/// Cache key for a pending offer awaiting acknowledgement. Lives from the
/// moment an offer is cached until it is renamed to a lease key or the
/// reservation times out.
pub fn offer_key(family: Family, xid: u32) -> String {
    format!("{family};{xid:#x}")
}

/// Render a MAC the way the cache and the inventory expect it:
/// colon-separated upper-case hex.
pub fn mac_colon_upper(mac: MacAddr6) -> String {
    let b = mac.to_array();
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        b[0], b[1], b[2], b[3], b[4], b[5]
    )
}

/// Clamp a duration to whole seconds representable on the wire. Lease options
/// are 32-bit; anything larger saturates instead of wrapping.
pub fn saturating_secs(d: Duration) -> u32 {
    u32::try_from(d.as_secs()).unwrap_or(u32::MAX)
}

/// Timer set attached to a DHCPv4 binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsV4 {
    pub reservation: Duration,
    pub lease: Duration,
    pub t1_renewal: Duration,
    pub t2_rebinding: Duration,
}

impl TimeoutsV4 {
    pub const DEFAULT_RESERVATION: Duration = Duration::from_secs(60);
    pub const DEFAULT_LEASE: Duration = Duration::from_secs(6 * 60 * 60);

    /// Fill unset timers from their defaults and restore the ordering
    /// invariant `t1 <= t2 <= lease`.
    pub fn normalize(&mut self) {
        if self.reservation.is_zero() {
            self.reservation = Self::DEFAULT_RESERVATION;
        }
        if self.lease.is_zero() {
            self.lease = Self::DEFAULT_LEASE;
        }
        if self.t2_rebinding.is_zero() {
            self.t2_rebinding = self.lease / 2;
        }
        if self.t1_renewal.is_zero() {
            self.t1_renewal = self.t2_rebinding / 2;
        }
        self.t2_rebinding = self.t2_rebinding.min(self.lease);
        self.t1_renewal = self.t1_renewal.min(self.t2_rebinding);
    }
}

/// Timer set attached to a DHCPv6 binding. `preferred <= valid` always holds
/// after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsV6 {
    pub valid_lifetime: Duration,
    pub preferred_lifetime: Duration,
    pub t1_renewal: Duration,
    pub t2_rebinding: Duration,
}

impl TimeoutsV6 {
    pub fn normalize(&mut self) {
        if self.valid_lifetime.is_zero() {
            self.valid_lifetime = TimeoutsV4::DEFAULT_LEASE;
        }
        if self.preferred_lifetime.is_zero() {
            self.preferred_lifetime = self.valid_lifetime / 2;
        }
        if self.t2_rebinding.is_zero() {
            self.t2_rebinding = self.valid_lifetime / 2;
        }
        if self.t1_renewal.is_zero() {
            self.t1_renewal = self.t2_rebinding / 2;
        }
        self.preferred_lifetime = self.preferred_lifetime.min(self.valid_lifetime);
        self.t2_rebinding = self.t2_rebinding.min(self.valid_lifetime);
        self.t1_renewal = self.t1_renewal.min(self.t2_rebinding);
    }
}

/// Options carried in a v4 binding beyond the address itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingOptionsV4 {
    pub host_name: Option<String>,
    pub domain_name: Option<String>,
    pub routers: Vec<Ipv4Addr>,
    pub domain_name_servers: Vec<Ipv4Addr>,
    pub ntp_servers: Vec<Ipv4Addr>,
}

/// The central record for a DHCPv4 client: everything needed to construct an
/// OFFER or ACK. Bindings are value-typed; they move from the resolver to the
/// engine and are persisted in the cache in serialized form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientBindingV4 {
    pub ip_addr: Option<Ipv4Addr>,
    pub prefix_len: u8,
    pub next_server: Option<Ipv4Addr>,
    pub bootfile_name: Option<String>,
    pub options: BindingOptionsV4,
    pub timeouts: TimeoutsV4,
}

impl ClientBindingV4 {
    /// A fresh binding carrying the configured default options and timers,
    /// ready for the source to fill in the address.
    pub fn with_defaults(dhcp: &DhcpConfig) -> Self {
        let defaults = &dhcp.default_options;
        ClientBindingV4 {
            ip_addr: None,
            prefix_len: 0,
            next_server: defaults.next_server,
            bootfile_name: defaults.bootfile_name.clone(),
            options: BindingOptionsV4 {
                host_name: None,
                domain_name: defaults.domain_name.clone(),
                routers: defaults.routers.clone(),
                domain_name_servers: defaults.dns_servers.clone(),
                ntp_servers: defaults.ntp_servers.clone(),
            },
            timeouts: TimeoutsV4 {
                reservation: dhcp.reservation_duration.unwrap_or(Duration::ZERO),
                lease: dhcp.lease_duration.unwrap_or(Duration::ZERO),
                t1_renewal: dhcp.t1_duration.unwrap_or(Duration::ZERO),
                t2_rebinding: dhcp.t2_duration.unwrap_or(Duration::ZERO),
            },
        }
    }

    /// Network mask derived from the prefix length.
    pub fn subnet_mask(&self) -> Ipv4Addr {
        if self.prefix_len == 0 {
            return Ipv4Addr::UNSPECIFIED;
        }
        let bits = u32::MAX << (32 - u32::from(self.prefix_len.min(32)));
        Ipv4Addr::from(bits)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingOptionsV6 {
    pub host_name: Option<String>,
    pub domain_name: Option<String>,
    pub domain_name_servers: Vec<Ipv6Addr>,
    pub ntp_servers: Vec<Ipv6Addr>,
}

/// The central record for a DHCPv6 client. Zero or more addresses per IA.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientBindingV6 {
    pub ip_addrs: Vec<Ipv6Addr>,
    pub prefix_lens: Vec<u8>,
    pub options: BindingOptionsV6,
    pub timeouts: TimeoutsV6,
}

impl ClientBindingV6 {
    pub fn with_defaults(dhcp: &DhcpConfig) -> Self {
        ClientBindingV6 {
            ip_addrs: Vec::new(),
            prefix_lens: Vec::new(),
            options: BindingOptionsV6::default(),
            timeouts: TimeoutsV6 {
                valid_lifetime: dhcp.lease_duration.unwrap_or(Duration::ZERO),
                preferred_lifetime: Duration::ZERO,
                t1_renewal: dhcp.t1_duration.unwrap_or(Duration::ZERO),
                t2_rebinding: dhcp.t2_duration.unwrap_or(Duration::ZERO),
            },
        }
    }

    /// True when every address in `addrs` is part of this binding.
    pub fn contains_all(&self, addrs: &[Ipv6Addr]) -> bool {
        addrs.iter().all(|a| self.ip_addrs.contains(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_key_by_mac_is_upper_colon() {
        let mac: MacAddr6 = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let key = ClientId::Mac(mac).lease_key(Family::V4);
        assert_eq!(key, "v4;AA:BB:CC:DD:EE:01");
    }

    #[test]
    fn lease_key_by_duid_carries_family_and_iaid() {
        let id = ClientId::DuidIaid {
            duid: Duid::from_bytes(vec![0x00, 0x03, 0xde, 0xad, 0xbe, 0xef]),
            iaid: 0x1234,
        };
        assert_eq!(id.lease_key(Family::V6), "v6;deadbeef;00001234");
    }

    #[test]
    fn offer_key_is_hex_xid() {
        assert_eq!(offer_key(Family::V4, 0x1234), "v4;0x1234");
    }

    #[test]
    fn saturating_secs_clamps() {
        assert_eq!(saturating_secs(Duration::from_secs(3600)), 3600);
        assert_eq!(saturating_secs(Duration::from_secs(u64::MAX)), u32::MAX);
        assert_eq!(
            saturating_secs(Duration::from_secs(u64::from(u32::MAX) + 1)),
            u32::MAX
        );
    }

    #[test]
    fn v4_timeouts_default_derivation() {
        let mut t = TimeoutsV4::default();
        t.normalize();
        assert_eq!(t.reservation, Duration::from_secs(60));
        assert_eq!(t.lease, Duration::from_secs(6 * 3600));
        assert_eq!(t.t2_rebinding, Duration::from_secs(3 * 3600));
        assert_eq!(t.t1_renewal, Duration::from_secs(3 * 3600 / 2));
    }

    #[test]
    fn v4_timeouts_keep_ordering_invariant() {
        let mut t = TimeoutsV4 {
            reservation: Duration::from_secs(60),
            lease: Duration::from_secs(100),
            t1_renewal: Duration::from_secs(500),
            t2_rebinding: Duration::from_secs(400),
        };
        t.normalize();
        assert!(t.t1_renewal <= t.t2_rebinding);
        assert!(t.t2_rebinding <= t.lease);
    }

    #[test]
    fn v4_timeouts_derive_from_source_lease() {
        // A source that sets only the lease: T2 = lease/2, T1 = T2/2.
        let mut t = TimeoutsV4 {
            lease: Duration::from_secs(3600),
            ..Default::default()
        };
        t.normalize();
        assert_eq!(t.t2_rebinding, Duration::from_secs(1800));
        assert_eq!(t.t1_renewal, Duration::from_secs(900));
    }

    #[test]
    fn v6_timeouts_preferred_not_longer_than_valid() {
        let mut t = TimeoutsV6 {
            valid_lifetime: Duration::from_secs(100),
            preferred_lifetime: Duration::from_secs(200),
            ..Default::default()
        };
        t.normalize();
        assert!(t.preferred_lifetime <= t.valid_lifetime);
    }

    #[test]
    fn subnet_mask_from_prefix() {
        let binding = ClientBindingV4 {
            prefix_len: 24,
            ..Default::default()
        };
        assert_eq!(binding.subnet_mask(), Ipv4Addr::new(255, 255, 255, 0));
        let host = ClientBindingV4 {
            prefix_len: 32,
            ..Default::default()
        };
        assert_eq!(host.subnet_mask(), Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn binding_v6_contains_all() {
        let binding = ClientBindingV6 {
            ip_addrs: vec![
                "2001:db8::1".parse().unwrap(),
                "2001:db8::2".parse().unwrap(),
            ],
            ..Default::default()
        };
        assert!(binding.contains_all(&["2001:db8::1".parse().unwrap()]));
        assert!(!binding.contains_all(&["2001:db8::9".parse().unwrap()]));
    }
}
