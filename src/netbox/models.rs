//! Inventory record shapes, limited to the fields the resolver consumes.

use std::net::IpAddr;

use serde::Deserialize;

/// Paged list envelope common to all inventory collections.
#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub value: i64,
    #[serde(default)]
    pub label: String,
}

impl Status {
    pub fn is_active(&self) -> bool {
        self.value == 1
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Site {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub status: Status,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub primary_ip4: Option<EmbeddedIp>,
    #[serde(default)]
    pub primary_ip6: Option<EmbeddedIp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedDevice {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interface {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub device: Option<EmbeddedDevice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedIp {
    pub id: u64,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpAddress {
    pub id: u64,
    pub family: i64,
    pub address: String,
}

/// Split an inventory `address/prefix` string into its parts. The host part
/// is preserved, not truncated to the network address.
pub fn parse_cidr(raw: &str) -> Option<(IpAddr, u8)> {
    let net: ipnet::IpNet = raw.parse().ok()?;
    Some((net.addr(), net.prefix_len()))
}

impl IpAddress {
    pub fn address(&self) -> Option<(IpAddr, u8)> {
        parse_cidr(&self.address)
    }
}

impl EmbeddedIp {
    pub fn address(&self) -> Option<(IpAddr, u8)> {
        parse_cidr(&self.address)
    }
}
