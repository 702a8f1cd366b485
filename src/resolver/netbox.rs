//! The inventory-backed source.
//!
//! A client is looked up three ways, first success wins:
//!   1. by DUID, device directly (v6 solicitations only);
//!   2. by MAC via an interface record, taking the interface's assigned
//!      address and the owning device for options;
//!   3. by MAC via a device's primary address when no interface matches.
//!
//! "Not found" is a normal outcome; the engine ignores the request and the
//! client retries elsewhere.

use std::net::IpAddr;
use std::sync::Arc;

use advmac::MacAddr6;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ResolveError, Source};
use crate::netbox::models::{Device, Interface, IpAddress};
use crate::netbox::Client;
use crate::{mac_colon_upper, ClientBindingV4, ClientBindingV6, ClientId, Duid};

pub struct NetboxSource {
    client: Arc<Client>,
}

impl NetboxSource {
    pub fn new(client: Arc<Client>) -> Self {
        NetboxSource { client }
    }

    /// The single interface with this MAC, or `None`. Zero matches and
    /// multiple matches both fall through to the next lookup stage.
    async fn interface_by_mac(&self, mac: &str) -> Result<Option<Interface>, ResolveError> {
        let mut interfaces = self.client.find_interfaces_by_mac(mac).await?;
        match interfaces.len() {
            0 => {
                debug!(%mac, "no interface with this MAC");
                Ok(None)
            }
            1 => Ok(Some(interfaces.remove(0))),
            n => {
                warn!(%mac, count = n, "MAC is not unique across interfaces");
                Ok(None)
            }
        }
    }

    async fn ip_by_interface(&self, interface: &Interface) -> Result<Option<IpAddress>, ResolveError> {
        let mut ips = self
            .client
            .find_ip_addresses_by_interface(interface.id)
            .await?;
        match ips.len() {
            0 => {
                debug!(interface = interface.id, "no address on interface");
                Ok(None)
            }
            1 => Ok(Some(ips.remove(0))),
            n => {
                warn!(
                    interface = interface.id,
                    count = n,
                    "interface has more than one address"
                );
                Ok(None)
            }
        }
    }

    async fn device_by_mac(&self, mac: &str) -> Result<Option<Device>, ResolveError> {
        let mut devices = self.client.find_devices_by_mac(mac).await?;
        match devices.len() {
            0 => Ok(None),
            1 => Ok(Some(devices.remove(0))),
            n => {
                warn!(%mac, count = n, "MAC is not unique across devices");
                Ok(None)
            }
        }
    }

    async fn device_by_duid(&self, duid: &Duid) -> Result<Option<Device>, ResolveError> {
        let mut devices = self.client.find_devices_by_duid(&duid.hex()).await?;
        match devices.len() {
            0 => Ok(None),
            1 => Ok(Some(devices.remove(0))),
            n => {
                warn!(%duid, count = n, "DUID is not unique across devices");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Source for NetboxSource {
    async fn offer_v4(
        &self,
        info: &mut ClientBindingV4,
        xid: u32,
        client: &ClientId,
    ) -> Result<(), ResolveError> {
        let mac = match client {
            ClientId::Mac(mac) => mac_colon_upper(*mac),
            ClientId::DuidIaid { .. } => {
                // DUID lookup is a v6 solicitation path; a v4 request keyed
                // by client identifier has no inventory mapping yet.
                debug!(%client, xid, "v4 lookup by client identifier is not supported");
                return Err(ResolveError::NotFound(client.to_string()));
            }
        };

        // Stage: interface record carrying the MAC.
        if let Some(interface) = self.interface_by_mac(&mac).await? {
            if let Some(ip) = self.ip_by_interface(&interface).await? {
                if let Some((IpAddr::V4(addr), prefix)) = ip.address() {
                    info.ip_addr = Some(addr);
                    info.prefix_len = prefix;
                    if let Some(device) = &interface.device {
                        info.options.host_name = Some(device.name.clone());
                    }
                    debug!(%mac, %addr, xid, "binding found via interface record");
                    return Ok(());
                }
            }
        }

        // Stage: device primary address.
        if let Some(device) = self.device_by_mac(&mac).await? {
            if let Some(primary) = &device.primary_ip4 {
                if let Some((IpAddr::V4(addr), prefix)) = primary.address() {
                    info.ip_addr = Some(addr);
                    info.prefix_len = prefix;
                    info.options.host_name = Some(device.name.clone());
                    debug!(%mac, %addr, xid, "binding found via device primary address");
                    return Ok(());
                }
            }
        }

        Err(ResolveError::NotFound(mac))
    }

    async fn solicit_v6(
        &self,
        info: &mut ClientBindingV6,
        duid: &Duid,
        mac: MacAddr6,
        iaid: u32,
    ) -> Result<bool, ResolveError> {
        let mac = mac_colon_upper(mac);

        // Stage: device carrying the DUID.
        if let Some(device) = self.device_by_duid(duid).await? {
            if let Some(primary) = &device.primary_ip6 {
                if let Some((IpAddr::V6(addr), prefix)) = primary.address() {
                    info.ip_addrs.push(addr);
                    info.prefix_lens.push(prefix);
                    info.options.host_name = Some(device.name.clone());
                    debug!(%duid, iaid, %addr, "binding found via device DUID");
                    return Ok(true);
                }
            }
        }

        // Stage: interface record carrying the MAC.
        if let Some(interface) = self.interface_by_mac(&mac).await? {
            if let Some(ip) = self.ip_by_interface(&interface).await? {
                if let Some((IpAddr::V6(addr), prefix)) = ip.address() {
                    info.ip_addrs.push(addr);
                    info.prefix_lens.push(prefix);
                    if let Some(device) = &interface.device {
                        info.options.host_name = Some(device.name.clone());
                    }
                    debug!(%mac, iaid, %addr, "binding found via interface record");
                    return Ok(true);
                }
            }
        }

        // Stage: device primary address.
        if let Some(device) = self.device_by_mac(&mac).await? {
            if let Some(primary) = &device.primary_ip6 {
                if let Some((IpAddr::V6(addr), prefix)) = primary.address() {
                    info.ip_addrs.push(addr);
                    info.prefix_lens.push(prefix);
                    info.options.host_name = Some(device.name.clone());
                    debug!(%mac, iaid, %addr, "binding found via device primary address");
                    return Ok(true);
                }
            }
        }

        debug!(%duid, %mac, iaid, "no v6 binding in inventory");
        Ok(false)
    }
}
