//! Thin HTTP client for the inventory service.

use thiserror::Error;
use tracing::{error, warn};

use crate::config::NetboxConfig;

pub mod models;

use models::{Device, Interface, IpAddress, List, Site};

#[derive(Debug, Error)]
pub enum NetboxError {
    #[error("inventory request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("more than one {what} matches `{key}`")]
    Ambiguous { what: &'static str, key: String },
}

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
    sites: Vec<String>,
    device_duid_field: String,
}

impl Client {
    pub fn new(config: &NetboxConfig) -> Client {
        Client {
            http: reqwest::Client::new(),
            base_url: config.api.url.trim_end_matches('/').to_string(),
            token: config.api.token.clone(),
            sites: config.sites.clone(),
            device_duid_field: config.device_duid_field.clone(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}/{path}", self.base_url))
            .header("Accept", "application/json")
            .header("Authorization", format!("Token {}", self.token))
    }

    async fn list<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, NetboxError> {
        let list: List<T> = self
            .get(path)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.results)
    }

    pub async fn get_sites(&self) -> Result<Vec<Site>, NetboxError> {
        self.list("dcim/sites/", &[]).await
    }

    /// Verify that every configured site exists and is active. Called once at
    /// startup; a missing or inactive site is a configuration problem.
    pub async fn check_sites(&self) -> Result<bool, NetboxError> {
        let sites = self.get_sites().await?;

        let mut all_good = true;
        for wanted in &self.sites {
            let found = sites
                .iter()
                .any(|s| s.status.is_active() && (&s.id.to_string() == wanted || &s.slug == wanted));
            if !found {
                error!(site = %wanted, "site not found or inactive");
                all_good = false;
            }
        }
        Ok(all_good)
    }

    pub async fn find_interfaces_by_mac(&self, mac: &str) -> Result<Vec<Interface>, NetboxError> {
        let mac = mac.to_uppercase();
        if !is_likely_mac(&mac) {
            warn!(%mac, "lookup key does not look like a MAC address");
        }
        self.list("dcim/interfaces/", &[("mac_address", mac.as_str())])
            .await
    }

    pub async fn find_devices_by_mac(&self, mac: &str) -> Result<Vec<Device>, NetboxError> {
        let mac = mac.to_uppercase();
        if !is_likely_mac(&mac) {
            warn!(%mac, "lookup key does not look like a MAC address");
        }
        self.list("dcim/devices/", &[("mac_address", mac.as_str())])
            .await
    }

    /// Look a device up by the configured DUID custom field.
    pub async fn find_devices_by_duid(&self, duid: &str) -> Result<Vec<Device>, NetboxError> {
        let field = format!("cf_{}", self.device_duid_field);
        self.list("dcim/devices/", &[(field.as_str(), duid)]).await
    }

    pub async fn find_ip_addresses_by_interface(
        &self,
        interface_id: u64,
    ) -> Result<Vec<IpAddress>, NetboxError> {
        let id = interface_id.to_string();
        self.list("ipam/ip-addresses/", &[("interface_id", id.as_str())])
            .await
    }
}

/// Loose plausibility check on a lookup key that should be a MAC address.
pub fn is_likely_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn likely_mac_accepts_colon_hex() {
        assert!(is_likely_mac("AA:BB:CC:DD:EE:01"));
        assert!(is_likely_mac("aa:bb:cc:dd:ee:01"));
    }

    #[test]
    fn likely_mac_rejects_other_shapes() {
        assert!(!is_likely_mac("AA-BB-CC-DD-EE-01"));
        assert!(!is_likely_mac("AA:BB:CC:DD:EE"));
        assert!(!is_likely_mac("AA:BB:CC:DD:EE:ZZ"));
        assert!(!is_likely_mac("hostname"));
    }
}
