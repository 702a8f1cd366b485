//! YAML configuration for the daemon.
//!
//! One top-level record with `netbox`, `cache`, `daemon`, and `dhcp`
//! sub-records. Unknown keys are rejected, matching the strict parsing of the
//! config file's consumers elsewhere in the fleet.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::duid::ServerDuid;

/// The DHCPv6 All_DHCP_Relay_Agents_and_Servers group (RFC 8415 §7.1).
pub const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0x0001, 0x0002);
/// The DHCPv6 All_DHCP_Servers group (RFC 8415 §7.1).
pub const ALL_DHCP_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0x0001, 0x0003);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{path}`: {err}")]
    Io {
        err: std::io::Error,
        path: PathBuf,
    },
    #[error("parsing `{path}`: {err}")]
    Parsing {
        err: serde_yaml::Error,
        path: PathBuf,
    },
    #[error("`{0}` is not a DHCPv6 listen address or a known group name")]
    ListenAddress(String),
    #[error("unexpected log level `{0}`, expected one of [trace, debug, info, warn, error]")]
    LogLevel(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    pub netbox: NetboxConfig,
    pub cache: CacheConfig,
    pub daemon: DaemonConfig,
    pub dhcp: DhcpConfig,
}

impl Configuration {
    pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Configuration, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            err,
            path: path.to_path_buf(),
        })?;
        serde_yaml::from_str(&raw).map_err(|err| ConfigError::Parsing {
            err,
            path: path.to_path_buf(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetboxConfig {
    pub api: NetboxApiConfig,
    #[serde(default)]
    pub sites: Vec<String>,
    #[serde(default)]
    pub cache: NetboxCacheConfig,
    pub device_duid_field: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetboxApiConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetboxCacheConfig {
    /// Response-cache lifetime. Parsed for forward compatibility; the
    /// response cache itself is not implemented.
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: i64,
}

fn default_redis_port() -> u16 {
    6379
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemonize: bool,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub listen_v4: HashMap<String, V4ListenerConfig>,
    #[serde(default)]
    pub listen_v6: HashMap<String, V6ListenerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl LogConfig {
    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        match self.level.as_deref() {
            None | Some("") => Ok(tracing::Level::INFO),
            Some(s) => s
                .parse()
                .map_err(|_| ConfigError::LogLevel(s.to_string())),
        }
    }
}

/// Per-interface DHCPv4 listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct V4ListenerConfig {
    /// Source address of replies and the ServerIdentifier option. `0.0.0.0`
    /// or the broadcast address select the interface's first IPv4 address.
    pub reply_from: Ipv4Addr,
    #[serde(default)]
    pub reply_hostname: String,
}

/// Per-interface DHCPv6 listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct V6ListenerConfig {
    #[serde(default)]
    pub advertise_unicast: bool,
    /// Destination addresses accepted by the inbound filter. Multicast
    /// entries are joined on start. `::` listens to everything. The group
    /// names `All_DHCP_Relay_Agents_and_Servers` and `All_DHCP_Servers` are
    /// recognised case-insensitively.
    #[serde(default)]
    pub listen_to: Vec<String>,
    /// Source address of replies; the interface's first link-local address
    /// when unset.
    #[serde(default)]
    pub reply_from: Option<Ipv6Addr>,
}

impl V6ListenerConfig {
    pub fn listen_addresses(&self) -> Result<Vec<Ipv6Addr>, ConfigError> {
        self.listen_to
            .iter()
            .map(|entry| match entry.to_ascii_lowercase().as_str() {
                "all_dhcp_relay_agents_and_servers" => Ok(ALL_DHCP_RELAY_AGENTS_AND_SERVERS),
                "all_dhcp_servers" => Ok(ALL_DHCP_SERVERS),
                _ => entry
                    .parse()
                    .map_err(|_| ConfigError::ListenAddress(entry.clone())),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DhcpConfig {
    /// UUID the server DUID is derived from. Must stay stable across
    /// restarts, so it is configured rather than generated.
    pub server_uuid: Uuid,
    #[serde(default, with = "humantime_serde")]
    pub reservation_duration: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub lease_duration: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub t1_duration: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub t2_duration: Option<Duration>,
    #[serde(default)]
    pub default_options: DefaultOptions,
}

impl DhcpConfig {
    pub fn server_duid(&self) -> ServerDuid {
        ServerDuid::from_uuid(&self.server_uuid)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultOptions {
    #[serde(default)]
    pub next_server: Option<Ipv4Addr>,
    #[serde(default)]
    pub bootfile_name: Option<String>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ntp_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub routers: Vec<Ipv4Addr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
netbox:
  api:
    url: "https://netbox.example.com/api"
    token: "0123456789abcdef"
  sites: ["1", "7"]
  cache:
    duration: 5m
  device_duid_field: duid
cache:
  redis:
    host: 127.0.0.1
    port: 6379
    password: hunter2
    database: 3
daemon:
  daemonize: false
  log:
    level: debug
  listen_v4:
    eth0:
      reply_from: 192.0.2.254
      reply_hostname: dhcp.example.com
  listen_v6:
    eth0:
      advertise_unicast: true
      listen_to:
        - ALL_DHCP_Relay_Agents_and_Servers
        - all_dhcp_servers
        - 2001:db8::1
      reply_from: 2001:db8::1
dhcp:
  server_uuid: 6ba7b810-9dad-11d1-80b4-00c04fd430c8
  reservation_duration: 1m
  lease_duration: 6h
  default_options:
    next_server: 192.0.2.2
    bootfile_name: pxelinux.0
    domain_name: example.com
    dns_servers: [192.0.2.1]
    ntp_servers: [192.0.2.3]
    routers: [192.0.2.1]
"#;

    #[test]
    fn parses_full_sample() {
        let conf: Configuration = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(conf.netbox.sites, vec!["1", "7"]);
        assert_eq!(conf.netbox.device_duid_field, "duid");
        assert_eq!(
            conf.netbox.cache.duration,
            Some(Duration::from_secs(5 * 60))
        );
        assert_eq!(conf.cache.redis.database, 3);
        assert_eq!(conf.dhcp.lease_duration, Some(Duration::from_secs(6 * 3600)));
        assert_eq!(
            conf.dhcp.reservation_duration,
            Some(Duration::from_secs(60))
        );
        assert_eq!(conf.daemon.log.level().unwrap(), tracing::Level::DEBUG);

        let v4 = &conf.daemon.listen_v4["eth0"];
        assert_eq!(v4.reply_from, Ipv4Addr::new(192, 0, 2, 254));
        assert_eq!(v4.reply_hostname, "dhcp.example.com");
    }

    #[test]
    fn expands_multicast_group_names_case_insensitively() {
        let conf: Configuration = serde_yaml::from_str(SAMPLE).unwrap();
        let addrs = conf.daemon.listen_v6["eth0"].listen_addresses().unwrap();
        assert_eq!(
            addrs,
            vec![
                ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
                ALL_DHCP_SERVERS,
                "2001:db8::1".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn rejects_unknown_listen_token() {
        let cfg = V6ListenerConfig {
            advertise_unicast: false,
            listen_to: vec!["not-a-group".into()],
            reply_from: None,
        };
        assert!(matches!(
            cfg.listen_addresses(),
            Err(ConfigError::ListenAddress(_))
        ));
    }

    #[test]
    fn rejects_unknown_fields() {
        let bad = format!("{SAMPLE}\nbogus: true\n");
        assert!(serde_yaml::from_str::<Configuration>(&bad).is_err());
    }

    #[test]
    fn server_duid_is_uuid_based() {
        let conf: Configuration = serde_yaml::from_str(SAMPLE).unwrap();
        let duid = conf.dhcp.server_duid();
        assert_eq!(&duid.as_bytes()[0..2], &[0x00, 0x04]);
        assert_eq!(duid.as_bytes().len(), 18);
    }

    #[test]
    fn bad_log_level_is_an_error() {
        let log = LogConfig {
            level: Some("chatty".into()),
            path: None,
        };
        assert!(matches!(log.level(), Err(ConfigError::LogLevel(_))));
    }
}
