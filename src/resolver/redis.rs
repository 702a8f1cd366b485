//! The Redis-backed reservation/lease cache.
//!
//! Key layout:
//!
//! | key                      | value            | lifetime            |
//! |--------------------------|------------------|---------------------|
//! | `v4;<0xXID>`             | binding as JSON  | reservation TTL     |
//! | `v4;<UPPER-MAC>`         | binding as JSON  | lease TTL           |
//! | `v<N>;<duid>;<iaid>`     | binding as JSON  | lease TTL           |
//!
//! An acknowledgement renames the offer key onto the lease key. The rename is
//! atomic on the store side, so concurrent acknowledgements of the same
//! client leave exactly one lease record, and a client that never completes
//! DORA stops occupying its slot when the reservation TTL fires.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::debug;

use super::{Cache, ResolveError};
use crate::{offer_key, ClientBindingV4, ClientId, Family};

pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub fn new(conn: MultiplexedConnection) -> Self {
        RedisCache { conn }
    }

    fn decode(key: &str, raw: String) -> Result<ClientBindingV4, ResolveError> {
        serde_json::from_str(&raw).map_err(|err| ResolveError::BadRecord {
            key: key.to_string(),
            err,
        })
    }

    /// Load a lease record and push its TTL out to the lease duration.
    async fn extend_lease(
        &self,
        conn: &mut MultiplexedConnection,
        info: &mut ClientBindingV4,
        lease_key: &str,
    ) -> Result<(), ResolveError> {
        let raw: Option<String> = conn.get(lease_key).await?;
        let raw = raw.ok_or_else(|| ResolveError::NoLease(lease_key.to_string()))?;

        *info = Self::decode(lease_key, raw)?;
        info.timeouts.normalize();

        let secs = i64::try_from(info.timeouts.lease.as_secs()).unwrap_or(i64::MAX);
        let _: bool = conn.expire(lease_key, secs).await?;
        Ok(())
    }
}

/// True when a RENAME failed because the source key does not exist.
fn is_missing_source(err: &redis::RedisError) -> bool {
    err.kind() == redis::ErrorKind::ResponseError && err.to_string().contains("no such key")
}

#[async_trait]
impl Cache for RedisCache {
    async fn reserve_v4(&self, info: &mut ClientBindingV4, xid: u32) -> Result<(), ResolveError> {
        info.timeouts.normalize();

        let key = offer_key(Family::V4, xid);
        let payload = serde_json::to_string(info).expect("binding serializes");
        let ttl = info.timeouts.reservation.as_secs().max(1);

        debug!(%key, ttl, "writing offer record");
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(&key, payload, ttl).await?;
        Ok(())
    }

    async fn acknowledge_v4(
        &self,
        info: &mut ClientBindingV4,
        xid: u32,
        client: &ClientId,
        requested_ip: Ipv4Addr,
    ) -> Result<(), ResolveError> {
        let offer = offer_key(Family::V4, xid);
        let lease = client.lease_key(Family::V4);
        let mut conn = self.conn.clone();

        let rename: Result<(), redis::RedisError> = conn.rename(&offer, &lease).await;
        match rename {
            Ok(()) => {
                debug!(%offer, %lease, "offer committed to lease");
            }
            Err(err) if is_missing_source(&err) => {
                // The offer either timed out or was committed by a
                // concurrent acknowledgement; fall through to extending
                // whatever lease exists.
                debug!(%offer, %lease, "no offer record, treating as lease renewal");
            }
            Err(err) => return Err(err.into()),
        }

        self.extend_lease(&mut conn, info, &lease).await?;

        if let Some(committed) = info.ip_addr {
            if committed != requested_ip {
                debug!(%lease, %committed, %requested_ip, "client requested a different address than committed");
            }
        }
        Ok(())
    }

    async fn release_v4(&self, client: &ClientId, ip: Ipv4Addr) -> Result<(), ResolveError> {
        let lease = client.lease_key(Family::V4);
        let mut conn = self.conn.clone();

        let removed: i64 = conn.del(&lease).await?;
        if removed == 0 {
            debug!(%lease, %ip, "release of a lease that was not resident");
        } else {
            debug!(%lease, %ip, "lease released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeoutsV4;
    use std::time::Duration;

    #[test]
    fn binding_record_round_trips_through_json() {
        let mut info = ClientBindingV4 {
            ip_addr: Some(Ipv4Addr::new(192, 0, 2, 10)),
            prefix_len: 24,
            next_server: None,
            bootfile_name: Some("pxelinux.0".into()),
            options: Default::default(),
            timeouts: TimeoutsV4 {
                lease: Duration::from_secs(3600),
                ..Default::default()
            },
        };
        info.timeouts.normalize();

        let raw = serde_json::to_string(&info).unwrap();
        let back = RedisCache::decode("v4;AA:BB:CC:DD:EE:01", raw).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn unreadable_record_is_reported_with_its_key() {
        let err = RedisCache::decode("v4;0x1234", "not-json".to_string()).unwrap_err();
        match err {
            ResolveError::BadRecord { key, .. } => assert_eq!(key, "v4;0x1234"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
