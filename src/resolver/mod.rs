//! The resolver pipeline: turning a client identifier into a binding.
//!
//! A resolver is a capability set over two stages. The *source* answers
//! offers and solicitations from the authoritative inventory; the *cache*
//! carries reservations through the offer → acknowledge lifecycle in the
//! shared key/value store. The two are independent implementations wired
//! together by [`caching::CachingResolver`].

use std::net::Ipv4Addr;

use advmac::MacAddr6;
use async_trait::async_trait;
use thiserror::Error;

use crate::netbox::NetboxError;
use crate::{ClientBindingV4, ClientBindingV6, ClientId, Duid};

pub mod caching;
pub mod netbox;
pub mod redis;

pub use self::caching::CachingResolver;
pub use self::netbox::NetboxSource;
pub use self::redis::RedisCache;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The inventory has no binding for this client. A normal outcome: the
    /// engine drops the request without a reply.
    #[error("no binding for client `{0}`")]
    NotFound(String),
    /// The inventory was reachable but could not be used. The client will
    /// retry.
    #[error("inventory lookup failed: {0}")]
    Source(#[from] NetboxError),
    /// The key/value store failed. Dropping the reply is safer than
    /// answering with an uncommitted binding.
    #[error("cache operation failed: {0}")]
    Cache(#[from] ::redis::RedisError),
    /// An acknowledgement for a transaction that was never offered, from a
    /// client with no prior lease.
    #[error("no offer or lease under `{0}`")]
    NoLease(String),
    /// A cached record that does not deserialize is treated as absent.
    #[error("cached record under `{key}` is unreadable: {err}")]
    BadRecord {
        key: String,
        err: serde_json::Error,
    },
}

/// The authoritative inventory stage.
#[async_trait]
pub trait Source: Send + Sync {
    /// Populate `info` with the address reserved for this client, or
    /// `NotFound`.
    async fn offer_v4(
        &self,
        info: &mut ClientBindingV4,
        xid: u32,
        client: &ClientId,
    ) -> Result<(), ResolveError>;

    /// Populate `info` with the v6 addresses reserved for this client.
    /// Returns `false` when the client is unknown.
    async fn solicit_v6(
        &self,
        info: &mut ClientBindingV6,
        duid: &Duid,
        mac: MacAddr6,
        iaid: u32,
    ) -> Result<bool, ResolveError>;
}

/// The shared reservation/lease stage.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Write an offer record under the transaction key with the reservation
    /// TTL. Normalizes the binding's timers first.
    async fn reserve_v4(&self, info: &mut ClientBindingV4, xid: u32) -> Result<(), ResolveError>;

    /// Persist an offer as a lease (rename), or extend an existing lease.
    /// Loads the committed record back into `info`.
    async fn acknowledge_v4(
        &self,
        info: &mut ClientBindingV4,
        xid: u32,
        client: &ClientId,
        requested_ip: Ipv4Addr,
    ) -> Result<(), ResolveError>;

    /// Delete the lease. Deleting a lease that does not exist is success.
    async fn release_v4(&self, client: &ClientId, ip: Ipv4Addr) -> Result<(), ResolveError>;
}

/// The full capability set the protocol engines program against.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn offer_v4(
        &self,
        info: &mut ClientBindingV4,
        xid: u32,
        client: &ClientId,
    ) -> Result<(), ResolveError>;

    async fn acknowledge_v4(
        &self,
        info: &mut ClientBindingV4,
        xid: u32,
        client: &ClientId,
        requested_ip: Ipv4Addr,
    ) -> Result<(), ResolveError>;

    async fn release_v4(
        &self,
        xid: u32,
        client: &ClientId,
        ip: Ipv4Addr,
    ) -> Result<(), ResolveError>;

    async fn decline_v4(
        &self,
        xid: u32,
        client: &ClientId,
        ip: Ipv4Addr,
    ) -> Result<(), ResolveError>;

    async fn solicit_v6(
        &self,
        info: &mut ClientBindingV6,
        duid: &Duid,
        mac: MacAddr6,
        iaid: u32,
    ) -> Result<bool, ResolveError>;
}
