//! Composition of an authoritative source with the shared cache.

use std::net::Ipv4Addr;
use std::sync::Arc;

use advmac::MacAddr6;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{Cache, ResolveError, Resolver, Source};
use crate::{ClientBindingV4, ClientBindingV6, ClientId, Duid};

/// The production resolver: `source` assigns, `cache` remembers. The two are
/// interchangeable implementations behind their capability traits.
pub struct CachingResolver {
    source: Arc<dyn Source>,
    cache: Arc<dyn Cache>,
}

impl CachingResolver {
    pub fn new(source: Arc<dyn Source>, cache: Arc<dyn Cache>) -> Self {
        CachingResolver { source, cache }
    }
}

#[async_trait]
impl Resolver for CachingResolver {
    async fn offer_v4(
        &self,
        info: &mut ClientBindingV4,
        xid: u32,
        client: &ClientId,
    ) -> Result<(), ResolveError> {
        self.source.offer_v4(info, xid, client).await?;
        self.cache.reserve_v4(info, xid).await
    }

    async fn acknowledge_v4(
        &self,
        info: &mut ClientBindingV4,
        xid: u32,
        client: &ClientId,
        requested_ip: Ipv4Addr,
    ) -> Result<(), ResolveError> {
        self.cache
            .acknowledge_v4(info, xid, client, requested_ip)
            .await
    }

    async fn release_v4(
        &self,
        xid: u32,
        client: &ClientId,
        ip: Ipv4Addr,
    ) -> Result<(), ResolveError> {
        debug!(%client, %ip, xid, "releasing lease");
        self.cache.release_v4(client, ip).await
    }

    async fn decline_v4(
        &self,
        _xid: u32,
        client: &ClientId,
        ip: Ipv4Addr,
    ) -> Result<(), ResolveError> {
        // Strictly this deviates from RFC 2131 §4.3.3: a declined address is
        // not poisoned. The inventory only hands out addresses reserved for
        // one specific client, so there is no pool to withdraw it from.
        // TODO poison declined addresses once pool-based sources exist.
        info!(%client, %ip, "DHCPDECLINE noted; inventory-driven source takes no action");
        Ok(())
    }

    async fn solicit_v6(
        &self,
        info: &mut ClientBindingV6,
        duid: &Duid,
        mac: MacAddr6,
        iaid: u32,
    ) -> Result<bool, ResolveError> {
        let found = self.source.solicit_v6(info, duid, mac, iaid).await?;
        // TODO cache v6 bindings once the v6 lease lifecycle is wired up.
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSource {
        offers: Mutex<Vec<(u32, ClientId)>>,
        solicits: Mutex<Vec<(Duid, u32)>>,
        found: bool,
    }

    #[async_trait]
    impl Source for RecordingSource {
        async fn offer_v4(
            &self,
            info: &mut ClientBindingV4,
            xid: u32,
            client: &ClientId,
        ) -> Result<(), ResolveError> {
            self.offers.lock().unwrap().push((xid, client.clone()));
            info.ip_addr = Some(Ipv4Addr::new(192, 0, 2, 10));
            info.prefix_len = 24;
            info.timeouts.lease = Duration::from_secs(3600);
            Ok(())
        }

        async fn solicit_v6(
            &self,
            info: &mut ClientBindingV6,
            duid: &Duid,
            _mac: MacAddr6,
            iaid: u32,
        ) -> Result<bool, ResolveError> {
            self.solicits.lock().unwrap().push((duid.clone(), iaid));
            if self.found {
                info.ip_addrs.push("2001:db8::10".parse().unwrap());
            }
            Ok(self.found)
        }
    }

    #[derive(Default)]
    struct RecordingCache {
        reservations: Mutex<Vec<(u32, Option<Ipv4Addr>)>>,
        acknowledgements: Mutex<Vec<(u32, String)>>,
        releases: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Cache for RecordingCache {
        async fn reserve_v4(
            &self,
            info: &mut ClientBindingV4,
            xid: u32,
        ) -> Result<(), ResolveError> {
            info.timeouts.normalize();
            self.reservations.lock().unwrap().push((xid, info.ip_addr));
            Ok(())
        }

        async fn acknowledge_v4(
            &self,
            _info: &mut ClientBindingV4,
            xid: u32,
            client: &ClientId,
            _requested_ip: Ipv4Addr,
        ) -> Result<(), ResolveError> {
            self.acknowledgements
                .lock()
                .unwrap()
                .push((xid, client.lease_key(crate::Family::V4)));
            Ok(())
        }

        async fn release_v4(&self, client: &ClientId, _ip: Ipv4Addr) -> Result<(), ResolveError> {
            self.releases
                .lock()
                .unwrap()
                .push(client.lease_key(crate::Family::V4));
            Ok(())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl Source for FailingSource {
        async fn offer_v4(
            &self,
            _info: &mut ClientBindingV4,
            _xid: u32,
            client: &ClientId,
        ) -> Result<(), ResolveError> {
            Err(ResolveError::NotFound(client.to_string()))
        }

        async fn solicit_v6(
            &self,
            _info: &mut ClientBindingV6,
            _duid: &Duid,
            _mac: MacAddr6,
            _iaid: u32,
        ) -> Result<bool, ResolveError> {
            Ok(false)
        }
    }

    fn test_mac() -> MacAddr6 {
        "aa:bb:cc:dd:ee:01".parse().unwrap()
    }

    #[tokio::test]
    async fn offer_consults_source_then_reserves() {
        let source = Arc::new(RecordingSource::default());
        let cache = Arc::new(RecordingCache::default());
        let resolver = CachingResolver::new(source.clone(), cache.clone());

        let mut info = ClientBindingV4::default();
        resolver
            .offer_v4(&mut info, 0x1234, &ClientId::Mac(test_mac()))
            .await
            .unwrap();

        assert_eq!(info.ip_addr, Some(Ipv4Addr::new(192, 0, 2, 10)));
        assert_eq!(source.offers.lock().unwrap().len(), 1);
        // The reservation saw the populated binding, not an empty one.
        assert_eq!(
            cache.reservations.lock().unwrap()[0],
            (0x1234, Some(Ipv4Addr::new(192, 0, 2, 10)))
        );
        // Reservation normalized the timers from the source-provided lease.
        assert_eq!(info.timeouts.t2_rebinding, Duration::from_secs(1800));
        assert_eq!(info.timeouts.t1_renewal, Duration::from_secs(900));
    }

    #[tokio::test]
    async fn failed_offer_does_not_touch_the_cache() {
        let cache = Arc::new(RecordingCache::default());
        let resolver = CachingResolver::new(Arc::new(FailingSource), cache.clone());

        let mut info = ClientBindingV4::default();
        let err = resolver
            .offer_v4(&mut info, 1, &ClientId::Mac(test_mac()))
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::NotFound(_)));
        assert!(cache.reservations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn acknowledge_and_release_go_to_the_cache_only() {
        let source = Arc::new(RecordingSource::default());
        let cache = Arc::new(RecordingCache::default());
        let resolver = CachingResolver::new(source.clone(), cache.clone());

        let client = ClientId::Mac(test_mac());
        let mut info = ClientBindingV4::default();
        resolver
            .acknowledge_v4(&mut info, 7, &client, Ipv4Addr::new(192, 0, 2, 10))
            .await
            .unwrap();
        resolver
            .release_v4(7, &client, Ipv4Addr::new(192, 0, 2, 10))
            .await
            .unwrap();

        assert!(source.offers.lock().unwrap().is_empty());
        assert_eq!(
            cache.acknowledgements.lock().unwrap()[0],
            (7, "v4;AA:BB:CC:DD:EE:01".to_string())
        );
        assert_eq!(cache.releases.lock().unwrap()[0], "v4;AA:BB:CC:DD:EE:01");
    }

    #[tokio::test]
    async fn decline_is_a_logged_no_op() {
        let cache = Arc::new(RecordingCache::default());
        let resolver = CachingResolver::new(Arc::new(FailingSource), cache.clone());

        resolver
            .decline_v4(1, &ClientId::Mac(test_mac()), Ipv4Addr::new(192, 0, 2, 10))
            .await
            .unwrap();

        assert!(cache.releases.lock().unwrap().is_empty());
        assert!(cache.acknowledgements.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn solicit_delegates_to_source() {
        let source = Arc::new(RecordingSource {
            found: true,
            ..Default::default()
        });
        let resolver = CachingResolver::new(source.clone(), Arc::new(RecordingCache::default()));

        let duid = Duid::from_bytes(vec![0x00, 0x03, 0x01]);
        let mut info = ClientBindingV6::default();
        let found = resolver
            .solicit_v6(&mut info, &duid, test_mac(), 42)
            .await
            .unwrap();

        assert!(found);
        assert_eq!(info.ip_addrs.len(), 1);
        assert_eq!(source.solicits.lock().unwrap()[0].1, 42);
    }
}
