//! Per-interface DHCPv4 engine: reader loop plus ephemeral handler tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::{DhcpConfig, V4ListenerConfig};
use crate::net::{DhcpV4Conn, InterfaceInfo, NetError, ReceivedV4};
use crate::resolver::Resolver;
use crate::v4::handlers::{DhcpV4Response, V4Handler};

const MAX_BACKOFF_MS: u64 = 1000;

pub struct ServerV4 {
    conn: DhcpV4Conn,
    handler: V4Handler,
    iface: String,
}

impl ServerV4 {
    /// Construct the engine for one interface. The socket is acquired here
    /// and released when the engine is dropped after its reader loop ends.
    pub fn bind(
        iface_name: &str,
        listener: &V4ListenerConfig,
        dhcp: Arc<DhcpConfig>,
        resolver: Arc<dyn Resolver>,
    ) -> Result<ServerV4, NetError> {
        let iface = InterfaceInfo::lookup(iface_name)?;

        let reply_from = if listener.reply_from.is_unspecified() || listener.reply_from.is_broadcast()
        {
            iface.first_v4().ok_or_else(|| NetError::NoAddress {
                iface: iface.name.clone(),
                what: "IPv4",
            })?
        } else {
            listener.reply_from
        };

        let conn = DhcpV4Conn::open(&iface)?;

        Ok(ServerV4 {
            conn,
            handler: V4Handler::new(
                resolver,
                dhcp,
                reply_from,
                listener.reply_hostname.clone(),
            ),
            iface: iface.name,
        })
    }

    /// Reader loop. Each accepted packet is handed to an ephemeral task so a
    /// slow resolver call cannot delay the next packet on this interface.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(iface = %self.iface, "listening for DHCPv4 requests");
        let mut error_count: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                received = self.conn.read_from() => {
                    match received {
                        Ok(received) => {
                            error_count = 0;
                            let this = Arc::clone(&self);
                            tokio::spawn(async move { this.handle_packet(received).await });
                        }
                        Err(e) => {
                            if *shutdown.borrow() {
                                break;
                            }
                            error!(iface = %self.iface, error = %e, "socket read failed");
                            error_count = error_count.saturating_add(1);
                            let backoff = std::cmp::min(
                                10u64.saturating_mul(2u64.saturating_pow(error_count)),
                                MAX_BACKOFF_MS,
                            );
                            tokio::time::sleep(Duration::from_millis(backoff)).await;
                        }
                    }
                }
            }
        }

        info!(iface = %self.iface, "DHCPv4 listener stopped");
    }

    async fn handle_packet(&self, received: ReceivedV4) {
        debug!(
            iface = %self.iface,
            src_ip = %received.src_ip,
            src_mac = %crate::mac_colon_upper(received.src_mac),
            "packet accepted"
        );

        match self
            .handler
            .handle_message(&received.message, received.src_mac)
            .await
        {
            DhcpV4Response::NoResponse(reason) => {
                debug!(iface = %self.iface, ?reason, "not responding");
            }
            DhcpV4Response::Reply(reply) => {
                let dst = reply.destination;
                if let Err(e) = self
                    .conn
                    .write_to(&reply.message, dst.ip, dst.mac, dst.port)
                    .await
                {
                    error!(iface = %self.iface, error = %e, "failed to send reply");
                }
            }
        }
    }
}

impl std::fmt::Debug for ServerV4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerV4")
            .field("iface", &self.iface)
            .finish_non_exhaustive()
    }
}
