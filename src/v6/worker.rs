//! Per-interface DHCPv6 engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::{DhcpConfig, V6ListenerConfig};
use crate::net::{DhcpV6Conn, InterfaceInfo, NetError, ReceivedV6, CLIENT_PORT_V6};
use crate::resolver::Resolver;
use crate::v6::handlers::{DhcpV6Response, V6Handler};

const MAX_BACKOFF_MS: u64 = 1000;

pub struct ServerV6 {
    conn: DhcpV6Conn,
    handler: V6Handler,
    iface: String,
}

impl ServerV6 {
    pub async fn bind(
        iface_name: &str,
        listener: &V6ListenerConfig,
        listen: Vec<std::net::Ipv6Addr>,
        dhcp: Arc<DhcpConfig>,
        resolver: Arc<dyn Resolver>,
    ) -> Result<ServerV6, NetError> {
        let iface = InterfaceInfo::lookup(iface_name)?;
        let conn = DhcpV6Conn::open(&iface, listen, listener.reply_from).await?;
        let reply_from = conn.reply_from();

        Ok(ServerV6 {
            conn,
            handler: V6Handler::new(resolver, dhcp, listener.advertise_unicast, reply_from),
            iface: iface.name,
        })
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(iface = %self.iface, "listening for DHCPv6 requests");
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

        self.conn.leave_all().await;
        info!(iface = %self.iface, "DHCPv6 listener stopped");
    }

    async fn handle_packet(&self, received: ReceivedV6) {
        debug!(
            iface = %self.iface,
            src_ip = %received.src_ip,
            message_type = ?received.message.msg_type(),
            "packet accepted"
        );

        match self
            .handler
            .handle_message(
                &received.message,
                received.src_ip,
                received.src_mac,
                received.dst_ip,
            )
            .await
        {
            DhcpV6Response::NoResponse(reason) => {
                debug!(iface = %self.iface, ?reason, "not responding");
            }
            DhcpV6Response::Message(reply) => {
                // Replies go unicast back to the packet's source.
                if let Err(e) = self
                    .conn
                    .write_to(&reply, received.src_ip, received.src_mac, CLIENT_PORT_V6)
                    .await
                {
                    error!(iface = %self.iface, error = %e, "failed to send reply");
                }
            }
        }
    }
}

impl std::fmt::Debug for ServerV6 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerV6")
            .field("iface", &self.iface)
            .finish_non_exhaustive()
    }
}
