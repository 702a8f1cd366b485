//! Supervisor: one engine per configured interface × address family.
//!
//! A listener that fails to come up is logged and skipped; the rest of the
//! fleet keeps serving. Shutdown flips a watch channel, every reader loop
//! drains, and all tasks are joined.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Configuration;
use crate::resolver::Resolver;
use crate::v4::ServerV4;
use crate::v6::ServerV6;

pub struct Daemon {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Construct and start every configured listener.
    pub async fn start(config: &Configuration, resolver: Arc<dyn Resolver>) -> Daemon {
        info!("starting daemon");
        let (shutdown, _) = watch::channel(false);
        let dhcp = Arc::new(config.dhcp.clone());
        let mut tasks = Vec::new();

        for (iface, listener) in &config.daemon.listen_v4 {
            match ServerV4::bind(iface, listener, Arc::clone(&dhcp), Arc::clone(&resolver)) {
                Ok(server) => {
                    let server = Arc::new(server);
                    tasks.push(tokio::spawn(server.run(shutdown.subscribe())));
                }
                Err(e) => {
                    error!(%iface, error = %e, "cannot listen for DHCPv4, skipping interface");
                }
            }
        }

        for (iface, listener) in &config.daemon.listen_v6 {
            let listen = match listener.listen_addresses() {
                Ok(listen) => listen,
                Err(e) => {
                    error!(%iface, error = %e, "bad listen_to entry, skipping interface");
                    continue;
                }
            };
            match ServerV6::bind(
                iface,
                listener,
                listen,
                Arc::clone(&dhcp),
                Arc::clone(&resolver),
            )
            .await
            {
                Ok(server) => {
                    let server = Arc::new(server);
                    tasks.push(tokio::spawn(server.run(shutdown.subscribe())));
                }
                Err(e) => {
                    error!(%iface, error = %e, "cannot listen for DHCPv6, skipping interface");
                }
            }
        }

        info!(listeners = tasks.len(), "daemon started");
        Daemon { shutdown, tasks }
    }

    pub fn listener_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every engine and wait for the reader tasks to end.
    pub async fn shutdown(self) {
        info!("stopping daemon");
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "listener task ended abnormally");
            }
        }
        info!("stopped daemon");
    }
}
