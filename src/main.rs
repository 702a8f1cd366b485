use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};

use netbox_dhcp::config::Configuration;
use netbox_dhcp::daemon::Daemon;
use netbox_dhcp::resolver::{CachingResolver, NetboxSource, RedisCache};
use netbox_dhcp::{cache, logging, netbox};

#[derive(Parser, Debug)]
#[command(name = "netbox-dhcp", version, about = "DHCP server answering from a NetBox inventory")]
struct Cli {
    /// Where to load the config from
    #[arg(long, default_value = "/etc/netbox-dhcp.conf.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("netbox-dhcp: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Configuration::read_from(&cli.config)?;

    let level = config.daemon.log.level()?;
    logging::init(level, config.daemon.log.path.as_deref())?;
    info!(config = %cli.config.display(), "configuration loaded");

    if config.daemon.daemonize {
        debug!("daemonize is set; running in the foreground regardless");
    }

    let redis_conn = cache::connect(&config.cache.redis).await?;
    let netbox_client = Arc::new(netbox::Client::new(&config.netbox));

    if !netbox_client.check_sites().await? {
        return Err("configured sites are missing or inactive in the inventory".into());
    }

    let resolver = Arc::new(CachingResolver::new(
        Arc::new(NetboxSource::new(netbox_client)),
        Arc::new(RedisCache::new(redis_conn)),
    ));

    let daemon = Daemon::start(&config, resolver).await;
    if daemon.listener_count() == 0 {
        return Err("no listener could be started".into());
    }

    info!("quit with CTRL+C");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    daemon.shutdown().await;
    info!("bye");
    Ok(())
}
