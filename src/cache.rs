//! Connection setup for the shared key/value store.

use redis::aio::MultiplexedConnection;

use crate::config::RedisConfig;

/// Open a multiplexed connection from the configured parameters. The
/// connection is cheap to clone; every resolver call clones it rather than
/// holding a lock.
pub async fn connect(config: &RedisConfig) -> redis::RedisResult<MultiplexedConnection> {
    let info = redis::ConnectionInfo {
        addr: redis::ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: redis::RedisConnectionInfo {
            db: config.database,
            username: None,
            password: config.password.clone().filter(|p| !p.is_empty()),
            ..Default::default()
        },
    };

    let client = redis::Client::open(info)?;
    client.get_multiplexed_tokio_connection().await
}
