use crate::{NatsBroker, NatsConfig};
use core_config::{BrokerBackend, BrokerConfig};
use messaging::{Broker, ConnectionConfig, ConnectionManager, InMemoryBroker, MessagingError};
use std::sync::Arc;
use tracing::{info, warn};

/// Broker selected by `BROKER_BACKEND`.
pub fn broker_from_config(config: &BrokerConfig) -> Arc<dyn Broker> {
    match config.backend {
        BrokerBackend::Nats => {
            let nats = NatsConfig::new(config.url.clone()).with_connection_name(config.service_name.clone());
            Arc::new(NatsBroker::new(nats))
        }
        BrokerBackend::Memory => {
            warn!("Using the in-process broker, messages never leave this process");
            Arc::new(InMemoryBroker::new())
        }
    }
}

/// Connection manager with `queues` registered, already connecting in the background.
///
/// Returns once the manager is started; use
/// [`ConnectionManager::wait_until_connected`] to wait for the first channel.
pub async fn connect_from_config(
    config: &BrokerConfig,
    queues: &[&str],
) -> Result<ConnectionManager, MessagingError> {
    let broker = broker_from_config(config);
    let connection = ConnectionManager::new(broker, ConnectionConfig::fixed(config.reconnect_delay));
    for queue in queues {
        connection.register_queue(*queue).await?;
    }

    info!(
        backend = %config.backend,
        url = %config.url,
        queues = ?queues,
        "Connecting to broker"
    );
    connection.ensure_connected();
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_connects() {
        let config = BrokerConfig {
            backend: BrokerBackend::Memory,
            ..Default::default()
        };
        let connection = connect_from_config(&config, &["order_events"]).await.unwrap();
        connection.wait_until_connected().await.unwrap();
        assert_eq!(connection.system(), messaging::memory::SYSTEM);
        connection.close().await;
    }

    #[test]
    fn test_nats_backend_is_default() {
        let broker = broker_from_config(&BrokerConfig::default());
        assert_eq!(broker.system(), crate::SYSTEM);
    }
}
