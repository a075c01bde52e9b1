//! NATS test infrastructure

use async_nats::Client;
use async_nats::jetstream;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::nats::Nats;

pub use futures::StreamExt;

/// NATS server with JetStream, removed when dropped.
///
/// ```no_run
/// use test_utils::TestNats;
///
/// # async fn example() {
/// let nats = TestNats::new().await;
/// let url = nats.connection_string();
/// let depth = nats.stream_depth("ORDER_EVENTS").await;
/// # }
/// ```
pub struct TestNats {
    #[allow(dead_code)]
    container: ContainerAsync<Nats>,
    client: Client,
    connection_string: String,
}

impl TestNats {
    pub async fn new() -> Self {
        let nats_image = Nats::default().with_tag("latest").with_cmd(["-js"]);

        let container = nats_image
            .start()
            .await
            .expect("Failed to start NATS container");

        let host_port = container
            .get_host_port_ipv4(4222)
            .await
            .expect("Failed to get NATS port");

        let connection_string = format!("nats://127.0.0.1:{host_port}");

        let client = async_nats::connect(&connection_string)
            .await
            .expect("Failed to connect to NATS");

        tracing::info!(port = host_port, "Test NATS ready with JetStream");

        Self {
            container,
            client,
            connection_string,
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn jetstream(&self) -> jetstream::Context {
        jetstream::new(self.client.clone())
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Messages currently stored in `stream`, 0 when it doesn't exist
    pub async fn stream_depth(&self, stream: &str) -> u64 {
        match self.jetstream().get_stream(stream).await {
            Ok(mut stream) => stream
                .info()
                .await
                .map(|info| info.state.messages)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Messages delivered to `consumer` and not yet acknowledged
    pub async fn pending_acks(&self, stream: &str, consumer: &str) -> usize {
        let Ok(stream) = self.jetstream().get_stream(stream).await else {
            return 0;
        };
        match stream
            .get_consumer::<jetstream::consumer::pull::Config>(consumer)
            .await
        {
            Ok(mut consumer) => consumer
                .info()
                .await
                .map(|info| info.num_ack_pending)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }
}

impl Drop for TestNats {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test NATS container");
    }
}
