use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use changefeed_config::shared::BrokerConfig;
use metrics::counter;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::error::ProducerResult;
use crate::metrics::{CHANGEFEED_EVENT_DELIVERY_FAILURES_TOTAL, TOPIC_LABEL};

/// Upper bound of the wait for room in a full producer queue.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause before retrying to enqueue into a full producer queue.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// Destination of the events read from the feed.
pub trait EventPublisher {
    /// Hands `payload` over for publication as one message.
    ///
    /// Returns once the message is queued. Delivery completes in the background, failures are
    /// reported by [`EventPublisher::failed_deliveries`].
    fn publish(&self, payload: &str) -> impl Future<Output = ProducerResult<()>> + Send;

    /// Waits until every message handed to the publisher was delivered or failed.
    fn flush(&self, timeout: Duration) -> impl Future<Output = ProducerResult<()>> + Send;

    /// Number of queued messages the broker did not acknowledge so far.
    fn failed_deliveries(&self) -> u64;
}

/// Publishes events to a Kafka topic, without key.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    failed_deliveries: Arc<AtomicU64>,
}

impl KafkaPublisher {
    pub fn new(config: &BrokerConfig) -> ProducerResult<Self> {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &config.bootstrap_servers);
        for (key, value) in &config.client_properties {
            client_config.set(key, value);
        }
        let producer: FutureProducer = client_config.create()?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic = %config.topic,
            "created kafka producer"
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            failed_deliveries: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Waits for the delivery report of one message off the read path.
    fn watch_delivery(&self, delivery: DeliveryFuture) {
        let failed_deliveries = Arc::clone(&self.failed_deliveries);
        let topic = self.topic.clone();

        tokio::spawn(async move {
            let err = match delivery.await {
                Ok(Ok(_)) => return,
                Ok(Err((err, _))) => err.to_string(),
                Err(_) => "delivery report dropped by the producer".to_owned(),
            };

            failed_deliveries.fetch_add(1, Ordering::Relaxed);
            counter!(CHANGEFEED_EVENT_DELIVERY_FAILURES_TOTAL, TOPIC_LABEL => topic).increment(1);
            warn!(error = %err, "event was not delivered to kafka");
        });
    }
}

impl EventPublisher for KafkaPublisher {
    async fn publish(&self, payload: &str) -> ProducerResult<()> {
        let deadline = Instant::now() + ENQUEUE_TIMEOUT;

        let delivery = loop {
            let err = match self
                .producer
                .send_result(FutureRecord::<(), str>::to(&self.topic).payload(payload))
            {
                Ok(delivery) => break delivery,
                Err((err, _)) => err,
            };

            let queue_full =
                matches!(err, KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull));
            if !queue_full || Instant::now() >= deadline {
                return Err(err.into());
            }

            sleep(QUEUE_FULL_BACKOFF).await;
        };

        self.watch_delivery(delivery);

        Ok(())
    }

    async fn flush(&self, timeout: Duration) -> ProducerResult<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(std::io::Error::other)??;

        Ok(())
    }

    fn failed_deliveries(&self) -> u64 {
        self.failed_deliveries.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub mod memory {
    use tokio::sync::Mutex;

    use super::*;

    /// Keeps published payloads in memory.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryPublisher {
        payloads: Arc<Mutex<Vec<String>>>,
    }

    impl MemoryPublisher {
        pub async fn payloads(&self) -> Vec<String> {
            self.payloads.lock().await.clone()
        }
    }

    impl EventPublisher for MemoryPublisher {
        async fn publish(&self, payload: &str) -> ProducerResult<()> {
            self.payloads.lock().await.push(payload.to_owned());
            Ok(())
        }

        async fn flush(&self, _timeout: Duration) -> ProducerResult<()> {
            Ok(())
        }

        fn failed_deliveries(&self) -> u64 {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use changefeed_config::shared::AutoOffsetReset;

    use super::*;

    /// A broker address nothing listens on, with deliveries timing out quickly.
    fn unreachable_broker() -> BrokerConfig {
        BrokerConfig {
            bootstrap_servers: "127.0.0.1:1".to_owned(),
            topic: "wikimedia.recentchange".to_owned(),
            group_id: "changefeed-producer".to_owned(),
            auto_offset_reset: AutoOffsetReset::Latest,
            client_properties: BTreeMap::from([(
                "message.timeout.ms".to_owned(),
                "300".to_owned(),
            )]),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publishing_does_not_wait_for_the_delivery_report() {
        let publisher = KafkaPublisher::new(&unreachable_broker()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), publisher.publish("{\"n\":1}"))
            .await
            .expect("publishing waited for the broker")
            .unwrap();

        publisher.flush(Duration::from_secs(10)).await.unwrap();

        let started = std::time::Instant::now();
        while publisher.failed_deliveries() == 0 {
            assert!(
                started.elapsed() < Duration::from_secs(5),
                "the failed delivery was never counted"
            );
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(publisher.failed_deliveries(), 1);
    }
}
