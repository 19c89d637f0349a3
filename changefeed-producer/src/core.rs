use std::future::Future;
use std::time::Duration;

use changefeed_config::shared::{FeedConfig, ProducerConfig};
use metrics::counter;
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::error::{ProducerError, ProducerResult};
use crate::metrics::{
    CHANGEFEED_EVENTS_PUBLISHED_TOTAL, CHANGEFEED_FEED_RECONNECTS_TOTAL, TOPIC_LABEL,
};
use crate::publisher::{EventPublisher, KafkaPublisher};
use crate::sse::SseDecoder;

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Upper bound of the final flush of the producer.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Counters of a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub published: u64,
    /// Events the publisher refused to queue.
    pub failed: u64,
    /// Queued events the broker did not acknowledge.
    pub failed_deliveries: u64,
    pub connections: u64,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Elapsed,
    Interrupted,
}

/// Runs a producer session with the Kafka publisher, stopping early on ctrl+c.
pub async fn start_producer_with_config(config: ProducerConfig) -> ProducerResult<()> {
    info!(
        url = %config.feed.url,
        topic = %config.broker.topic,
        session_duration_secs = config.feed.session_duration_secs,
        "starting producer session"
    );

    let publisher = KafkaPublisher::new(&config.broker)?;
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("sigint (ctrl+c) received, ending the session"),
            Err(err) => {
                warn!(error = %err, "failed to listen for sigint, the session runs to its end");
                std::future::pending::<()>().await;
            }
        }
    };

    let session = FeedSession::new(config.feed, config.broker.topic)?;
    let (end, stats) = session.run(&publisher, interrupt).await?;

    info!(
        ?end,
        published = stats.published,
        failed = stats.failed,
        failed_deliveries = stats.failed_deliveries,
        connections = stats.connections,
        "producer session finished"
    );

    Ok(())
}

/// Reads the feed and republishes every event for a bounded duration.
///
/// When the stream ends or fails before the session is over it reconnects after the configured
/// delay, or the one requested by the server, resuming from the last event id.
pub struct FeedSession {
    client: Client,
    config: FeedConfig,
    topic: String,
    decoder: SseDecoder,
    stats: SessionStats,
}

impl FeedSession {
    pub fn new(config: FeedConfig, topic: String) -> ProducerResult<Self> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            config,
            topic,
            decoder: SseDecoder::new(),
            stats: SessionStats::default(),
        })
    }

    /// Runs until the session duration elapsed or `interrupt` completes, then flushes
    /// `publisher`.
    pub async fn run<P, F>(
        mut self,
        publisher: &P,
        interrupt: F,
    ) -> ProducerResult<(SessionEnd, SessionStats)>
    where
        P: EventPublisher,
        F: Future<Output = ()>,
    {
        let deadline = Instant::now() + Duration::from_secs(self.config.session_duration_secs);
        tokio::pin!(interrupt);

        let end = loop {
            tokio::select! {
                biased;

                _ = &mut interrupt => break SessionEnd::Interrupted,
                _ = sleep_until(deadline) => break SessionEnd::Elapsed,
                result = self.stream(publisher) => match result {
                    Ok(()) => info!("feed stream ended"),
                    Err(err) => warn!(error = %err, "feed stream failed"),
                },
            }

            self.decoder.reset_connection();
            let delay = self
                .decoder
                .retry()
                .unwrap_or(Duration::from_millis(self.config.reconnect_delay_ms));
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting to the feed");

            tokio::select! {
                biased;

                _ = &mut interrupt => break SessionEnd::Interrupted,
                _ = sleep_until(deadline) => break SessionEnd::Elapsed,
                _ = sleep(delay) => {
                    counter!(CHANGEFEED_FEED_RECONNECTS_TOTAL).increment(1);
                }
            }
        };

        publisher.flush(FLUSH_TIMEOUT).await?;
        self.stats.failed_deliveries = publisher.failed_deliveries();

        Ok((end, self.stats))
    }

    /// Reads one connection to its end, publishing every decoded event.
    async fn stream<P: EventPublisher>(&mut self, publisher: &P) -> ProducerResult<()> {
        let mut request = self
            .client
            .get(&self.config.url)
            .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(last_event_id) = self.decoder.last_event_id() {
            request = request.header(LAST_EVENT_ID_HEADER, last_event_id);
        }

        let mut response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProducerError::FeedStatus(response.status()));
        }

        self.stats.connections += 1;
        info!(url = %self.config.url, "connected to the feed");

        while let Some(chunk) = response.chunk().await? {
            for event in self.decoder.push(&chunk) {
                match publisher.publish(&event.data).await {
                    Ok(()) => {
                        self.stats.published += 1;
                        counter!(CHANGEFEED_EVENTS_PUBLISHED_TOTAL, TOPIC_LABEL => self.topic.clone())
                            .increment(1);
                    }
                    Err(err) => {
                        self.stats.failed += 1;
                        warn!(error = %err, id = ?event.id, "failed to publish an event");
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::publisher::memory::MemoryPublisher;

    fn feed_config(server: &MockServer, session_duration_secs: u64) -> FeedConfig {
        FeedConfig {
            url: format!("{}/v2/stream/recentchange", server.uri()),
            session_duration_secs,
            reconnect_delay_ms: 10,
        }
    }

    fn event_stream(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", EVENT_STREAM_CONTENT_TYPE)
            .set_body_string(body)
    }

    #[tokio::test]
    async fn events_are_published_and_the_stream_resumes_from_the_last_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/stream/recentchange"))
            .and(header(LAST_EVENT_ID_HEADER, "2"))
            .respond_with(event_stream("id: 3\ndata: {\"n\":3}\n\n"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/stream/recentchange"))
            .respond_with(event_stream(
                ": hello\n\nid: 1\ndata: {\"n\":1}\n\nid: 2\ndata: {\"n\":2}\n\ndata: {\"partial\"",
            ))
            .up_to_n_times(1)
            .with_priority(2)
            .mount(&server)
            .await;

        let publisher = MemoryPublisher::default();
        let session = FeedSession::new(feed_config(&server, 1), "recentchange".to_owned()).unwrap();
        let (end, stats) = session
            .run(&publisher, std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::Elapsed);
        assert_eq!(
            publisher.payloads().await,
            vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]
        );
        assert_eq!(stats.published, 3);
        assert_eq!(stats.connections, 2);
    }

    #[tokio::test]
    async fn interrupt_ends_the_session_early() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let publisher = MemoryPublisher::default();
        let session =
            FeedSession::new(feed_config(&server, 3600), "recentchange".to_owned()).unwrap();
        let started = std::time::Instant::now();
        let (end, stats) = session
            .run(&publisher, sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::Interrupted);
        assert_eq!(stats.connections, 0);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(publisher.payloads().await.is_empty());
    }
}
