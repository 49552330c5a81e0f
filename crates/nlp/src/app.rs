use crate::forwarder::NlpForwarder;
use crate::request::{ExtractRequest, NlpProcessor};
use crate::{Error, Monitorable};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dossier_bootable::{Bootable, BootableError};
use dossier_bus::panic_guard::catch_panic;
use dossier_bus::{DataBus, Message, ShutdownMessage};
use dossier_queue::BlockingQueue;
use dossier_queue_memory::MemoryQueue;
use futures::future::join_all;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Local queue size used when none is configured.
pub const DEFAULT_QUEUE_SIZE: usize = 10_000;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Options for [`NlpApp`].
#[derive(Clone, Debug)]
pub struct NlpAppOptions {
    /// Number of concurrent consumers.
    pub parallelism: usize,

    /// Capacity of the local queue.
    pub queue_size: usize,

    /// How long shutdown waits for the local queue to drain and consumers to exit.
    pub shutdown_timeout: Duration,
}

impl Default for NlpAppOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            queue_size: DEFAULT_QUEUE_SIZE,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// NLP worker pool.
///
/// A [`NlpForwarder`] feeds a bounded local queue from the NLP channel and
/// `parallelism` consumers hand each request to the processor. When the
/// forwarder's subscription ends the pool waits for the local queue to drain,
/// sends one poison pill per consumer and waits (bounded) for them to exit.
pub struct NlpApp<B, P>
where
    B: DataBus,
    P: NlpProcessor,
{
    name: String,
    forwarder: NlpForwarder<B>,
    processor: Arc<P>,
    options: NlpAppOptions,
    completed: Arc<AtomicU64>,
    started: AtomicBool,
    finished: watch::Sender<bool>,
}

impl<B, P> NlpApp<B, P>
where
    B: DataBus,
    P: NlpProcessor,
{
    /// Creates a pool reading the NLP channel of `bus`.
    pub fn new(bus: B, processor: P, options: NlpAppOptions) -> Self {
        let queue = MemoryQueue::bounded(options.queue_size.max(1));
        let (finished, _) = watch::channel(false);

        Self {
            name: "nlp-app".to_string(),
            forwarder: NlpForwarder::new(bus, queue),
            processor: Arc::new(processor),
            options,
            completed: Arc::new(AtomicU64::new(0)),
            started: AtomicBool::new(false),
            finished,
        }
    }

    /// The forwarder feeding the pool.
    pub const fn forwarder(&self) -> &NlpForwarder<B> {
        &self.forwarder
    }

    /// Number of requests the consumers have handed to the processor.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn spawn_consumers(&self) -> Vec<JoinHandle<()>> {
        (0..self.options.parallelism.max(1))
            .map(|index| {
                let queue = self.forwarder.queue().clone();
                let processor = self.processor.clone();
                let completed = self.completed.clone();
                tokio::spawn(consume(index, queue, processor, completed))
            })
            .collect()
    }
}

async fn consume<P>(
    index: usize,
    queue: MemoryQueue<Message>,
    processor: Arc<P>,
    completed: Arc<AtomicU64>,
) where
    P: NlpProcessor,
{
    debug!(consumer = index, "consumer started");

    while let Some(message) = queue.take(None).await {
        if message.is_shutdown() {
            break;
        }

        let request = match ExtractRequest::try_from(&message) {
            Ok(request) => request,
            Err(e) => {
                warn!(consumer = index, error = %e, "skipping malformed request");
                continue;
            }
        };

        let doc_id = request.doc_id.clone();
        match catch_panic(processor.process(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(consumer = index, doc_id, error = %e, "extraction failed"),
            Err(_) => error!(consumer = index, doc_id, "extraction panicked"),
        }
        completed.fetch_add(1, Ordering::SeqCst);
    }

    debug!(consumer = index, "consumer stopped");
}

async fn drain_and_stop(
    queue: &MemoryQueue<Message>,
    consumers: Vec<JoinHandle<()>>,
) {
    while !queue.is_empty() {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }

    for _ in 0..consumers.len() {
        while !queue.try_push(ShutdownMessage.into()) {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    join_all(consumers).await;
}

#[async_trait]
impl<B, P> Bootable for NlpApp<B, P>
where
    B: DataBus,
    P: NlpProcessor,
{
    fn bootable_name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), BootableError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Box::new(Error::AlreadyStarted(self.name.clone())));
        }

        info!(parallelism = self.options.parallelism, "starting NLP pool");
        let consumers = self.spawn_consumers();

        let (registered, on_registered) = oneshot::channel();
        let forwarder = self.forwarder.clone();
        let finished = self.finished.clone();
        let timeout = self.options.shutdown_timeout;

        tokio::spawn(async move {
            let result = forwarder
                .run_with_callback(Box::new(move || {
                    let _ = registered.send(());
                }))
                .await;
            match result {
                Ok(received) => info!(received, "forwarder stopped"),
                Err(e) => error!(error = %e, "forwarder failed"),
            }

            let aborts: Vec<_> = consumers.iter().map(JoinHandle::abort_handle).collect();
            if tokio::time::timeout(timeout, drain_and_stop(forwarder.queue(), consumers))
                .await
                .is_err()
            {
                warn!(?timeout, "consumers did not stop in time, aborting them");
                for abort in aborts {
                    abort.abort();
                }
            }

            finished.send_replace(true);
        });

        on_registered
            .await
            .map_err(|_| Error::Subscribe("forwarder ended before registering".to_string()))?;

        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BootableError> {
        info!("shutting down NLP pool");
        self.forwarder.stop().await?;
        self.wait().await;

        Ok(())
    }

    async fn wait(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }

        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|finished| *finished).await;
    }
}

impl<B, P> Monitorable for NlpApp<B, P>
where
    B: DataBus,
    P: NlpProcessor,
{
    fn progress_rate(&self) -> f64 {
        self.forwarder.progress_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcessorError;

    use dossier_bus::{Channel, Field, MessageType};
    use dossier_bus_memory::MemoryDataBus;

    #[derive(Clone, Default)]
    struct Recording {
        seen: Arc<std::sync::Mutex<Vec<String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl NlpProcessor for Recording {
        async fn process(&self, request: ExtractRequest) -> Result<(), ProcessorError> {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(request.doc_id);
            Ok(())
        }
    }

    fn extract(id: &str) -> Message {
        Message::new(MessageType::ExtractNlp)
            .add(Field::DocId, id)
            .add(Field::RootId, "routing")
            .add(Field::IndexName, "local-datashare")
    }

    async fn run(
        parallelism: usize,
        delay: Duration,
    ) -> (MemoryDataBus, NlpApp<MemoryDataBus, Recording>, Recording) {
        let bus = MemoryDataBus::new();
        let processor = Recording {
            delay,
            ..Recording::default()
        };
        let app = NlpApp::new(
            bus.clone(),
            processor.clone(),
            NlpAppOptions {
                parallelism,
                ..NlpAppOptions::default()
            },
        );
        app.start().await.unwrap();
        (bus, app, processor)
    }

    async fn wait(app: &NlpApp<MemoryDataBus, Recording>) {
        tokio::time::timeout(Duration::from_secs(5), app.wait())
            .await
            .expect("pool did not stop");
    }

    #[tokio::test]
    async fn test_single_consumer() {
        let (bus, app, processor) = run(1, Duration::ZERO).await;

        bus.publish(Channel::Nlp, extract("doc_id")).await.unwrap();
        bus.publish(Channel::Nlp, ShutdownMessage.into())
            .await
            .unwrap();
        wait(&app).await;

        assert_eq!(*processor.seen.lock().unwrap(), vec!["doc_id"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_consumers() {
        let (bus, app, processor) = run(2, Duration::ZERO).await;

        bus.publish(Channel::Nlp, extract("doc_id1")).await.unwrap();
        bus.publish(Channel::Nlp, extract("doc_id2")).await.unwrap();
        bus.publish(Channel::Nlp, ShutdownMessage.into())
            .await
            .unwrap();
        wait(&app).await;

        let mut seen = processor.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["doc_id1", "doc_id2"]);
        assert_eq!(app.completed(), 2);
    }

    #[tokio::test]
    async fn test_waits_for_queue_to_drain() {
        let (bus, app, processor) = run(1, Duration::from_millis(50)).await;

        for i in 1..4 {
            bus.publish(Channel::Nlp, extract(&format!("doc_id{i}")))
                .await
                .unwrap();
        }
        bus.publish(Channel::Nlp, ShutdownMessage.into())
            .await
            .unwrap();
        wait(&app).await;

        assert_eq!(processor.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_progress_rate() {
        let (bus, app, _) = run(1, Duration::ZERO).await;

        assert!((app.progress_rate() - -1.0).abs() < f64::EPSILON);
        bus.publish(
            Channel::Nlp,
            Message::new(MessageType::InitMonitoring).add(Field::Value, "4"),
        )
        .await
        .unwrap();
        bus.publish(Channel::Nlp, extract("doc_id1")).await.unwrap();
        bus.publish(Channel::Nlp, extract("doc_id2")).await.unwrap();
        bus.publish(Channel::Nlp, ShutdownMessage.into())
            .await
            .unwrap();
        wait(&app).await;

        assert!((app.progress_rate() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_progress_rate_with_two_inits() {
        let (bus, app, _) = run(1, Duration::ZERO).await;

        for value in ["4", "6"] {
            bus.publish(
                Channel::Nlp,
                Message::new(MessageType::InitMonitoring).add(Field::Value, value),
            )
            .await
            .unwrap();
        }
        bus.publish(Channel::Nlp, extract("doc_id")).await.unwrap();
        bus.publish(Channel::Nlp, ShutdownMessage.into())
            .await
            .unwrap();
        wait(&app).await;

        assert!((app.progress_rate() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_shutdown_through_bootable() {
        let (bus, app, processor) = run(3, Duration::ZERO).await;

        bus.publish(Channel::Nlp, extract("doc_id")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), app.shutdown())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*processor.seen.lock().unwrap(), vec!["doc_id"]);
        assert!(app.start().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_before_start_returns() {
        let app = NlpApp::new(
            MemoryDataBus::new(),
            Recording::default(),
            NlpAppOptions::default(),
        );

        app.wait().await;
    }
}
