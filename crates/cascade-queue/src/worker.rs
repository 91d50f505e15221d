use anyhow::{Context, Result};
use cascade_core::{Engine, WorkItem, WorkerConfig};
use metrics::{counter, histogram};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, error, info, warn};

/// Counters kept by a running worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    received: AtomicU64,
    malformed: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Lines that did not decode as a work item.
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.executed() + self.failed()
    }
}

/// Accepts connections from [`crate::RemoteBackend`]s and executes the work
/// items they send against its own [`Engine`].
pub struct WorkerServer {
    listener: TcpListener,
    engine: Arc<Engine>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl WorkerServer {
    pub async fn bind(addr: &str, engine: Arc<Engine>, config: WorkerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind worker on {addr}"))?;
        info!(addr = %listener.local_addr()?, "worker listening");
        Ok(Self {
            listener,
            engine,
            config,
            stats: Arc::new(WorkerStats::default()),
        })
    }

    /// Bind on the configured `listen_addr`.
    pub async fn from_config(engine: Arc<Engine>, config: WorkerConfig) -> Result<Self> {
        let addr = config.listen_addr.clone();
        Self::bind(&addr, engine, config).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Serve until the listener fails.
    pub async fn run(self) -> Result<()> {
        let (sender, receiver) = mpsc::channel(self.config.buffer_size.max(1));
        let mut processor = WorkProcessor::new(
            receiver,
            self.engine.clone(),
            self.stats.clone(),
            self.config.chunk_size,
            Duration::from_millis(self.config.chunk_timeout_ms),
        );
        tokio::spawn(async move { processor.run().await });

        loop {
            let (socket, peer) = self.listener.accept().await?;
            debug!(%peer, "worker connection accepted");
            tokio::spawn(read_connection(
                socket,
                peer,
                sender.clone(),
                self.stats.clone(),
            ));
        }
    }
}

async fn read_connection(
    socket: TcpStream,
    peer: SocketAddr,
    sender: Sender<WorkItem>,
    stats: Arc<WorkerStats>,
) {
    let mut lines = BufReader::new(socket).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<WorkItem>(&line) {
                Ok(item) => {
                    stats.received.fetch_add(1, Ordering::Relaxed);
                    counter!("cascade_work_items_received").increment(1);
                    if sender.send(item).await.is_err() {
                        warn!(%peer, "work processor stopped, dropping connection");
                        break;
                    }
                }
                Err(e) => {
                    stats.malformed.fetch_add(1, Ordering::Relaxed);
                    warn!(%peer, "discarding malformed work item: {}", e);
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, "worker connection failed: {}", e);
                break;
            }
        }
    }
    debug!(%peer, "worker connection closed");
}

/// Groups incoming work items and executes them on the blocking pool.
pub struct WorkProcessor {
    receiver: Option<Receiver<WorkItem>>,
    engine: Arc<Engine>,
    stats: Arc<WorkerStats>,
    chunk_size: usize,
    timeout: Duration,
}

impl WorkProcessor {
    pub fn new(
        receiver: Receiver<WorkItem>,
        engine: Arc<Engine>,
        stats: Arc<WorkerStats>,
        chunk_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            receiver: Some(receiver),
            engine,
            stats,
            chunk_size: chunk_size.max(1),
            timeout,
        }
    }

    pub async fn run(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            let stream = ReceiverStream::new(receiver);
            let batch_stream = stream.chunks_timeout(self.chunk_size, self.timeout);
            tokio::pin!(batch_stream);

            while let Some(batch) = batch_stream.next().await {
                let start_time = Instant::now();
                self.process_batch(batch).await;
                histogram!("cascade_batch_processing_time").record(start_time.elapsed());
            }
        }
    }

    async fn process_batch(&self, batch: Vec<WorkItem>) {
        debug!("Processing batch of size: {}", batch.len());
        let engine = self.engine.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            batch
                .into_iter()
                .map(|item| {
                    let result = engine.execute(&item);
                    (item, result)
                })
                .collect::<Vec<_>>()
        })
        .await;

        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                error!("work batch panicked: {}", e);
                return;
            }
        };
        for (item, result) in results {
            match result {
                Ok(()) => {
                    self.stats.executed.fetch_add(1, Ordering::Relaxed);
                    counter!("cascade_work_items_executed").increment(1);
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    counter!("cascade_work_items_failed").increment(1);
                    error!(
                        request = %item.request_id,
                        notifier = %item.notifier,
                        observable = %item.observable,
                        batch = item.batch_index,
                        "work item failed: {}",
                        e
                    );
                }
            }
        }
    }
}
