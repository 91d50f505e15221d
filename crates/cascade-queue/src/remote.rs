use anyhow::{Context, Result};
use cascade_core::{CascadeError, DeliveryBackend, DeliveryError, WorkItem};
use metrics::counter;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

/// Delivery backend that forwards work items to a [`crate::WorkerServer`].
///
/// Items are written as newline-delimited JSON by a background task, so
/// `submit` never blocks the mutating thread. Once the connection fails every
/// later submission is refused with [`DeliveryError::Unavailable`].
pub struct RemoteBackend {
    addr: String,
    sender: UnboundedSender<String>,
}

impl RemoteBackend {
    /// Connect to a worker. Must be called within a tokio runtime.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to worker at {addr}"))?;
        stream.set_nodelay(true)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(forward(stream, receiver, addr.to_string()));
        info!(addr, "connected to worker");
        Ok(Self {
            addr: addr.to_string(),
            sender,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

async fn forward(stream: TcpStream, mut receiver: UnboundedReceiver<String>, addr: String) {
    let mut writer = BufWriter::new(stream);
    while let Some(line) = receiver.recv().await {
        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!(addr = %addr, "worker connection failed: {}", e);
            break;
        }
    }
    debug!(addr = %addr, "forwarder stopped");
}

impl DeliveryBackend for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }

    fn submit(
        &self,
        item: &WorkItem,
        _inline: &mut dyn FnMut(&WorkItem) -> cascade_core::Result<()>,
    ) -> cascade_core::Result<()> {
        let mut line = serde_json::to_string(item)
            .map_err(|e| CascadeError::from(DeliveryError::Encode(e.to_string())))?;
        line.push('\n');
        self.sender.send(line).map_err(|_| {
            DeliveryError::Unavailable(format!("connection to {} is closed", self.addr))
        })?;
        counter!("cascade_work_items_sent").increment(1);
        debug!(
            request = %item.request_id,
            batch = item.batch_index,
            ids = item.ids.len(),
            "work item forwarded"
        );
        Ok(())
    }
}
