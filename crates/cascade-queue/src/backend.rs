use anyhow::Result;
use cascade_core::{BackendKind, DeliveryBackend, DispatchConfig, DispatchQueue, LocalBackend};
use std::sync::Arc;

use crate::RemoteBackend;

/// Pick the delivery backend named by the dispatch settings.
pub async fn backend_from_config(config: &DispatchConfig) -> Result<Arc<dyn DeliveryBackend>> {
    let backend: Arc<dyn DeliveryBackend> = match config.backend {
        BackendKind::Local => Arc::new(LocalBackend),
        BackendKind::Remote => Arc::new(RemoteBackend::connect(&config.remote_addr).await?),
    };
    Ok(backend)
}

pub async fn dispatch_queue(config: &DispatchConfig) -> Result<DispatchQueue> {
    Ok(DispatchQueue::new(backend_from_config(config).await?))
}
