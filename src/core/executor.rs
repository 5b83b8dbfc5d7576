use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use super::errors::{Result, TransferError};
use super::types::{ItemId, Payload, RemoteResult, UploadItem, UploadSettings};

/// Terminal result of one transfer attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed(RemoteResult),
    /// Human readable reason, shown as-is
    Failed(String),
    Cancelled,
}

/// Everything a transport needs to send one item
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub id: ItemId,
    pub name: String,
    pub size_bytes: u64,
    pub media_type: Option<String>,
    pub payload: Payload,
    pub settings: Arc<UploadSettings>,
}

impl TransferRequest {
    pub fn from_item(item: &UploadItem, settings: Arc<UploadSettings>) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            size_bytes: item.size_bytes,
            media_type: item.media_type.clone(),
            payload: item.payload.clone(),
            settings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub id: ItemId,
    pub percent: u8,
}

/// Converts bytes sent into percent updates, forwarding only increases
#[derive(Debug, Clone)]
pub struct ProgressSink {
    id: ItemId,
    total_bytes: u64,
    last_percent: Arc<AtomicU8>,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ProgressSink {
    pub fn new(id: ItemId, total_bytes: u64, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            id,
            total_bytes,
            last_percent: Arc::new(AtomicU8::new(0)),
            tx: Some(tx),
        }
    }

    /// A sink that drops every update
    pub fn disabled(id: ItemId) -> Self {
        Self {
            id,
            total_bytes: 0,
            last_percent: Arc::new(AtomicU8::new(0)),
            tx: None,
        }
    }

    pub fn report(&self, bytes_sent: u64) {
        let Some(tx) = &self.tx else {
            return;
        };

        let percent = if self.total_bytes == 0 {
            100
        } else {
            (bytes_sent.saturating_mul(100) / self.total_bytes).min(100) as u8
        };

        if self.last_percent.fetch_max(percent, Ordering::Relaxed) < percent {
            let _ = tx.send(ProgressUpdate { id: self.id, percent });
        }
    }
}

/// The remote end of a transfer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one payload. Any failure, remote or local, is an `Err`.
    async fn send(&self, request: &TransferRequest, progress: ProgressSink) -> Result<RemoteResult>;
}

/// Runs one transfer and folds every way it can end into a `TransferOutcome`
#[derive(Clone)]
pub struct TransferExecutor {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
}

impl TransferExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// A signalled token always wins over an error: a cancelled attempt never
    /// also reports a network failure.
    pub async fn execute(
        &self,
        request: TransferRequest,
        token: CancellationToken,
        progress: ProgressSink,
    ) -> TransferOutcome {
        if token.is_cancelled() {
            return TransferOutcome::Cancelled;
        }

        let send = self.transport.send(&request, progress);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(id = %request.id, "Transfer cancelled in flight");
                return TransferOutcome::Cancelled;
            }
            result = with_timeout(self.timeout, send) => result,
        };

        match result {
            Ok(remote) => TransferOutcome::Completed(remote),
            Err(_) if token.is_cancelled() => TransferOutcome::Cancelled,
            Err(TransferError::Cancelled) => TransferOutcome::Cancelled,
            Err(err) => {
                warn!(id = %request.id, name = %request.name, error = %err, "Transfer failed");
                TransferOutcome::Failed(err.to_string())
            }
        }
    }
}

async fn with_timeout<T, F>(timeout: Option<Duration>, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| TransferError::Timeout(limit))?,
        None => future.await,
    }
}
