use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use super::errors::{Result, TransferError};
use super::executor::{TransferExecutor, Transport};
use super::manager_worker::UploadManagerWorker;
use super::status::QueueStatus;
use super::types::{
    EnqueueReport, FileCandidate, ItemId, ManagerCommand, Selection, UploadEvent, UploadItem,
    UploadSettings,
};
use super::validator::Constraints;

/// Tuning for one manager instance
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Chunk size, i.e. the most items ever uploading at once
    pub max_concurrent: usize,
    pub constraints: Constraints,
    /// Per-transfer limit, reported as a failure when it fires
    pub timeout: Option<Duration>,
    pub event_capacity: usize,
    pub command_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            constraints: Constraints::default(),
            timeout: None,
            event_capacity: 256,
            command_capacity: 100,
        }
    }
}

#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
}

/// Manager plus its worker task
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Stops the worker once every other manager clone is gone.
    /// Transfers still in flight are cancelled.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.manager);
        self.worker_handle
            .await
            .map_err(|err| TransferError::Internal(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    pub fn new(config: ManagerConfig, transport: Arc<dyn Transport>) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let executor = TransferExecutor::new(transport).with_timeout(config.timeout);
        let worker_handle = tokio::spawn(UploadManagerWorker::run(
            config,
            executor,
            command_rx,
            event_tx.clone(),
        ));

        let manager = Self {
            command_tx,
            event_tx,
        };

        UploadManagerHandle {
            manager,
            worker_handle,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| TransferError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| TransferError::ManagerShutdown)
    }

    /// Validate and queue files. Refusals come back in the report and stay visible as `Error` items.
    pub async fn enqueue(&self, candidates: Vec<FileCandidate>) -> Result<EnqueueReport> {
        self.request(|reply| ManagerCommand::Enqueue { candidates, reply }).await
    }

    /// Queue a file picker's output, keeping its rejections as `Error` items
    pub async fn ingest(&self, selection: Selection) -> Result<EnqueueReport> {
        self.request(|reply| ManagerCommand::Ingest { selection, reply }).await
    }

    /// Start uploading every pending item with this settings snapshot
    pub async fn start(&self, settings: UploadSettings) -> Result<()> {
        self.request(|reply| ManagerCommand::Start { settings, reply }).await?
    }

    /// Cancel a pending or uploading item. No-op for terminal items.
    pub async fn cancel(&self, id: ItemId) -> Result<()> {
        self.request(|reply| ManagerCommand::Cancel { id, reply }).await?
    }

    pub async fn cancel_all(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::CancelAll { reply }).await
    }

    /// Put a failed item back to pending
    pub async fn retry(&self, id: ItemId) -> Result<()> {
        self.request(|reply| ManagerCommand::Retry { id, reply }).await?
    }

    /// Remove an item, cancelling it first if it is uploading
    pub async fn remove(&self, id: ItemId) -> Result<UploadItem> {
        self.request(|reply| ManagerCommand::Remove { id, reply }).await?
    }

    /// Cancel everything in flight and empty the queue
    pub async fn clear(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::Clear { reply }).await
    }

    pub async fn get_item(&self, id: ItemId) -> Result<Option<UploadItem>> {
        self.request(|reply| ManagerCommand::GetItem { id, reply }).await
    }

    pub async fn items(&self) -> Result<Vec<UploadItem>> {
        self.request(|reply| ManagerCommand::GetAllItems { reply }).await
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        self.request(|reply| ManagerCommand::GetStatus { reply }).await
    }

    /// Starts a run and waits for its `BatchComplete`
    pub async fn run_batch(&self, settings: UploadSettings) -> Result<Vec<UploadItem>> {
        let mut events = self.subscribe_events();
        self.start(settings).await?;

        loop {
            match events.recv().await {
                Ok(UploadEvent::BatchComplete { items }) => return Ok(items.to_vec()),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(TransferError::ManagerShutdown),
            }
        }
    }

    /// Subscribe to events.
    ///
    /// A receiver that falls behind by more than the event capacity skips
    /// ahead (`Lagged`); every receiver gets its own copy of each event.
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.event_tx.subscribe(),
            filter,
        }
    }
}

pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<UploadEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    pub async fn recv(&mut self) -> Result<UploadEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}
