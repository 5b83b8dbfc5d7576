use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use super::errors::{Result, TransferError};
use super::executor::{ProgressSink, ProgressUpdate, TransferExecutor, TransferOutcome, TransferRequest};
use super::manager::ManagerConfig;
use super::queue::{Transition, UploadQueue};
use super::registry::CancellationRegistry;
use super::scheduler::ChunkScheduler;
use super::status::QueueStatus;
use super::types::{ItemId, ManagerCommand, UploadEvent, UploadItem, UploadSettings, UploadStatus};

/// What an executor reports back, addressed by id
struct Completion {
    id: ItemId,
    outcome: TransferOutcome,
}

/// Sole owner of the queue. Commands, completions and progress are handled one
/// at a time, so every read-modify-write on an item is atomic.
pub(crate) struct UploadManagerWorker {
    queue: UploadQueue,
    registry: CancellationRegistry,
    scheduler: ChunkScheduler,
    executor: TransferExecutor,
    settings: Arc<UploadSettings>,

    event_tx: broadcast::Sender<UploadEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
    progress_rx: mpsc::UnboundedReceiver<ProgressUpdate>,
}

impl UploadManagerWorker {
    pub(crate) async fn run(
        config: ManagerConfig,
        executor: TransferExecutor,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
    ) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let mut worker = Self {
            queue: UploadQueue::new(config.constraints),
            registry: CancellationRegistry::new(),
            scheduler: ChunkScheduler::new(config.max_concurrent),
            executor,
            settings: Arc::new(UploadSettings::default()),
            event_tx,
            completion_tx,
            completion_rx,
            progress_tx,
            progress_rx,
        };

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => worker.handle_command(command),
                    None => break,
                },
                Some(completion) = worker.completion_rx.recv() => {
                    worker.handle_completion(completion);
                }
                Some(update) = worker.progress_rx.recv() => {
                    worker.handle_progress(update);
                }
            }
        }

        let cancelled = worker.registry.cancel_all();
        debug!(cancelled, "Upload manager stopped");
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Enqueue { candidates, reply } => {
                let report = self.queue.enqueue(candidates);
                self.publish();
                let _ = reply.send(report);
            }
            ManagerCommand::Ingest { selection, reply } => {
                let report = self.queue.ingest(selection);
                self.publish();
                let _ = reply.send(report);
            }
            ManagerCommand::Start { settings, reply } => {
                let _ = reply.send(self.start(settings));
            }
            ManagerCommand::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            ManagerCommand::CancelAll { reply } => {
                self.cancel_all();
                let _ = reply.send(());
            }
            ManagerCommand::Retry { id, reply } => {
                let result = self.queue.retry(&id).map(|transition| {
                    self.emit_transition(transition);
                    self.publish();
                });
                let _ = reply.send(result);
            }
            ManagerCommand::Remove { id, reply } => {
                let _ = reply.send(self.remove(id));
            }
            ManagerCommand::Clear { reply } => {
                self.clear();
                let _ = reply.send(());
            }
            ManagerCommand::GetItem { id, reply } => {
                let _ = reply.send(self.queue.get(&id).cloned());
            }
            ManagerCommand::GetAllItems { reply } => {
                let _ = reply.send(self.queue.snapshot());
            }
            ManagerCommand::GetStatus { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn start(&mut self, settings: UploadSettings) -> Result<()> {
        if self.scheduler.is_running() {
            return Err(TransferError::AlreadyRunning);
        }
        settings.validate()?;

        let pending = self.queue.pending_ids();
        if pending.is_empty() {
            return Err(TransferError::NothingToStart);
        }

        let items = pending.len();
        let chunks = self.scheduler.plan(pending);
        info!(items, chunks = ?chunks, destination = %settings.destination(), "Upload run started");

        self.settings = Arc::new(settings);
        self.advance();
        Ok(())
    }

    /// Releases chunks while the barrier allows, and closes the run when nothing is left
    fn advance(&mut self) {
        while let Some(chunk) = self.scheduler.next_chunk(|id| self.queue.is_pending(id)) {
            info!(chunk = self.scheduler.dispatched_chunks(), size = chunk.len(), "Dispatching chunk");

            for id in chunk {
                if let Err(err) = self.dispatch(id) {
                    error!(%id, error = %err, "Failed to dispatch item");
                    self.scheduler.withdraw(&id);
                }
            }

            if self.scheduler.in_flight() > 0 {
                break;
            }
        }

        if self.scheduler.try_finish() {
            self.finish_run();
        }
    }

    fn dispatch(&mut self, id: ItemId) -> Result<()> {
        let item = self.queue.get(&id).ok_or(TransferError::NotFound(id))?;
        let request = TransferRequest::from_item(item, self.settings.clone());
        let progress = ProgressSink::new(id, item.size_bytes, self.progress_tx.clone());

        let token = self.registry.issue(id)?;
        let transition = match self.queue.begin(&id) {
            Ok(transition) => transition,
            Err(err) => {
                self.registry.release(&id);
                return Err(err);
            }
        };
        self.emit_transition(transition);

        let executor = self.executor.clone();
        let completion_tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let attempt = tokio::spawn(async move { executor.execute(request, token, progress).await });
            let outcome = match attempt.await {
                Ok(outcome) => outcome,
                Err(err) => TransferOutcome::Failed(format!("Transfer task panicked: {}", err)),
            };

            let _ = completion_tx.send(Completion { id, outcome });
        });

        self.publish();
        Ok(())
    }

    fn handle_completion(&mut self, completion: Completion) {
        let id = completion.id;
        self.registry.release(&id);

        // An attempt sends its progress before its completion, so draining here
        // leaves nothing of it behind to leak into a later attempt.
        while let Ok(update) = self.progress_rx.try_recv() {
            self.queue.set_progress(&update.id, update.percent);
        }

        match self.queue.finish(&id, completion.outcome) {
            Some(transition) => {
                self.emit_transition(transition);
                self.publish();
            }
            None => warn!(%id, "Dropping outcome for item no longer uploading"),
        }

        if self.scheduler.settle(&id) {
            debug!(chunk = self.scheduler.dispatched_chunks(), "Chunk settled");
        }
        self.advance();
    }

    fn handle_progress(&mut self, update: ProgressUpdate) {
        if self.queue.set_progress(&update.id, update.percent) {
            self.publish();
        }
    }

    fn cancel(&mut self, id: ItemId) -> Result<()> {
        if let Some(transition) = self.queue.cancel(&id)? {
            if transition.from == UploadStatus::Uploading {
                self.registry.cancel(&id);
            }
            self.emit_transition(transition);
            self.publish();
        }

        Ok(())
    }

    fn cancel_all(&mut self) {
        let transitions = self.queue.cancel_all();
        let signalled = self.registry.cancel_all();
        self.scheduler.abandon();
        info!(items = transitions.len(), signalled, "Cancelled all uploads");

        for transition in transitions {
            self.emit_transition(transition);
        }
        self.publish();
        self.advance();
    }

    fn remove(&mut self, id: ItemId) -> Result<UploadItem> {
        if self.queue.get(&id).is_some_and(|item| item.status == UploadStatus::Uploading) {
            self.registry.cancel(&id);
        }

        let item = self.queue.remove(&id)?;
        let _ = self.event_tx.send(UploadEvent::Removed { id });
        self.publish();
        Ok(item)
    }

    fn clear(&mut self) {
        self.registry.cancel_all();
        self.scheduler.abandon();

        for item in self.queue.clear() {
            let _ = self.event_tx.send(UploadEvent::Removed { id: item.id });
        }
        self.publish();
        self.advance();
    }

    fn finish_run(&mut self) {
        let status = self.status();
        info!(
            completed = status.completed,
            failed = status.error,
            cancelled = status.cancelled,
            "Upload run finished"
        );

        let items: Arc<[UploadItem]> = self.queue.snapshot().into();
        let _ = self.event_tx.send(UploadEvent::BatchComplete { items });
        self.publish();
    }

    fn status(&self) -> QueueStatus {
        self.queue.status(self.scheduler.is_running())
    }

    fn emit_transition(&self, transition: Transition) {
        debug!(id = %transition.id, from = %transition.from, to = %transition.to, "Item state changed");
        let _ = self.event_tx.send(UploadEvent::StateChanged {
            id: transition.id,
            from: transition.from,
            to: transition.to,
        });
    }

    /// Sends the current queue to observers
    fn publish(&self) {
        if self.event_tx.receiver_count() == 0 {
            return;
        }

        let items: Arc<[UploadItem]> = self.queue.snapshot().into();
        let _ = self.event_tx.send(UploadEvent::Progress {
            items,
            status: self.status(),
        });
    }
}
