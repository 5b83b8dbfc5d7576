use bytes::Bytes;
use chrono::Utc;
use indexmap::IndexMap;
use tracing::debug;
use super::errors::{Result, TransferError, ValidationError};
use super::executor::TransferOutcome;
use super::status::QueueStatus;
use super::types::{
    EnqueueReport, FailureKind, FileCandidate, ItemId, Payload, Rejection, Selection, UploadItem,
    UploadStatus,
};
use super::validator::{validate, Constraints};

/// A status change applied to one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub id: ItemId,
    pub from: UploadStatus,
    pub to: UploadStatus,
}

/// Ordered item store and the item state machine.
///
/// Every mutation addresses a single record by id; nothing here rewrites the
/// collection from a snapshot.
#[derive(Debug, Default)]
pub struct UploadQueue {
    items: IndexMap<ItemId, UploadItem>,
    constraints: Constraints,
}

impl UploadQueue {
    pub fn new(constraints: Constraints) -> Self {
        Self {
            items: IndexMap::new(),
            constraints,
        }
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Validates and queues `candidates` in order.
    ///
    /// Refused candidates are kept as `Error` items so the caller can show why.
    pub fn enqueue(&mut self, candidates: Vec<FileCandidate>) -> EnqueueReport {
        let mut report = EnqueueReport::default();

        for candidate in candidates {
            match self.admit(&candidate) {
                Ok(()) => {
                    let item = UploadItem::pending(candidate);
                    debug!(id = %item.id, name = %item.name, size = item.size_bytes, "Item queued");
                    report.accepted.push(item.id);
                    self.items.insert(item.id, item);
                }
                Err(error) => {
                    debug!(name = %candidate.name, %error, "Item rejected");
                    report.rejected.push(self.insert_rejected(candidate, error));
                }
            }
        }

        report
    }

    /// Queues the accepted half of a selection and records the refused half as-is
    pub fn ingest(&mut self, selection: Selection) -> EnqueueReport {
        let mut report = self.enqueue(selection.accepted);

        for rejected in selection.rejected {
            let candidate = FileCandidate::new(rejected.name, rejected.size_bytes, Payload::Memory(Bytes::new()));
            report
                .rejected
                .push(self.insert_rejected(candidate, ValidationError::Rejected(rejected.reason)));
        }

        report
    }

    fn admit(&self, candidate: &FileCandidate) -> Result<(), ValidationError> {
        validate(candidate, &self.constraints)?;

        let mut occupied = 0;
        for item in self.items.values().filter(|item| occupies_slot(item)) {
            if item.name == candidate.name && item.size_bytes == candidate.size_bytes {
                return Err(ValidationError::Duplicate {
                    name: candidate.name.clone(),
                    size: candidate.size_bytes,
                });
            }
            occupied += 1;
        }

        if let Some(max) = self.constraints.max_files {
            if occupied >= max {
                return Err(ValidationError::TooManyFiles { max });
            }
        }

        Ok(())
    }

    fn insert_rejected(&mut self, candidate: FileCandidate, error: ValidationError) -> Rejection {
        let item = UploadItem::rejected(candidate, &error);
        let rejection = Rejection {
            id: item.id,
            name: item.name.clone(),
            error,
        };
        self.items.insert(item.id, item);
        rejection
    }

    /// `pending -> uploading`
    pub fn begin(&mut self, id: &ItemId) -> Result<Transition> {
        let item = self.get_mut(id)?;
        if item.status != UploadStatus::Pending {
            return Err(TransferError::invalid_transition(*id, item.status, "dispatch"));
        }

        item.status = UploadStatus::Uploading;
        item.progress_percent = 0;
        item.started_at = Some(Utc::now());

        Ok(Transition {
            id: *id,
            from: UploadStatus::Pending,
            to: UploadStatus::Uploading,
        })
    }

    /// Applies an executor outcome.
    ///
    /// Returns `None` when the item is gone or no longer `Uploading`, e.g. it was
    /// removed or cancelled while the transfer was unwinding.
    pub fn finish(&mut self, id: &ItemId, outcome: TransferOutcome) -> Option<Transition> {
        let item = self.items.get_mut(id)?;
        if item.status != UploadStatus::Uploading {
            return None;
        }

        let to = match outcome {
            TransferOutcome::Completed(result) => {
                item.progress_percent = 100;
                item.remote_result = Some(result);
                UploadStatus::Completed
            }
            TransferOutcome::Failed(message) => {
                item.error_message = Some(message);
                item.failure = Some(FailureKind::Transfer);
                UploadStatus::Error
            }
            TransferOutcome::Cancelled => UploadStatus::Cancelled,
        };

        item.status = to;
        item.finished_at = Some(Utc::now());

        Some(Transition {
            id: *id,
            from: UploadStatus::Uploading,
            to,
        })
    }

    /// Cancels a pending or uploading item. Terminal items are left alone.
    pub fn cancel(&mut self, id: &ItemId) -> Result<Option<Transition>> {
        let item = self.get_mut(id)?;
        Ok(cancel_item(item))
    }

    /// Cancels every pending or uploading item
    pub fn cancel_all(&mut self) -> Vec<Transition> {
        self.items.values_mut().filter_map(cancel_item).collect()
    }

    /// `error -> pending`, only for transfer failures
    pub fn retry(&mut self, id: &ItemId) -> Result<Transition> {
        let item = self.get_mut(id)?;
        if item.status != UploadStatus::Error {
            return Err(TransferError::invalid_transition(*id, item.status, "retry"));
        }
        if item.failure != Some(FailureKind::Transfer) {
            return Err(TransferError::NotRetryable(*id));
        }

        item.status = UploadStatus::Pending;
        item.progress_percent = 0;
        item.error_message = None;
        item.failure = None;
        item.started_at = None;
        item.finished_at = None;

        Ok(Transition {
            id: *id,
            from: UploadStatus::Error,
            to: UploadStatus::Pending,
        })
    }

    /// Drops the item. Cancelling a live transfer is up to the caller.
    pub fn remove(&mut self, id: &ItemId) -> Result<UploadItem> {
        self.items.shift_remove(id).ok_or(TransferError::NotFound(*id))
    }

    pub fn clear(&mut self) -> Vec<UploadItem> {
        self.items.drain(..).map(|(_, item)| item).collect()
    }

    /// Raises the progress of an uploading item. Never lowers it.
    pub fn set_progress(&mut self, id: &ItemId, percent: u8) -> bool {
        match self.items.get_mut(id) {
            Some(item) if item.status == UploadStatus::Uploading => {
                let percent = percent.min(100);
                if percent > item.progress_percent {
                    item.progress_percent = percent;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &ItemId) -> Option<&UploadItem> {
        self.items.get(id)
    }

    fn get_mut(&mut self, id: &ItemId) -> Result<&mut UploadItem> {
        self.items.get_mut(id).ok_or(TransferError::NotFound(*id))
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn is_pending(&self, id: &ItemId) -> bool {
        self.get(id).is_some_and(|item| item.status == UploadStatus::Pending)
    }

    /// Pending ids in queue order
    pub fn pending_ids(&self) -> Vec<ItemId> {
        self.items
            .values()
            .filter(|item| item.status == UploadStatus::Pending)
            .map(|item| item.id)
            .collect()
    }

    pub fn items(&self) -> impl Iterator<Item = &UploadItem> {
        self.items.values()
    }

    pub fn snapshot(&self) -> Vec<UploadItem> {
        self.items.values().cloned().collect()
    }

    pub fn status(&self, running: bool) -> QueueStatus {
        QueueStatus::compute(self.items.values(), running)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Items that count for dedup and capacity. Cancelled items and rejections free their slot.
fn occupies_slot(item: &UploadItem) -> bool {
    item.status != UploadStatus::Cancelled && item.failure != Some(FailureKind::Validation)
}

fn cancel_item(item: &mut UploadItem) -> Option<Transition> {
    let from = item.status;
    if !matches!(from, UploadStatus::Pending | UploadStatus::Uploading) {
        return None;
    }

    item.status = UploadStatus::Cancelled;
    item.finished_at = Some(Utc::now());

    Some(Transition {
        id: item.id,
        from,
        to: UploadStatus::Cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RejectedFile, RemoteResult};

    fn file(name: &str, size: usize) -> FileCandidate {
        FileCandidate::from_bytes(name.to_string(), vec![0u8; size])
    }

    fn remote(id: &str) -> RemoteResult {
        RemoteResult {
            id: id.to_string(),
            location: format!("/files/{}", id),
        }
    }

    #[test]
    fn test_enqueue_keeps_order() {
        let mut queue = UploadQueue::default();
        let report = queue.enqueue(vec![file("a", 1), file("b", 2), file("c", 3)]);

        assert_eq!(report.accepted.len(), 3);
        assert!(report.rejected.is_empty());
        assert_eq!(queue.pending_ids(), report.accepted);
        assert!(queue.items().all(|item| item.status == UploadStatus::Pending));
    }

    #[test]
    fn test_enqueue_reports_validation_failures() {
        let mut queue = UploadQueue::new(Constraints::new(10));
        let report = queue.enqueue(vec![file("ok.txt", 10), file("big.txt", 11)]);

        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected.len(), 1);

        let rejected = queue.get(&report.rejected[0].id).unwrap();
        assert_eq!(rejected.status, UploadStatus::Error);
        assert_eq!(rejected.failure, Some(FailureKind::Validation));
        assert!(rejected.error_message.is_some());
        assert!(rejected.remote_result.is_none());
        assert_eq!(queue.pending_ids(), report.accepted);
    }

    #[test]
    fn test_enqueue_deduplicates() {
        let mut queue = UploadQueue::default();
        queue.enqueue(vec![file("a.txt", 5)]);

        let report = queue.enqueue(vec![file("a.txt", 5), file("a.txt", 6), file("b.txt", 5), file("b.txt", 5)]);
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.rejected.len(), 2);
        assert!(report
            .rejected
            .iter()
            .all(|r| matches!(r.error, ValidationError::Duplicate { .. })));
    }

    #[test]
    fn test_cancelled_item_can_be_requeued() {
        let mut queue = UploadQueue::default();
        let report = queue.enqueue(vec![file("a.txt", 5)]);
        queue.cancel(&report.accepted[0]).unwrap();

        let report = queue.enqueue(vec![file("a.txt", 5)]);
        assert_eq!(report.accepted.len(), 1);
        assert_ne!(report.accepted[0], queue.items().next().unwrap().id);
    }

    #[test]
    fn test_enqueue_capacity() {
        let mut queue = UploadQueue::new(Constraints::default().with_max_files(2));
        let report = queue.enqueue(vec![file("a", 1), file("b", 1), file("c", 1)]);

        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.rejected[0].error, ValidationError::TooManyFiles { max: 2 });
    }

    #[test]
    fn test_ingest_records_source_rejections() {
        let mut queue = UploadQueue::default();
        let report = queue.ingest(Selection {
            accepted: vec![file("a.png", 3)],
            rejected: vec![RejectedFile {
                name: "b.exe".to_string(),
                size_bytes: 42,
                reason: "File type not accepted".to_string(),
            }],
        });

        assert_eq!(report.accepted.len(), 1);
        let rejected_id = report.rejected[0].id;
        let rejected = queue.get(&rejected_id).unwrap();
        assert_eq!(rejected.size_bytes, 42);
        assert_eq!(rejected.error_message.as_deref(), Some("File type not accepted"));
        assert!(matches!(queue.retry(&rejected_id), Err(TransferError::NotRetryable(_))));
        assert_eq!(queue.pending_ids().len(), 1);
    }

    #[test]
    fn test_lifecycle_completed() {
        let mut queue = UploadQueue::default();
        let id = queue.enqueue(vec![file("a", 1)]).accepted[0];

        queue.begin(&id).unwrap();
        assert!(queue.set_progress(&id, 40));
        assert!(!queue.set_progress(&id, 30));
        assert_eq!(queue.get(&id).unwrap().progress_percent, 40);

        let transition = queue.finish(&id, TransferOutcome::Completed(remote("r1"))).unwrap();
        assert_eq!(transition.to, UploadStatus::Completed);

        let item = queue.get(&id).unwrap();
        assert_eq!(item.progress_percent, 100);
        assert_eq!(item.remote_result, Some(remote("r1")));
        assert!(item.error_message.is_none());

        // terminal: no further progress, no second outcome
        assert!(!queue.set_progress(&id, 100));
        assert!(queue.finish(&id, TransferOutcome::Failed("late".to_string())).is_none());
    }

    #[test]
    fn test_begin_requires_pending() {
        let mut queue = UploadQueue::default();
        let id = queue.enqueue(vec![file("a", 1)]).accepted[0];

        queue.begin(&id).unwrap();
        assert!(matches!(
            queue.begin(&id),
            Err(TransferError::InvalidTransition { status: UploadStatus::Uploading, .. })
        ));
        assert!(matches!(queue.begin(&ItemId::new()), Err(TransferError::NotFound(_))));
    }

    #[test]
    fn test_finish_ignores_non_uploading() {
        let mut queue = UploadQueue::default();
        let id = queue.enqueue(vec![file("a", 1)]).accepted[0];

        // a pending item can never jump to error
        assert!(queue.finish(&id, TransferOutcome::Failed("boom".to_string())).is_none());
        assert_eq!(queue.get(&id).unwrap().status, UploadStatus::Pending);
    }

    #[test]
    fn test_retry() {
        let mut queue = UploadQueue::default();
        let id = queue.enqueue(vec![file("a", 1)]).accepted[0];

        assert!(matches!(queue.retry(&id), Err(TransferError::InvalidTransition { .. })));

        queue.begin(&id).unwrap();
        queue.set_progress(&id, 70);
        queue.finish(&id, TransferOutcome::Failed("Server error: status code 500".to_string()));
        assert_eq!(queue.get(&id).unwrap().error_message.as_deref(), Some("Server error: status code 500"));

        queue.retry(&id).unwrap();
        let item = queue.get(&id).unwrap();
        assert_eq!(item.status, UploadStatus::Pending);
        assert_eq!(item.progress_percent, 0);
        assert!(item.error_message.is_none());
        assert!(item.failure.is_none());
        assert_eq!(queue.pending_ids(), vec![id]);
    }

    #[test]
    fn test_cancel() {
        let mut queue = UploadQueue::default();
        let ids = queue.enqueue(vec![file("a", 1), file("b", 1), file("c", 1)]).accepted;

        queue.begin(&ids[0]).unwrap();
        queue.begin(&ids[1]).unwrap();
        queue.finish(&ids[1], TransferOutcome::Completed(remote("b")));

        // uploading -> cancelled
        let t = queue.cancel(&ids[0]).unwrap().unwrap();
        assert_eq!((t.from, t.to), (UploadStatus::Uploading, UploadStatus::Cancelled));
        // the executor's late report is dropped
        assert!(queue.finish(&ids[0], TransferOutcome::Failed("aborted".to_string())).is_none());
        assert_eq!(queue.get(&ids[0]).unwrap().status, UploadStatus::Cancelled);
        assert!(queue.get(&ids[0]).unwrap().error_message.is_none());

        // terminal is a no-op
        assert!(queue.cancel(&ids[1]).unwrap().is_none());
        assert_eq!(queue.get(&ids[1]).unwrap().status, UploadStatus::Completed);

        // pending -> cancelled, and out of the pending set
        queue.cancel(&ids[2]).unwrap();
        assert!(queue.pending_ids().is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let mut queue = UploadQueue::default();
        let ids = queue.enqueue(vec![file("a", 1), file("b", 1), file("c", 1)]).accepted;
        queue.begin(&ids[0]).unwrap();
        queue.begin(&ids[1]).unwrap();
        queue.finish(&ids[1], TransferOutcome::Failed("nope".to_string()));

        let transitions = queue.cancel_all();
        assert_eq!(transitions.len(), 2);

        let status = queue.status(false);
        assert_eq!(status.uploading, 0);
        assert_eq!(status.pending, 0);
        assert_eq!(status.cancelled, 2);
        assert_eq!(status.error, 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut queue = UploadQueue::default();
        let ids = queue.enqueue(vec![file("a", 1), file("b", 1)]).accepted;

        let removed = queue.remove(&ids[0]).unwrap();
        assert_eq!(removed.id, ids[0]);
        assert!(!queue.contains(&ids[0]));
        assert!(matches!(queue.remove(&ids[0]), Err(TransferError::NotFound(_))));

        // a removed id stays gone
        assert!(queue.finish(&ids[0], TransferOutcome::Cancelled).is_none());
        assert!(!queue.contains(&ids[0]));

        assert_eq!(queue.clear().len(), 1);
        assert!(queue.is_empty());
    }
}
