use serde::Serialize;
use super::types::{UploadItem, UploadStatus};

/// Per-status counts, derived from the queue on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub completed: usize,
    pub error: usize,
    pub cancelled: usize,
    pub running: bool,
    pub can_start: bool,
}

impl QueueStatus {
    pub fn compute<'a, I>(items: I, running: bool) -> Self
    where
        I: IntoIterator<Item = &'a UploadItem>,
    {
        let mut status = Self {
            running,
            ..Default::default()
        };

        for item in items {
            status.total += 1;
            match item.status {
                UploadStatus::Pending => status.pending += 1,
                UploadStatus::Uploading => status.uploading += 1,
                UploadStatus::Completed => status.completed += 1,
                UploadStatus::Error => status.error += 1,
                UploadStatus::Cancelled => status.cancelled += 1,
            }
        }

        status.can_start = status.pending > 0 && !running;
        status
    }

    pub fn count(&self, status: UploadStatus) -> usize {
        match status {
            UploadStatus::Pending => self.pending,
            UploadStatus::Uploading => self.uploading,
            UploadStatus::Completed => self.completed,
            UploadStatus::Error => self.error,
            UploadStatus::Cancelled => self.cancelled,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.uploading == 0
    }
}
