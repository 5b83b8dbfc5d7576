use std::path::{Path, PathBuf};
use std::sync::Arc;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use super::errors::{Result, TransferError, ValidationError};
use super::status::QueueStatus;

/// Unique id of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Queued, waiting for a chunk slot
    Pending,
    /// Owned by an in-flight executor
    Uploading,
    Completed,
    Error,
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Transitions reachable without removing the item.
    ///
    /// `Pending -> Cancelled` covers cancelling an item before dispatch; every
    /// other edge into a terminal state goes through `Uploading`.
    pub fn can_transition(from: Self, to: Self) -> bool {
        use UploadStatus::*;

        matches!(
            (from, to),
            (Pending, Uploading)
                | (Pending, Cancelled)
                | (Uploading, Completed)
                | (Uploading, Error)
                | (Uploading, Cancelled)
                | (Error, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an `Error` item's failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Rejected before entering the queue; never dispatched, never retryable
    Validation,
    /// Remote or transport failure; retryable
    Transfer,
}

/// Coarse file category, derived from the media type or the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Code,
    Other,
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg" | "tif" | "tiff" | "ico" | "heic" => Self::Image,
            "mp4" | "mov" | "avi" | "mkv" | "webm" | "m4v" | "wmv" => Self::Video,
            "mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac" | "opus" => Self::Audio,
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "odt" | "ods" | "txt" | "md" | "csv" | "rtf" => Self::Document,
            "zip" | "tar" | "gz" | "tgz" | "bz2" | "xz" | "7z" | "rar" => Self::Archive,
            "rs" | "py" | "js" | "ts" | "tsx" | "jsx" | "go" | "java" | "c" | "h" | "cpp" | "hpp" | "json" | "yaml" | "yml" | "toml" | "html" | "css" | "sh" => Self::Code,
            _ => Self::Other,
        }
    }

    pub fn from_media_type(media_type: &str) -> Self {
        let media_type = media_type.to_ascii_lowercase();
        let (top, sub) = media_type.split_once('/').unwrap_or((media_type.as_str(), ""));

        match top {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "text" if matches!(sub, "plain" | "markdown" | "csv" | "rtf") => Self::Document,
            "text" => Self::Code,
            "application" => match sub {
                "pdf" | "msword" | "rtf" => Self::Document,
                s if s.starts_with("vnd.openxmlformats") || s.starts_with("vnd.ms-") || s.starts_with("vnd.oasis") => Self::Document,
                "zip" | "gzip" | "x-tar" | "x-bzip2" | "x-xz" | "x-7z-compressed" | "vnd.rar" => Self::Archive,
                "json" | "javascript" | "xml" | "toml" | "x-sh" | "yaml" => Self::Code,
                _ => Self::Other,
            },
            _ => Self::Other,
        }
    }

    pub fn from_name(name: &str) -> Self {
        file_extension(name)
            .map(|ext| Self::from_extension(&ext))
            .unwrap_or(Self::Other)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            "archive" => Some(Self::Archive),
            "code" => Some(Self::Code),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Lowercased extension of a file name, without the dot
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Handle to the bytes of an item. The model only ever clones the handle.
#[derive(Debug, Clone)]
pub enum Payload {
    File(PathBuf),
    Memory(Bytes),
}

/// A file offered for upload, before validation
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub name: String,
    pub size_bytes: u64,
    pub media_type: Option<String>,
    pub payload: Payload,
}

impl FileCandidate {
    pub fn new(name: impl Into<String>, size_bytes: u64, payload: Payload) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            media_type: None,
            payload,
        }
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::new(name, data.len() as u64, Payload::Memory(data))
    }

    /// Stat a file on disk. Fails if the path is not a regular file.
    pub async fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            )));
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(String::from)
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(name, metadata.len(), Payload::File(path)))
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }

    pub fn kind(&self) -> FileKind {
        match self.media_type.as_deref() {
            Some(media_type) => match FileKind::from_media_type(media_type) {
                FileKind::Other => FileKind::from_name(&self.name),
                kind => kind,
            },
            None => FileKind::from_name(&self.name),
        }
    }
}

/// A file the selection source refused, with its reason
#[derive(Debug, Clone)]
pub struct RejectedFile {
    pub name: String,
    pub size_bytes: u64,
    pub reason: String,
}

/// Output of the external file picker
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub accepted: Vec<FileCandidate>,
    pub rejected: Vec<RejectedFile>,
}

/// Where the remote stored a completed upload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteResult {
    #[serde(alias = "fileId", alias = "file_id")]
    pub id: String,
    #[serde(alias = "path", alias = "url")]
    pub location: String,
}

/// One queued file and its lifecycle state
#[derive(Debug, Clone, Serialize)]
pub struct UploadItem {
    pub id: ItemId,
    pub name: String,
    pub size_bytes: u64,
    pub media_type: Option<String>,
    pub kind: FileKind,
    #[serde(skip)]
    pub payload: Payload,
    pub status: UploadStatus,
    pub progress_percent: u8,
    /// Set iff `status == Error`
    pub error_message: Option<String>,
    /// Set iff `status == Error`
    pub failure: Option<FailureKind>,
    /// Set iff `status == Completed`
    pub remote_result: Option<RemoteResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadItem {
    pub(crate) fn pending(candidate: FileCandidate) -> Self {
        let kind = candidate.kind();
        Self {
            id: ItemId::new(),
            name: candidate.name,
            size_bytes: candidate.size_bytes,
            media_type: candidate.media_type,
            kind,
            payload: candidate.payload,
            status: UploadStatus::Pending,
            progress_percent: 0,
            error_message: None,
            failure: None,
            remote_result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn rejected(candidate: FileCandidate, error: &ValidationError) -> Self {
        let mut item = Self::pending(candidate);
        item.status = UploadStatus::Error;
        item.error_message = Some(error.to_string());
        item.failure = Some(FailureKind::Validation);
        item.finished_at = Some(item.created_at);
        item
    }

    pub fn is_retryable(&self) -> bool {
        self.status == UploadStatus::Error && self.failure == Some(FailureKind::Transfer)
    }
}

/// Per-run upload options. Captured once when a run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadSettings {
    pub target_path: String,
    pub create_folder: bool,
    pub folder_name: String,
    pub enable_versioning: bool,
    pub overwrite_existing: bool,
    pub notify_users: bool,
}

/// Wire form of the settings, sent as the `settings` form field
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsJson<'a> {
    create_folder: bool,
    folder_name: &'a str,
    enable_versioning: bool,
    overwrite_existing: bool,
    notify_users: bool,
}

impl UploadSettings {
    pub fn new(target_path: impl Into<String>) -> Self {
        Self {
            target_path: target_path.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.create_folder {
            let folder = self.folder_name.trim();
            if folder.is_empty() {
                return Err(TransferError::InvalidSettings("folder name is required when creating a folder".to_string()));
            }
            if folder.contains('/') || folder.contains('\\') {
                return Err(TransferError::InvalidSettings(format!("folder name {:?} must not contain path separators", folder)));
            }
        }

        Ok(())
    }

    /// Remote directory the payloads end up in, for display. The endpoint
    /// receives `target_path` and the folder settings separately.
    pub fn destination(&self) -> String {
        if self.create_folder && !self.folder_name.trim().is_empty() {
            let base = self.target_path.trim_end_matches('/');
            format!("{}/{}", base, self.folder_name.trim())
        } else {
            self.target_path.clone()
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let json = serde_json::to_string(&SettingsJson {
            create_folder: self.create_folder,
            folder_name: &self.folder_name,
            enable_versioning: self.enable_versioning,
            overwrite_existing: self.overwrite_existing,
            notify_users: self.notify_users,
        })?;

        Ok(json)
    }
}

/// A refused candidate, recorded as an `Error` item
#[derive(Debug, Clone)]
pub struct Rejection {
    pub id: ItemId,
    pub name: String,
    pub error: ValidationError,
}

/// Result of an enqueue: accepted ids in submission order, plus the rejections
#[derive(Debug, Clone, Default)]
pub struct EnqueueReport {
    pub accepted: Vec<ItemId>,
    pub rejected: Vec<Rejection>,
}

/// Notifications for observers. Never fed back into the queue.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    StateChanged {
        id: ItemId,
        from: UploadStatus,
        to: UploadStatus,
    },

    Removed {
        id: ItemId,
    },

    /// Fired after every queue mutation
    Progress {
        items: Arc<[UploadItem]>,
        status: QueueStatus,
    },

    /// Fired once every dispatched item of a run is terminal
    BatchComplete {
        items: Arc<[UploadItem]>,
    },
}

/// Commands handled by the manager worker
pub enum ManagerCommand {
    Enqueue {
        candidates: Vec<FileCandidate>,
        reply: oneshot::Sender<EnqueueReport>,
    },

    Ingest {
        selection: Selection,
        reply: oneshot::Sender<EnqueueReport>,
    },

    Start {
        settings: UploadSettings,
        reply: oneshot::Sender<Result<()>>,
    },

    Cancel {
        id: ItemId,
        reply: oneshot::Sender<Result<()>>,
    },

    CancelAll {
        reply: oneshot::Sender<()>,
    },

    Retry {
        id: ItemId,
        reply: oneshot::Sender<Result<()>>,
    },

    Remove {
        id: ItemId,
        reply: oneshot::Sender<Result<UploadItem>>,
    },

    Clear {
        reply: oneshot::Sender<()>,
    },

    GetItem {
        id: ItemId,
        reply: oneshot::Sender<Option<UploadItem>>,
    },

    GetAllItems {
        reply: oneshot::Sender<Vec<UploadItem>>,
    },

    GetStatus {
        reply: oneshot::Sender<QueueStatus>,
    },
}

#[allow(dead_code)]
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadItem>();
        assert_send::<UploadEvent>();
        assert_send::<ManagerCommand>();
    }
};
