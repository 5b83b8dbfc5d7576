mod errors;
mod executor;
mod manager;
mod manager_worker;
mod queue;
mod registry;
mod scheduler;
mod status;
mod types;
mod validator;

pub use errors::{ConfigError, Result, TransferError, ValidationError};
pub use executor::{
    ProgressSink, ProgressUpdate, TransferExecutor, TransferOutcome, TransferRequest, Transport,
};
pub use manager::{FilteredEventReceiver, ManagerConfig, UploadManager, UploadManagerHandle};
pub use queue::{Transition, UploadQueue};
pub use registry::CancellationRegistry;
pub use scheduler::ChunkScheduler;
pub use status::QueueStatus;
pub use types::{
    EnqueueReport, FailureKind, FileCandidate, FileKind, ItemId, ManagerCommand, Payload,
    RejectedFile, Rejection, RemoteResult, Selection, UploadEvent, UploadItem, UploadSettings,
    UploadStatus, file_extension,
};
pub use validator::{Constraints, DEFAULT_MAX_SIZE_BYTES, TypeRule, validate};
