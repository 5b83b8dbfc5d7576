pub mod core;
pub mod uploaders;
pub mod utils;
pub mod config;

pub use core::{
    Constraints,
    FileCandidate,
    ItemId,
    ManagerConfig,
    QueueStatus,
    Result,
    Selection,
    TransferError,
    Transport,
    UploadEvent,
    UploadItem,
    UploadManager,
    UploadManagerHandle,
    UploadSettings,
    UploadStatus,
};

pub use uploaders::HttpTransport;
