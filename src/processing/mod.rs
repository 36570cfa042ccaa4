//! Processing state machine, background worker, and the file service facade.

mod pipeline;
mod service;
pub mod types;
mod worker;

pub use pipeline::{Pipeline, ProcessingSettings};
pub use service::{Collaborators, FileService};
pub use types::{
    PROCESSING_ERROR_KEY, ProcessingFailure, RecoveryReport, ServiceError, UploadError,
    UploadReceipt,
};
