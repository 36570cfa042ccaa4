#![deny(missing_docs)]

//! Core library for the Docvault document ingestion pipeline.

/// Audio metadata probes.
pub mod audio;
/// Environment-driven configuration management.
pub mod config;
/// Format-specific text extraction.
pub mod extraction;
/// Upload validation and classification.
pub mod intake;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Processing lifecycle and the file service.
pub mod processing;
/// Orphaned blob cleanup.
pub mod reconcile;
/// File records and their persistence contract.
pub mod records;
/// Blob storage and content identity.
pub mod storage;
