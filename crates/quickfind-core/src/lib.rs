/// Quickfind Core — NTFS ingestion, change-journal following, and the
/// in-memory name index that powers the query engine.
///
/// This crate has zero UI dependencies; the binary crate wires it up as a
/// CLI-driven service.
///
/// # Modules
///
/// - [`volume`] — Raw volume I/O: open by drive letter, read at a byte offset.
/// - [`ntfs`] — Boot sector, MFT record parsing, and the MFT iterator.
/// - [`usn`] — Change-journal polling and coalescing.
/// - [`index`] — The packed name buffer / record array / lookup triple.
/// - [`query`] — SIMD substring scan, filters, and path reconstruction.
/// - [`service`] — Worker loop and IPC connection loop.
/// - [`config`] — Index and service configuration.
/// - [`platform`] — Elevation checks.
/// - [`error`] — Per-subsystem error taxonomy.
pub mod config;
pub mod error;
pub mod index;
pub mod ntfs;
pub mod platform;
pub mod query;
pub mod service;
pub mod usn;
pub mod volume;
