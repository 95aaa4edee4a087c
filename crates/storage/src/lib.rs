//! Storage layer for the Vellum engine
//!
//! This crate owns the per-collection lifecycle:
//!
//! - Datafile: preallocated files with a crc-checked header
//! - BarrierList: lifecycle tokens that keep lock-free readers safe while
//!   datafiles are recycled
//! - DocumentCollection: key→marker map plus the attached index set
//! - CursorRegistry: expiry-based cursor reaping
//! - CompactorLock: cleanup/compactor coordination with blocker expiry
//! - CleanupWorker: the periodic background thread driving all of the above
//! - Database: the handle owning collections, cursors and worker state

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod cleanup;
pub mod collection;
pub mod compactor;
pub mod cursor;
pub mod database;
pub mod datafile;

pub use barrier::{BarrierAction, BarrierGuard, BarrierList};
pub use cleanup::{CleanupConfig, CleanupWorker};
pub use collection::{CollectionKind, DocumentCollection};
pub use compactor::CompactorLock;
pub use cursor::CursorRegistry;
pub use database::{Database, DatabaseState};
pub use datafile::Datafile;
