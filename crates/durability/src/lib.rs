//! Durability layer
//!
//! The write-ahead log is a sequence of sealed append-only logfiles. This
//! crate holds the logfile abstraction: a preallocated datafile plus two
//! small state machines, one for sealing and one for collection into the
//! collections' datafiles. The state transitions themselves never block;
//! callers serialize at a higher layer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod logfile;

pub use logfile::{CollectionStatus, Logfile, SealStatus};
