//! Core types for the Vellum storage engine
//!
//! This crate holds everything the other layers share:
//! - Error: the unified error type with a stable numeric code per variant
//! - Tick/id newtypes and the monotonic tick source
//! - ShapedDocument: a document payload bound to a registered shape
//! - Shaper: the content-addressed shape registry with its (sid, pid)
//!   accessor cache
//! - Document: the in-memory document marker (key, revision, payload,
//!   optional edge header)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod shaper;
pub mod types;

pub use document::{Document, DocumentRef, EdgeHeaderData};
pub use error::{Error, Result};
pub use shaper::{PathId, ShapeAccessor, ShapeId, ShapedDocument, Shaper};
pub use types::{IndexId, Revision, ServerId, Tick, TickSource, TransactionId};
