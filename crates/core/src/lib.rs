//! `quire-core` - document model for the chunked job pipeline.
//!
//! This crate contains **pure domain** pieces (no store, no runtime): job and
//! owner identity, bibliographic metadata, units of work and the chunker that
//! produces them.

pub mod book;
pub mod chunker;
pub mod error;
pub mod id;
pub mod identity;
pub mod unit;

pub use book::BookInfo;
pub use chunker::{CharCounter, UnitCounter, WordCounter, split_into_units};
pub use error::{DomainError, DomainResult};
pub use id::{JobId, OwnerId, RunId};
pub use identity::{canonicalize, derive_job_id};
pub use unit::{Unit, UnitState};
