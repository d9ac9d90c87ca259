//! # hookbuf core
//!
//! Core types, errors, and traits shared by every hookbuf crate.
//!
//! hookbuf buffers small text payloads posted to a webhook and replays them,
//! strictly in order, against an owner's document store. Producer (the HTTP
//! ingestion endpoint) and consumer (the apply agent) never talk to each
//! other directly; they meet at a per-owner queue.
//!
//! ## Key Types
//!
//! - [`BufferedEvent`]: One queued unit of work (target path, payload, id, expiry)
//! - [`EventPath`]: Plain string path or the legacy list-of-segments shape
//! - [`Marker`]: What to trim: everything through an event id, or the clear-all sentinel
//! - [`OwnerId`], [`AccessKey`], [`Principal`]: Who owns a queue and who is asking
//!
//! ## Key Traits
//!
//! - [`Clock`]: Time source, swappable in tests
//! - [`QueueTrimmer`]: Acknowledgment seam between the apply agent and the queue

pub mod error;
pub mod event;
pub mod identity;
pub mod traits;

pub use error::*;
pub use event::*;
pub use identity::*;
pub use traits::*;
