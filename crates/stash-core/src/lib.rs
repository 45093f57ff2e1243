//! stash-core - Core library for stash
//!
//! This crate contains the wire protocol shared by the sync server and its
//! clients, the libSQL connection layer, and the client-side sync core: the
//! local cache, sync metadata, collection merge engine and sync scheduler.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod protocol;
pub mod sync;
pub mod util;

pub use error::{Error, ErrorCode, Result};
pub use protocol::SyncDocument;
