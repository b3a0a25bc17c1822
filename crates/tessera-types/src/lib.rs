//! Foundation types for Tessera.
//!
//! This crate provides the identity types shared by every other Tessera
//! crate: how a file inside a data store is named, how a holder of a loaded
//! object identifies itself, and how a backing store is located.
//!
//! # Key Types
//!
//! - [`FileId`] -- Normalized, store-scoped path of a file entry
//! - [`ConsumerId`] -- Opaque token identifying a holder of loaded objects
//! - [`Locator`] -- URL-like identifier resolving to a local project or remote repository
//! - [`ContentId`] -- BLAKE3 digest of a materialized object's bytes

pub mod consumer;
pub mod content;
pub mod error;
pub mod file;
pub mod locator;

pub use consumer::ConsumerId;
pub use content::ContentId;
pub use error::TypeError;
pub use file::FileId;
pub use locator::{Locator, DEFAULT_REMOTE_PORT, SCHEME};
