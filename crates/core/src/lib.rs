//! Core types for polsync: the shared error taxonomy, result helpers and the
//! canonical object key used on every queue.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod key;
pub mod result;

pub use error::Error;
pub use key::ObjectKey;
pub use result::{Result, ResultExt};
