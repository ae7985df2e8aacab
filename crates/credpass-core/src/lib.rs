//! # credpass-core
//! Foundation types, error taxonomy and trait seams shared by every credpass crate.

pub mod constants;
pub mod error;
pub mod idempotency;
pub mod retry;
pub mod traits;
pub mod types;
