//! Common utilities and types shared across PassBox crates.
//!
//! This crate provides the error type used by every layer and the small
//! newtypes that cross crate boundaries.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{SensitiveBytes, UserId};
