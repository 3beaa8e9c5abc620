//! Shared types for the email pool service

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
