//! The `utils` module provides the shared pieces used across `chatbridge`:
//! the crate-wide error type and logging setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
