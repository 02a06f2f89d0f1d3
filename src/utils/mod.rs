//! Utility functions and helpers

pub mod error;
pub mod validation;

pub use error::{ConvergeError, ConvergeResult, ErrorResponse};
