//! Shared error types for the bridge workspace

mod errors;

pub use errors::{AppError, AppResult};
