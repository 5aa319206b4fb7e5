//! API handlers module

pub mod documents;
pub mod health;
pub mod routines;
pub mod search;

use skincare_common::errors::{AppError, Result};
use validator::Validate;

/// Run `validator` rules on a request body
pub(crate) fn validated<T: Validate>(body: T) -> Result<T> {
    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: e.field_errors().keys().next().map(|k| k.to_string()),
    })?;
    Ok(body)
}
