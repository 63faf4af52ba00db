use inquire::Confirm as InquireConfirm;

use crate::error::GshError;

/// Asks the user to continue past a warning.
///
/// Returning `Ok(false)` means the user declined; callers treat that as a
/// cancel of the whole operation.
pub trait Confirm {
    fn confirm(&self, message: &str) -> Result<bool, GshError>;
}

/// Terminal prompt via `inquire`.
pub struct Interactive;

impl Confirm for Interactive {
    fn confirm(&self, message: &str) -> Result<bool, GshError> {
        InquireConfirm::new(message)
            .with_help_message("Do you want to continue?")
            .with_default(true)
            .prompt()
            .map_err(map_inquire_err)
    }
}

/// Non-interactive policy used with `--quiet`: print the warning, carry on.
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, message: &str) -> Result<bool, GshError> {
        tracing::warn!("{message}");
        eprintln!("WARNING: {message}");
        Ok(true)
    }
}

pub(crate) fn map_inquire_err(e: inquire::InquireError) -> GshError {
    match e {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            GshError::Cancelled
        }
        other => GshError::Validation {
            message: format!("prompt error: {other}"),
        },
    }
}
