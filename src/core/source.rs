//! Identifier source abstraction.

use super::error::AppResult;

/// Producer of the identifiers a job works through.
///
/// The controller opens the source, reads `total_count` and `batch_ref` once,
/// pulls with `next_identifier` until it yields `None`, then closes it.
pub trait IdentifierSource: Send {
    /// Prepare the source for reading.
    ///
    /// # Errors
    ///
    /// Any failure aborts the job before work starts.
    fn open(&mut self) -> AppResult<()>;

    /// Number of identifiers the source expects to produce.
    fn total_count(&self) -> u64;

    /// Opaque batch reference forwarded to every unit.
    fn batch_ref(&self) -> Option<String> {
        None
    }

    /// Next identifier, or `None` once exhausted.
    ///
    /// # Errors
    ///
    /// Read failures abort the job.
    fn next_identifier(&mut self) -> AppResult<Option<String>>;

    /// Release the source.
    ///
    /// # Errors
    ///
    /// Close failures are logged by the controller.
    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}
