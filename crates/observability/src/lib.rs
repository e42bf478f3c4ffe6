//! Process-wide tracing setup shared by the binaries.

pub mod tracing;

pub use crate::tracing::{LogFormat, ParseLogFormatError};

/// Initialize tracing with the given output format.
///
/// Safe to call multiple times; calls after the first are no-ops.
pub fn init(format: LogFormat) {
    crate::tracing::init(format);
}
