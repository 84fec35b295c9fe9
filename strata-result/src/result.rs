use crate::error::Error;

/// Result type alias used throughout Strata.
///
/// Shorthand for `std::result::Result<T, Error>`; every fallible operation in
/// the workspace returns it.
pub type Result<T> = std::result::Result<T, Error>;
