use core::fmt;

/// The error type for parsing iperf2 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A record could not be parsed because it was shorter than assumed.
    ///
    /// The buffer may be shorter than the base record, or the flags announced an extended block
    /// which is not contained in the data.
    Truncated,

    /// A record was recognized but was self-contradictory.
    ///
    /// An example is an extended settings block announcing a negative length of itself.
    Malformed,
}

/// The result type for the codec.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated => write!(f, "truncated record"),
            Error::Malformed => write!(f, "malformed record"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
