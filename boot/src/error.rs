//! Engine-wide error taxonomy (spec §7).

/// Errors are constrained by the flash type's error, mirroring the
/// teacher's `Error<E>` shape in the original prototype `image.rs`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Error {
    /// The underlying driver failed a read/write/erase.
    Flash,
    /// Caller asked for an out-of-bounds or unaligned flash operation.
    BadArgs,
    /// Header, TLV layout, or size fields invalid.
    BadImage,
    /// Downgrade prevention tripped.
    BadVersion,
    /// Trailer in an impossible state.
    BadStatus,
    /// Temp buffer allocation failed (hosted simulator only).
    NoMemory,
    /// Cryptographic validation failed.
    InvalidImage,
    /// No slot passed validation.
    NoBootableImage,
    /// Fault-injection check tripped or an engine invariant was violated.
    Panic,
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        match e {
            storage::Error::NotAligned | storage::Error::OutOfBounds => Error::BadArgs,
            storage::Error::NotWritten | storage::Error::NotErased => Error::Flash,
            storage::Error::NoSuchArea => Error::BadArgs,
        }
    }
}
