pub type PieceResult<T> = Result<T, PieceError>;

#[derive(Debug, thiserror::Error)]
pub enum PieceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An offset or range reaches past the end of the document.
    #[error("offset {offset} is out of bounds (len={len})")]
    InvalidOffset { offset: u64, len: u64 },

    /// Insert and remove only operate on element boundaries.
    #[error("offset {0} is not an element boundary")]
    NotABoundary(u64),

    #[error("offset tree invariant broken: {0}")]
    BrokenInvariant(&'static str),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("integer conversion failed: {0}")]
    ConversionFailed(#[from] std::num::TryFromIntError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A thread panicked while holding the shared read window.
    #[error("read window lock poisoned")]
    Poisoned,
}

impl PieceError {
    /// Builds a [`PieceError::BrokenInvariant`], asserting in debug builds.
    ///
    /// Structural violations are programming errors; release builds surface
    /// them instead of fabricating output.
    #[inline]
    #[track_caller]
    pub(crate) fn broken(what: &'static str) -> Self {
        debug_assert!(false, "offset tree invariant broken: {what}");

        PieceError::BrokenInvariant(what)
    }
}

#[inline]
pub(crate) fn to_usize(value: u64) -> PieceResult<usize> {
    Ok(<u64 as TryInto<usize>>::try_into(value)?)
}

#[inline]
pub(crate) fn to_u64(value: usize) -> PieceResult<u64> {
    Ok(<usize as TryInto<u64>>::try_into(value)?)
}
