/// Anything stored in an [`OffsetTree`](crate::offset_tree::tree::OffsetTree).
///
/// An element is a run of bytes with a known length. All ranges and offsets
/// passed to these methods are local: `0` is the element's first byte.
pub trait Element: Sized {
    /// Number of bytes covered by the element.
    fn len(&self) -> u64;

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only view of `range`.
    ///
    /// # Errors
    ///
    /// Only I/O-backed elements fail, and only when the underlying read fails.
    fn read(
        &self,
        range: std::ops::Range<u64>,
    ) -> crate::errors::PieceResult<std::borrow::Cow<'_, [u8]>>;

    /// Single byte at local `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`Element::read`].
    fn byte_at(&self, offset: u64) -> crate::errors::PieceResult<u8> {
        let end = offset
            .checked_add(1)
            .ok_or(crate::errors::PieceError::Overflow)?;

        self.read(offset..end)?
            .first()
            .copied()
            .ok_or(crate::errors::PieceError::InvalidOffset {
                offset,
                len: self.len(),
            })
    }

    /// Shrinks `self` to `[0, at)` and returns the remainder `[at, len)`.
    ///
    /// Callers guarantee `0 < at < len`.
    fn split_off(&mut self, at: u64) -> Self;
}
