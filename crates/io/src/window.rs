/// Bytes fetched before (and after) a missed read so that scrolling in either
/// direction keeps hitting the window.
pub const DEFAULT_SLACK: u64 = 10_000;

/// A single contiguous read-ahead window over a [`Backing`].
///
/// The window holds `[cached_start, cached_start + cache.len())`. A read that
/// falls outside it refetches `slack` bytes on both sides of the request, which
/// amortizes the sequential access of a hex view walking forwards or backwards.
///
/// [`Backing`]: crate::backing::Backing
#[derive(Debug)]
pub struct ReadWindow<B: crate::backing::Backing> {
    backing: B,
    cache: Vec<u8>,
    cached_start: u64,
    slack: u64,
}

impl<B: crate::backing::Backing> ReadWindow<B> {
    pub fn new(backing: B, slack: u64) -> Self {
        Self {
            backing,
            cache: Vec::new(),
            cached_start: 0,
            slack,
        }
    }

    /// Range of file offsets currently held in memory.
    #[inline]
    #[must_use]
    pub fn cached_range(&self) -> std::ops::Range<u64> {
        // cache.len() always fits: it was produced from a u64-sized request
        self.cached_start..self.cached_start + self.cache.len() as u64
    }

    #[inline]
    fn covers(&self, range: &std::ops::Range<u64>) -> bool {
        let cached = self.cached_range();

        range.start >= cached.start && range.end <= cached.end
    }

    /// Returns the bytes of `range` (absolute file offsets), refetching the
    /// window around it on a miss.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` if the backing read fails, or with `UnexpectedEof`
    ///   if the file ends before `range.end`.
    pub fn read(&mut self, range: std::ops::Range<u64>) -> std::io::Result<&[u8]> {
        if range.start >= range.end {
            return Ok(&[]);
        }

        if !self.covers(&range) {
            self.refill(&range)?;
        }

        let start = to_usize(range.start - self.cached_start)?;
        let end = to_usize(range.end - self.cached_start)?;

        Ok(&self.cache[start..end])
    }

    /// Returns a single byte at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`ReadWindow::read`].
    pub fn byte_at(&mut self, offset: u64) -> std::io::Result<u8> {
        let end = offset.checked_add(1).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "offset overflow")
        })?;
        let bytes = self.read(offset..end)?;

        bytes.first().copied().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "empty window read")
        })
    }

    fn refill(&mut self, range: &std::ops::Range<u64>) -> std::io::Result<()> {
        let fetch_start = range.start.saturating_sub(self.slack);
        let fetch_end = range.end.saturating_add(self.slack);
        let fetch_len = to_usize(fetch_end - fetch_start)?;

        self.cache.clear();
        self.cache.resize(fetch_len, 0);

        let read = match self.backing.read_at(fetch_start, &mut self.cache) {
            Ok(read) => read,
            Err(err) => {
                self.invalidate();

                return Err(err);
            }
        };

        self.cache.truncate(read);
        self.cached_start = fetch_start;

        tracing::debug!(
            start = fetch_start,
            len = read,
            "read window refilled"
        );

        if !self.covers(range) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "file ends at {} before requested range {}..{}",
                    self.cached_range().end,
                    range.start,
                    range.end
                ),
            ));
        }

        Ok(())
    }

    /// Drops the cached window. Must be called whenever the file is rewritten.
    pub fn invalidate(&mut self) {
        self.cache = Vec::new();
        self.cached_start = 0;
    }

    /// Direct access to the backing, bypassing the window.
    ///
    /// Writers must [`invalidate`](Self::invalidate) once they are done.
    #[inline]
    pub fn backing_mut(&mut self) -> &mut B {
        &mut self.backing
    }
}

#[inline]
fn to_usize(value: u64) -> std::io::Result<usize> {
    <u64 as TryInto<usize>>::try_into(value)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))
}
