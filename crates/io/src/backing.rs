use std::io::{Read, Seek, Write};

/// Positional access to the file that backs a document.
///
/// Every call names its own offset, so implementors never rely on a shared
/// cursor between calls. `std::fs::File` is the production implementation;
/// tests substitute in-memory or instrumented backings.
pub trait Backing {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    /// Returns how many bytes were read; fewer than requested only at end of file.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` if seeking or reading fails.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Writes all of `bytes` starting at `offset`, extending the file if needed.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` if seeking or writing fails.
    fn write_all_at(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()>;

    /// Truncates or extends the file to exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` if the file cannot be resized.
    fn set_len(&mut self, len: u64) -> std::io::Result<()>;

    /// Flushes file content and metadata to the storage device.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` if the flush fails.
    fn sync(&mut self) -> std::io::Result<()>;

    /// Current length of the file in bytes.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` if the length cannot be queried.
    fn len(&mut self) -> std::io::Result<u64>;

    /// STRICT: fills `buf` completely or fails with `UnexpectedEof`.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` if reading fails or the file ends early.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let read = self.read_at(offset, buf)?;

        if read < buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "short read at offset {offset}: wanted {} bytes, got {read}",
                    buf.len()
                ),
            ));
        }

        Ok(())
    }
}

impl Backing for std::fs::File {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        self.seek(std::io::SeekFrom::Start(offset))?;

        let mut filled = 0usize;

        // `read` may return fewer bytes than asked even before EOF.
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }

        Ok(filled)
    }

    fn write_all_at(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        self.seek(std::io::SeekFrom::Start(offset))?;
        self.write_all(bytes)
    }

    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        std::fs::File::set_len(self, len)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }

    fn len(&mut self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

/// Opens `path` for reading and in-place writing.
///
/// # Errors
///
/// - `std::io::Error` if the file does not exist or lacks read/write permission.
pub fn open_for_update(path: impl AsRef<std::path::Path>) -> std::io::Result<std::fs::File> {
    std::fs::File::options()
        .read(true)
        .write(true)
        .open(path.as_ref())
}
