use crate::config::{PieceConfig, TreeOrder};
use crate::errors::{PieceError, PieceResult};
use crate::offset_tree::element::Element;
use crate::offset_tree::iter::Bytes;
use crate::offset_tree::tree::OffsetTree;
use crate::piece_table::SharedWindow;
use crate::piece_table::segment::{ChangeSegment, FileSegment, Segment};

/// A file being edited in place.
///
/// The document starts as one [`FileSegment`] spanning the whole file. Edits
/// only rearrange segments in memory; nothing touches the disk until
/// [`PieceFile::write`].
#[derive(Debug)]
pub struct PieceFile<B: io::backing::Backing = std::fs::File> {
    path: Option<std::path::PathBuf>,
    size: u64,
    contents: OffsetTree<Segment<B>>,
    window: SharedWindow<B>,
    config: PieceConfig,
    has_changes: bool,
}

/*

====================
===== CREATION =====
====================

*/

impl PieceFile<std::fs::File> {
    /// Opens `path` for reading and writing with the default configuration.
    ///
    /// # Errors
    ///
    /// - `PieceError::Io` if the file cannot be opened or measured.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> PieceResult<Self> {
        Self::open_with(path, PieceConfig::default())
    }

    /// # Errors
    ///
    /// - `PieceError::Io` if the file cannot be opened or measured.
    /// - `PieceError::InvalidConfig` if `config` does not validate.
    pub fn open_with<P: AsRef<std::path::Path>>(
        path: P,
        config: PieceConfig,
    ) -> PieceResult<Self> {
        let path = path.as_ref();
        let file = io::backing::open_for_update(path)?;
        let mut piece_file = Self::from_backing(file, config)?;

        piece_file.path = Some(path.to_path_buf());

        Ok(piece_file)
    }
}

impl<B: io::backing::Backing> PieceFile<B> {
    /// Wraps an already opened backing.
    ///
    /// # Errors
    ///
    /// - `PieceError::Io` if the backing cannot report its length.
    /// - `PieceError::InvalidConfig` if `config` does not validate.
    pub fn from_backing(mut backing: B, config: PieceConfig) -> PieceResult<Self> {
        let order = config.validate()?;
        let size = backing.len()?;
        let window = std::sync::Arc::new(std::sync::Mutex::new(io::window::ReadWindow::new(
            backing,
            config.cache_slack,
        )));

        tracing::debug!(size, max_pairs = order.max_pairs, "piece file opened");

        Ok(Self {
            path: None,
            size,
            contents: seed(&window, size, order),
            window,
            config,
            has_changes: false,
        })
    }
}

/// A tree holding one file segment over `[0, size)`.
fn seed<B: io::backing::Backing>(
    window: &SharedWindow<B>,
    size: u64,
    order: TreeOrder,
) -> OffsetTree<Segment<B>> {
    OffsetTree::with_element(
        Segment::File(FileSegment::new(std::sync::Arc::clone(window), 0..size)),
        order,
    )
}

/*

==========================
===== INLINE METHODS =====
==========================

*/

impl<B: io::backing::Backing> PieceFile<B> {
    /// Current document length in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether there are edits not yet written to the backing file.
    #[inline]
    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    #[inline]
    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    /// Number of segments the document is currently split into.
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.contents.element_count()
    }
}

/*

================
===== READ =====
================

*/

impl<B: io::backing::Backing> PieceFile<B> {
    /// Byte at `offset`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// - `PieceError::Io` if the byte lives in the file and reading it fails.
    pub fn byte_at(&self, offset: u64) -> PieceResult<Option<u8>> {
        self.contents.byte_at(offset)
    }

    /// Lazy iterator over the bytes from `offset` to the end.
    pub fn bytes(&self, offset: u64) -> Bytes<'_, Segment<B>> {
        self.contents.bytes_from(offset)
    }

    /// Copies `range` out of the document.
    ///
    /// # Errors
    ///
    /// - `PieceError::InvalidOffset` if `range` reaches past the end.
    /// - `PieceError::Io` if a file-backed part fails to read.
    pub fn read(&self, range: std::ops::Range<u64>) -> PieceResult<Vec<u8>> {
        if range.end > self.size {
            return Err(PieceError::InvalidOffset {
                offset: range.end,
                len: self.size,
            });
        }

        if range.start >= range.end {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(crate::errors::to_usize(range.end - range.start)?);

        for (span, element) in self.contents.pairs_from(range.start) {
            if span.start >= range.end {
                break;
            }

            let local_start = range.start.saturating_sub(span.start);
            let local_end = range.end.min(span.end) - span.start;

            out.extend_from_slice(&element.read(local_start..local_end)?);
        }

        Ok(out)
    }
}

/*

=====================
===== MUTATIONS =====
=====================

*/

impl<B: io::backing::Backing> PieceFile<B> {
    /// Inserts `data` before the byte at `offset`. Empty data is a no-op.
    ///
    /// # Errors
    ///
    /// - `PieceError::InvalidOffset` if `offset > len`.
    pub fn insert(&mut self, offset: u64, data: &[u8]) -> PieceResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        if offset > self.size {
            return Err(PieceError::InvalidOffset {
                offset,
                len: self.size,
            });
        }

        let added = crate::errors::to_u64(data.len())?;
        let new_size = self.size.checked_add(added).ok_or(PieceError::Overflow)?;

        self.contents.split(offset)?;
        self.contents
            .insert(offset, Segment::Change(ChangeSegment::new(data.to_vec())))?;

        self.size = new_size;
        self.has_changes = true;

        tracing::trace!(offset, len = added, "piece file insert");

        Ok(())
    }

    /// Deletes `range`. An empty range is a no-op.
    ///
    /// # Errors
    ///
    /// - `PieceError::InvalidOffset` if `range` reaches past the end.
    pub fn remove(&mut self, range: std::ops::Range<u64>) -> PieceResult<()> {
        if range.end > self.size {
            return Err(PieceError::InvalidOffset {
                offset: range.end,
                len: self.size,
            });
        }

        if range.start >= range.end {
            return Ok(());
        }

        let len = range.end - range.start;

        self.contents.split(range.start)?;
        self.contents.split(range.end)?;

        let mut removed = 0u64;

        while removed < len {
            removed += self.contents.remove(range.start)?.len();
        }

        if removed != len {
            return Err(PieceError::broken("removal crossed an element boundary"));
        }

        self.size -= len;
        self.has_changes = true;

        tracing::trace!(start = range.start, len, "piece file remove");

        Ok(())
    }

    /// Overwrites `range` with `data`; the lengths may differ.
    ///
    /// # Errors
    ///
    /// Same as [`PieceFile::remove`].
    pub fn replace(&mut self, range: std::ops::Range<u64>, data: &[u8]) -> PieceResult<()> {
        let start = range.start;

        self.remove(range)?;
        self.insert(start, data)
    }
}

/*

=================
===== WRITE =====
=================

*/

impl<B: io::backing::Backing> PieceFile<B> {
    /// Persists all edits into the backing file in place.
    ///
    /// Does nothing, and touches nothing, when there are no changes. On
    /// success the document is one file segment over the new contents.
    ///
    /// # Errors
    ///
    /// - `PieceError::Io` if any read, write, resize or sync fails. The
    ///   document reads the same as before and `has_changes` stays set, so
    ///   the write can be retried. Bytes already moved are tracked: file
    ///   segments are pointed at their new position and a chunk caught mid
    ///   write is kept in memory.
    pub fn write(&mut self) -> PieceResult<()> {
        if !self.has_changes {
            return Ok(());
        }

        let started = std::time::Instant::now();
        let mut progress = crate::piece_table::writeback::Progress::default();
        let result = crate::piece_table::writeback::write_back(
            &self.contents,
            &self.window,
            self.size,
            self.config.write_chunk,
            &mut progress,
        );
        let summary = match result {
            Ok(summary) => summary,
            Err(err) => {
                if !progress.is_empty() {
                    self.contents = crate::piece_table::writeback::rebase(
                        &self.contents,
                        &self.window,
                        &progress,
                    )?;
                }

                tracing::warn!(
                    path = ?self.path,
                    %err,
                    moved = !progress.is_empty(),
                    segments = self.contents.element_count(),
                    "piece file write failed"
                );

                return Err(err);
            }
        };

        self.contents = seed(&self.window, self.size, self.contents.order());
        self.has_changes = false;

        tracing::info!(
            path = ?self.path,
            bytes = self.size,
            relocated = summary.relocated,
            written = summary.written,
            elapsed_ms = started.elapsed().as_millis(),
            "piece file written"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_with(content: &[u8]) -> tempfile::NamedTempFile {
        let mut temp = tempfile::NamedTempFile::new().expect("could not create temp file");

        temp.write_all(content).expect("could not write temp file");
        temp.flush().unwrap();

        temp
    }

    fn small_config() -> PieceConfig {
        PieceConfig {
            max_pairs: 3,
            cache_slack: 4,
            write_chunk: 3,
        }
    }

    fn all_bytes<B: io::backing::Backing>(file: &PieceFile<B>) -> Vec<u8> {
        file.bytes(0).collect::<PieceResult<Vec<u8>>>().unwrap()
    }

    #[test]
    fn open_reads_lazily() {
        let temp = temp_with(b"Hello, World!");
        let file = PieceFile::open(temp.path()).unwrap();

        assert_eq!(file.len(), 13);
        assert_eq!(file.path(), Some(temp.path()));
        assert_eq!(file.segment_count(), 1);
        assert!(!file.has_changes());
        assert_eq!(file.byte_at(7).unwrap(), Some(b'W'));
        assert_eq!(file.byte_at(13).unwrap(), None);
        assert_eq!(file.read(7..12).unwrap(), b"World");
    }

    #[test]
    fn empty_file() {
        let temp = temp_with(b"");
        let mut file = PieceFile::open(temp.path()).unwrap();

        assert!(file.is_empty());
        assert_eq!(file.segment_count(), 0);
        assert_eq!(file.byte_at(0).unwrap(), None);

        file.insert(0, b"abc").unwrap();

        assert_eq!(all_bytes(&file), b"abc");
    }

    #[test]
    fn insert_and_remove_in_memory() {
        let temp = temp_with(b"0123456789");
        let mut file = PieceFile::open_with(temp.path(), small_config()).unwrap();

        file.insert(5, b"abc").unwrap();
        assert_eq!(all_bytes(&file), b"01234abc56789");

        file.remove(2..7).unwrap();
        assert_eq!(all_bytes(&file), b"01c56789");
        assert_eq!(file.len(), 8);
        assert!(file.has_changes());

        // nothing reached the disk
        assert_eq!(std::fs::read(temp.path()).unwrap(), b"0123456789");
    }

    #[test]
    fn empty_edits_are_noops() {
        let temp = temp_with(b"abc");
        let mut file = PieceFile::open(temp.path()).unwrap();

        file.insert(1, b"").unwrap();
        file.remove(2..2).unwrap();

        assert!(!file.has_changes());
        assert_eq!(file.segment_count(), 1);
    }

    #[test]
    fn out_of_bounds_edits_fail() {
        let temp = temp_with(b"abc");
        let mut file = PieceFile::open(temp.path()).unwrap();

        assert!(matches!(
            file.insert(4, b"x"),
            Err(PieceError::InvalidOffset { offset: 4, len: 3 })
        ));
        assert!(matches!(
            file.remove(1..5),
            Err(PieceError::InvalidOffset { offset: 5, len: 3 })
        ));
        assert!(file.read(2..4).is_err());
        assert!(!file.has_changes());
    }

    #[test]
    fn replace_overwrites() {
        let temp = temp_with(b"00 11 22 33");
        let mut file = PieceFile::open(temp.path()).unwrap();

        file.replace(3..5, b"ff").unwrap();
        file.replace(9..11, b"").unwrap();

        assert_eq!(all_bytes(&file), b"00 ff 22 ");
    }

    #[test]
    fn bytes_from_middle() {
        let temp = temp_with(b"abcdef");
        let mut file = PieceFile::open_with(temp.path(), small_config()).unwrap();

        file.insert(3, b"XYZ").unwrap();

        let tail = file.bytes(4).collect::<PieceResult<Vec<u8>>>().unwrap();

        assert_eq!(tail, b"YZdef");
        assert_eq!(file.bytes(9).count(), 0);
    }

    #[test]
    fn read_spans_segments() {
        let temp = temp_with(b"abcdef");
        let mut file = PieceFile::open_with(temp.path(), small_config()).unwrap();

        file.insert(2, b"12").unwrap();
        file.insert(6, b"34").unwrap();

        assert_eq!(all_bytes(&file), b"ab12cd34ef");
        assert_eq!(file.read(1..9).unwrap(), b"b12cd34e");
        assert_eq!(file.read(3..3).unwrap(), b"");
    }

    #[test]
    fn write_then_keep_editing() {
        let temp = temp_with(b"abcdef");
        let mut file = PieceFile::open_with(temp.path(), small_config()).unwrap();

        file.insert(0, b"XY").unwrap();
        file.write().unwrap();

        assert!(!file.has_changes());
        assert_eq!(file.segment_count(), 1);
        assert_eq!(std::fs::read(temp.path()).unwrap(), b"XYabcdef");

        file.remove(0..3).unwrap();
        file.write().unwrap();

        assert_eq!(std::fs::read(temp.path()).unwrap(), b"bcdef");
        assert_eq!(all_bytes(&file), b"bcdef");
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();

        let result = PieceFile::open(dir.path().join("missing.bin"));

        assert!(matches!(result, Err(PieceError::Io(_))));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let temp = temp_with(b"abc");
        let config = PieceConfig {
            max_pairs: 2,
            ..PieceConfig::default()
        };

        assert!(matches!(
            PieceFile::open_with(temp.path(), config),
            Err(PieceError::InvalidConfig(_))
        ));
    }
}
