use std::borrow::Cow;

use crate::errors::{PieceError, PieceResult};
use crate::offset_tree::element::Element;
use crate::piece_table::SharedWindow;

/// An untouched run of the backing file.
///
/// Reads are served through the shared read window.
pub struct FileSegment<B: io::backing::Backing> {
    window: SharedWindow<B>,
    range: std::ops::Range<u64>,
}

impl<B: io::backing::Backing> FileSegment<B> {
    pub fn new(window: SharedWindow<B>, range: std::ops::Range<u64>) -> Self {
        Self { window, range }
    }

    /// Where these bytes currently live in the backing file.
    #[inline]
    pub fn source_range(&self) -> std::ops::Range<u64> {
        self.range.clone()
    }
}

impl<B: io::backing::Backing> Clone for FileSegment<B> {
    fn clone(&self) -> Self {
        Self {
            window: std::sync::Arc::clone(&self.window),
            range: self.range.clone(),
        }
    }
}

impl<B: io::backing::Backing> std::fmt::Debug for FileSegment<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSegment")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl<B: io::backing::Backing> Element for FileSegment<B> {
    #[inline]
    fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    fn read(&self, range: std::ops::Range<u64>) -> PieceResult<Cow<'_, [u8]>> {
        if range.end > self.len() {
            return Err(PieceError::InvalidOffset {
                offset: range.end,
                len: self.len(),
            });
        }

        let absolute = (self.range.start + range.start)..(self.range.start + range.end);
        let mut window = self.window.lock().map_err(|_| PieceError::Poisoned)?;

        Ok(Cow::Owned(window.read(absolute)?.to_vec()))
    }

    fn split_off(&mut self, at: u64) -> Self {
        debug_assert!(0 < at && at < self.len(), "split at {at} outside segment");

        let mid = self.range.start + at;
        let tail = Self {
            window: std::sync::Arc::clone(&self.window),
            range: mid..self.range.end,
        };

        self.range.end = mid;

        tail
    }
}

/// Bytes inserted by the user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSegment {
    bytes: Vec<u8>,
}

impl ChangeSegment {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Element for ChangeSegment {
    #[inline]
    fn len(&self) -> u64 {
        // a Vec never holds more than u64::MAX bytes
        self.bytes.len() as u64
    }

    fn read(&self, range: std::ops::Range<u64>) -> PieceResult<Cow<'_, [u8]>> {
        let start = crate::errors::to_usize(range.start)?;
        let end = crate::errors::to_usize(range.end)?;

        self.bytes
            .get(start..end)
            .map(Cow::Borrowed)
            .ok_or(PieceError::InvalidOffset {
                offset: range.end,
                len: self.len(),
            })
    }

    fn split_off(&mut self, at: u64) -> Self {
        debug_assert!(0 < at && at < self.len(), "split at {at} outside segment");

        // below `len`, which came from a usize
        let at = usize::try_from(at)
            .unwrap_or_else(|_| unreachable!("split at {at} outside segment"));

        Self {
            bytes: self.bytes.split_off(at),
        }
    }
}

/// Everything a document's offset tree stores.
#[derive(Debug)]
pub enum Segment<B: io::backing::Backing> {
    File(FileSegment<B>),
    Change(ChangeSegment),
}

impl<B: io::backing::Backing> Element for Segment<B> {
    #[inline]
    fn len(&self) -> u64 {
        match self {
            Segment::File(segment) => segment.len(),
            Segment::Change(segment) => segment.len(),
        }
    }

    fn read(&self, range: std::ops::Range<u64>) -> PieceResult<Cow<'_, [u8]>> {
        match self {
            Segment::File(segment) => segment.read(range),
            Segment::Change(segment) => segment.read(range),
        }
    }

    fn split_off(&mut self, at: u64) -> Self {
        match self {
            Segment::File(segment) => Segment::File(segment.split_off(at)),
            Segment::Change(segment) => Segment::Change(segment.split_off(at)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn shared_window(content: &[u8]) -> (tempfile::NamedTempFile, SharedWindow<std::fs::File>) {
        let mut temp = tempfile::NamedTempFile::new().unwrap();

        temp.write_all(content).unwrap();
        temp.flush().unwrap();

        let file = io::backing::open_for_update(temp.path()).unwrap();
        let window = io::window::ReadWindow::new(file, 4);

        (temp, std::sync::Arc::new(std::sync::Mutex::new(window)))
    }

    #[test]
    fn file_segment_reads_its_slice() {
        let (_temp, window) = shared_window(b"0123456789");
        let segment = FileSegment::new(window, 3..8);

        assert_eq!(segment.len(), 5);
        assert_eq!(segment.read(1..4).unwrap().into_owned(), b"456");
        assert_eq!(segment.byte_at(4).unwrap(), b'7');
        assert!(segment.read(2..6).is_err());
    }

    #[test]
    fn file_segment_split_shares_window() {
        let (_temp, window) = shared_window(b"0123456789");
        let mut head = FileSegment::new(std::sync::Arc::clone(&window), 0..10);

        let tail = head.split_off(6);

        assert_eq!(head.source_range(), 0..6);
        assert_eq!(tail.source_range(), 6..10);
        assert_eq!(tail.read(0..4).unwrap().into_owned(), b"6789");
        assert_eq!(std::sync::Arc::strong_count(&window), 3);
    }

    #[test]
    fn change_segment_split_and_read() {
        let mut head = ChangeSegment::new(b"abcdef".to_vec());

        let tail = head.split_off(2);

        assert_eq!(head.bytes(), b"ab");
        assert_eq!(tail.bytes(), b"cdef");
        let view = tail.read(1..3).unwrap();

        assert!(matches!(view, Cow::Borrowed(_)));
        assert_eq!(&*view, b"de");
        assert!(matches!(
            tail.read(2..5),
            Err(PieceError::InvalidOffset { offset: 5, len: 4 })
        ));
    }

    #[test]
    fn change_segment_split_at_last_byte() {
        let mut head = ChangeSegment::new(b"abc".to_vec());

        let tail = head.split_off(2);

        assert_eq!(head.bytes(), b"ab");
        assert_eq!(tail.bytes(), b"c");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside segment")]
    fn change_segment_split_at_end_panics() {
        let mut head = ChangeSegment::new(b"abc".to_vec());

        head.split_off(3);
    }
}
