//! In-place persistence of a piece-table document.
//!
//! File segments keep their relative order through every edit, so a segment
//! moving towards higher offsets can only overlap sources that precede it and
//! a segment moving towards lower offsets only sources that follow it. The
//! first pass walks the document tail-first and moves every right-moving
//! segment; the second pass walks front-first and moves the left-moving
//! segments before writing the inserted bytes. Neither pass overwrites bytes
//! that are still to be read.
//!
//! A write that fails part way leaves some bytes at their new position.
//! [`Progress`] records which, and [`rebase`] points the document at them so
//! the next write starts from what is really on disk.

use crate::errors::{PieceError, PieceResult};
use crate::offset_tree::element::Element;
use crate::offset_tree::tree::OffsetTree;
use crate::piece_table::SharedWindow;
use crate::piece_table::segment::{ChangeSegment, FileSegment, Segment};

/// What a write did, for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// File segments copied to a new position.
    pub relocated: usize,
    /// Change segments written.
    pub written: usize,
}

/// File bytes a write has already moved.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    /// Document ranges whose bytes now sit at their own offset in the file.
    settled: Vec<std::ops::Range<u64>>,
    /// The chunk whose write failed: its destination and the bytes read for
    /// it. The failed write may have clobbered its source.
    rescued: Option<(u64, Vec<u8>)>,
}

impl Progress {
    /// Whether the file was touched at all before the failure.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.settled.is_empty() && self.rescued.is_none()
    }

    fn rescued_range(&self) -> Option<std::ops::Range<u64>> {
        self.rescued
            .as_ref()
            .map(|(at, bytes)| *at..*at + bytes.len() as u64)
    }

    /// Cuts the file segment at `span` (reading from `source`) into pieces
    /// that are still at `source`, settled in place, or rescued into memory.
    fn cut<B: io::backing::Backing>(
        &self,
        span: std::ops::Range<u64>,
        source: u64,
        window: &SharedWindow<B>,
    ) -> PieceResult<Vec<Segment<B>>> {
        let rescued = self.rescued_range();
        let mut cuts = vec![span.start, span.end];

        for range in self.settled.iter().chain(rescued.iter()) {
            for point in [range.start, range.end] {
                if span.start < point && point < span.end {
                    cuts.push(point);
                }
            }
        }

        cuts.sort_unstable();
        cuts.dedup();

        let mut pieces: Vec<Segment<B>> = Vec::with_capacity(cuts.len() - 1);

        for bounds in cuts.windows(2) {
            let piece = bounds[0]..bounds[1];

            let held = self.rescued.as_ref().filter(|(at, bytes)| {
                *at <= piece.start && piece.end <= at + bytes.len() as u64
            });

            if let Some((at, bytes)) = held {
                let local = crate::errors::to_usize(piece.start - at)?
                    ..crate::errors::to_usize(piece.end - at)?;
                let bytes = bytes
                    .get(local)
                    .ok_or_else(|| PieceError::broken("rescued chunk shorter than its range"))?;

                pieces.push(Segment::Change(ChangeSegment::new(bytes.to_vec())));

                continue;
            }

            let from = if self
                .settled
                .iter()
                .any(|range| range.start <= piece.start && piece.end <= range.end)
            {
                piece.clone()
            } else {
                (source + piece.start - span.start)..(source + piece.end - span.start)
            };

            // contiguous in both the document and the file: one segment
            if let Some(Segment::File(last)) = pieces.last_mut() {
                let last_source = last.source_range();

                if last_source.end == from.start {
                    *last = FileSegment::new(
                        std::sync::Arc::clone(window),
                        last_source.start..from.end,
                    );

                    continue;
                }
            }

            pieces.push(Segment::File(FileSegment::new(
                std::sync::Arc::clone(window),
                from,
            )));
        }

        Ok(pieces)
    }
}

/// Rewrites the backing file so it holds `contents` (`new_size` bytes long).
///
/// The read window stays locked for the whole write and is invalidated at the
/// end, failed or not. File segments are copied through the backing directly,
/// never through the window. Every moved chunk is recorded in `progress`.
///
/// # Errors
///
/// - `PieceError::Io` on any failed backing call.
/// - `PieceError::Poisoned` if the window lock is poisoned.
pub(crate) fn write_back<B: io::backing::Backing>(
    contents: &OffsetTree<Segment<B>>,
    window: &SharedWindow<B>,
    new_size: u64,
    chunk: u64,
    progress: &mut Progress,
) -> PieceResult<WriteSummary> {
    let mut window = window.lock().map_err(|_| PieceError::Poisoned)?;
    let result = relocate(contents, window.backing_mut(), new_size, chunk, progress);

    window.invalidate();

    result
}

fn relocate<B: io::backing::Backing>(
    contents: &OffsetTree<Segment<B>>,
    backing: &mut B,
    new_size: u64,
    chunk: u64,
    progress: &mut Progress,
) -> PieceResult<WriteSummary> {
    let old_size = backing.len()?;
    let mut summary = WriteSummary::default();
    let mut buf = Vec::new();

    if new_size > old_size {
        backing.set_len(new_size)?;
    }

    // 1. PASS ONE: tail-first, move right-moving file segments
    let mut deferred = Vec::new();
    let mut frontier = new_size;

    while frontier > 0 {
        let found = contents
            .find(frontier - 1)
            .ok_or_else(|| PieceError::broken("document shorter than its size"))?;
        let dest = found.range.start;

        match found.element {
            Segment::File(segment) => {
                let source = segment.source_range().start;
                let relocation = Relocation {
                    source,
                    dest,
                    len: segment.len(),
                };

                if source < dest {
                    relocation.descending(backing, chunk, &mut buf, progress)?;
                    summary.relocated += 1;
                } else if source > dest {
                    deferred.push((dest, found.element));
                }
            }
            Segment::Change(_) => deferred.push((dest, found.element)),
        }

        frontier = dest;
    }

    // 2. PASS TWO: front-first, move left-moving segments and write changes
    for (dest, element) in deferred.into_iter().rev() {
        match element {
            Segment::File(segment) => {
                let source = segment.source_range().start;
                let relocation = Relocation {
                    source,
                    dest,
                    len: segment.len(),
                };

                relocation.ascending(backing, chunk, &mut buf, progress)?;
                summary.relocated += 1;
            }
            Segment::Change(change) => {
                backing.write_all_at(dest, change.bytes())?;
                summary.written += 1;
            }
        }
    }

    // Truncate only now: a shrinking file still held sources past `new_size`.
    if new_size < old_size {
        backing.set_len(new_size)?;
    }

    backing.sync()?;

    tracing::debug!(
        old_size,
        new_size,
        relocated = summary.relocated,
        written = summary.written,
        "write back finished"
    );

    Ok(summary)
}

/// Rebuilds `contents` after a failed write so every file segment reads from
/// where its bytes are now. Change segments are kept as they are.
///
/// # Errors
///
/// - `PieceError::BrokenInvariant` if the rebuilt tree rejects a segment.
pub(crate) fn rebase<B: io::backing::Backing>(
    contents: &OffsetTree<Segment<B>>,
    window: &SharedWindow<B>,
    progress: &Progress,
) -> PieceResult<OffsetTree<Segment<B>>> {
    let mut rebased = OffsetTree::new(contents.order());
    let mut offset = 0u64;

    for (span, element) in contents.pairs() {
        let pieces = match element {
            Segment::File(segment) => progress.cut(span, segment.source_range().start, window)?,
            Segment::Change(change) => vec![Segment::Change(change.clone())],
        };

        for piece in pieces {
            let len = piece.len();

            rebased.insert(offset, piece)?;
            offset += len;
        }
    }

    Ok(rebased)
}

/// One file segment's move from `source` to `dest`.
#[derive(Clone, Copy, Debug)]
struct Relocation {
    source: u64,
    dest: u64,
    len: u64,
}

impl Relocation {
    /// Towards a higher `dest`, last chunk first.
    fn descending<B: io::backing::Backing>(
        self,
        backing: &mut B,
        chunk: u64,
        buf: &mut Vec<u8>,
        progress: &mut Progress,
    ) -> PieceResult<()> {
        tracing::trace!(
            source = self.source,
            dest = self.dest,
            len = self.len,
            "relocating file segment right"
        );

        let mut remaining = self.len;

        while remaining > 0 {
            let step = remaining.min(chunk);

            remaining -= step;
            self.chunk(backing, remaining, step, buf, progress)?;
        }

        Ok(())
    }

    /// Towards a lower `dest`, first chunk first.
    fn ascending<B: io::backing::Backing>(
        self,
        backing: &mut B,
        chunk: u64,
        buf: &mut Vec<u8>,
        progress: &mut Progress,
    ) -> PieceResult<()> {
        tracing::trace!(
            source = self.source,
            dest = self.dest,
            len = self.len,
            "relocating file segment left"
        );

        let mut done = 0u64;

        while done < self.len {
            let step = (self.len - done).min(chunk);

            self.chunk(backing, done, step, buf, progress)?;
            done += step;
        }

        Ok(())
    }

    /// Copies `len` bytes starting `at` bytes into the segment.
    fn chunk<B: io::backing::Backing>(
        self,
        backing: &mut B,
        at: u64,
        len: u64,
        buf: &mut Vec<u8>,
        progress: &mut Progress,
    ) -> PieceResult<()> {
        let to = self.dest + at;

        buf.resize(crate::errors::to_usize(len)?, 0);
        backing.read_exact_at(self.source + at, buf)?;

        if let Err(err) = backing.write_all_at(to, buf) {
            progress.rescued = Some((to, std::mem::take(buf)));

            return Err(err.into());
        }

        progress.settled.push(to..to + len);

        Ok(())
    }
}
