use crate::offset_tree::element::Element;
use crate::offset_tree::node::{Node, Slot};

/// Bytes requested from an element per refill of [`Bytes`].
const BYTES_CHUNK: u64 = 4096;

/// In-order walk over the pairs of an offset tree.
///
/// Yields absolute ranges alongside their elements.
#[derive(Debug)]
pub struct Pairs<'node, E> {
    /// Stack tracks: (Node Reference, Index of next pair to yield, Absolute base of node)
    stack: Vec<(&'node Node<E>, usize, u64)>,
}

impl<'node, E> Pairs<'node, E> {
    /// Positions the walk on the pair containing `offset`, or on the first
    /// pair after it when `offset` falls into a gap.
    pub(crate) fn seek(root: Option<&'node Node<E>>, offset: u64) -> Self {
        let mut pairs = Self { stack: Vec::new() };
        let Some(mut node) = root else {
            return pairs;
        };
        let mut base = 0u64;

        loop {
            match node.locate(offset - base) {
                Slot::Pair(idx) => {
                    pairs.stack.push((node, idx, base));

                    return pairs;
                }
                Slot::Gap(slot) => {
                    pairs.stack.push((node, slot, base));

                    let Some(child) = node.child(slot) else {
                        return pairs;
                    };

                    base += node.child_base(slot);
                    node = child;
                }
            }
        }
    }

    /// Pushes `node` and its leftmost spine.
    fn descend(&mut self, mut node: &'node Node<E>, base: u64) {
        loop {
            self.stack.push((node, 0, base));

            match node.first_child.as_deref() {
                Some(child) => node = child,
                None => return,
            }
        }
    }
}

impl<'node, E> Iterator for Pairs<'node, E> {
    type Item = (std::ops::Range<u64>, &'node E);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (node, idx, base) = *self.stack.last()?;
            let Some(pair) = node.pairs.get(idx) else {
                self.stack.pop();
                continue;
            };

            if let Some(top) = self.stack.last_mut() {
                top.1 += 1;
            }

            if let Some(child) = pair.child.as_deref() {
                self.descend(child, base + pair.range.end);
            }

            return Some((
                (base + pair.range.start)..(base + pair.range.end),
                &pair.element,
            ));
        }
    }
}

/// Lazy byte stream starting at an absolute offset.
///
/// Elements are read in bounded chunks. The stream ends after the first
/// failed read.
pub struct Bytes<'node, E: Element> {
    pairs: Pairs<'node, E>,
    start: u64,
    current: Option<(&'node E, u64)>,
    window: std::borrow::Cow<'node, [u8]>,
    pos: usize,
    failed: bool,
}

impl<'node, E: Element> Bytes<'node, E> {
    pub(crate) fn new(pairs: Pairs<'node, E>, start: u64) -> Self {
        Self {
            pairs,
            start,
            current: None,
            window: std::borrow::Cow::Borrowed(&[]),
            pos: 0,
            failed: false,
        }
    }
}

impl<E: Element> Iterator for Bytes<'_, E> {
    type Item = crate::errors::PieceResult<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }

            if let Some(&byte) = self.window.get(self.pos) {
                self.pos += 1;

                return Some(Ok(byte));
            }

            let (element, local) = match self.current {
                Some((element, local)) if local < element.len() => (element, local),
                _ => {
                    let (range, element) = self.pairs.next()?;

                    (element, self.start.saturating_sub(range.start))
                }
            };
            let end = local.saturating_add(BYTES_CHUNK).min(element.len());

            match element.read(local..end) {
                Ok(bytes) => {
                    self.window = bytes;
                    self.pos = 0;
                    self.current = Some((element, end));
                }
                Err(err) => {
                    self.failed = true;

                    return Some(Err(err));
                }
            }
        }
    }
}
