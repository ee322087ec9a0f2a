use crate::config::TreeOrder;
use crate::errors::{PieceError, PieceResult};
use crate::offset_tree::element::Element;
use crate::offset_tree::iter::{Bytes, Pairs};
use crate::offset_tree::node::{Node, Pair, Slot};

/// Result of [`OffsetTree::find`].
#[derive(Debug)]
pub struct Found<'node, E> {
    /// Absolute range of the element.
    pub range: std::ops::Range<u64>,
    pub element: &'node E,
    /// Offset of the looked-up byte inside `element`.
    pub local: u64,
}

/// An ordered sequence of elements addressed by byte offset.
#[derive(Debug)]
pub struct OffsetTree<E> {
    root: Option<Box<Node<E>>>,
    order: TreeOrder,
}

/*

====================
===== CREATION =====
====================

*/

impl<E: Element> OffsetTree<E> {
    pub fn new(order: TreeOrder) -> Self {
        Self { root: None, order }
    }

    /// A tree holding exactly `element`.
    pub fn with_element(element: E, order: TreeOrder) -> Self {
        let mut tree = Self::new(order);

        if !element.is_empty() {
            let end = element.len();

            tree.root = Some(Box::new(Node::leaf(vec![Pair {
                range: 0..end,
                element,
                child: None,
            }])));
        }

        tree
    }

    #[inline]
    pub fn order(&self) -> TreeOrder {
        self.order
    }
}

/*

==================
===== LOOKUP =====
==================

*/

impl<E: Element> OffsetTree<E> {
    /// Total number of bytes covered by the tree.
    #[inline]
    pub fn len(&self) -> u64 {
        self.root.as_ref().map_or(0, |root| root.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Element containing absolute `offset`, or `None` past the end.
    pub fn find(&self, offset: u64) -> Option<Found<'_, E>> {
        let mut node = self.root.as_deref()?;
        let mut base = 0u64;

        loop {
            match node.locate(offset - base) {
                Slot::Pair(idx) => {
                    let pair = &node.pairs[idx];

                    return Some(Found {
                        range: (base + pair.range.start)..(base + pair.range.end),
                        element: &pair.element,
                        local: offset - base - pair.range.start,
                    });
                }
                Slot::Gap(slot) => {
                    let child = node.child(slot)?;

                    base += node.child_base(slot);
                    node = child;
                }
            }
        }
    }

    /// Byte at absolute `offset`.
    ///
    /// # Errors
    ///
    /// - `PieceError::Io` if the element holding the byte fails to read.
    pub fn byte_at(&self, offset: u64) -> PieceResult<Option<u8>> {
        match self.find(offset) {
            Some(found) => found.element.byte_at(found.local).map(Some),
            None => Ok(None),
        }
    }

    /// In-order pairs starting with the one containing `offset`.
    pub fn pairs_from(&self, offset: u64) -> Pairs<'_, E> {
        Pairs::seek(self.root.as_deref(), offset)
    }

    #[inline]
    pub fn pairs(&self) -> Pairs<'_, E> {
        self.pairs_from(0)
    }

    /// Bytes from `offset` to the end of the tree.
    pub fn bytes_from(&self, offset: u64) -> Bytes<'_, E> {
        Bytes::new(self.pairs_from(offset), offset)
    }

    /// Number of elements stored.
    pub fn element_count(&self) -> usize {
        self.pairs().count()
    }

    /// Number of levels; `0` for an empty tree.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut node = self.root.as_deref();

        while let Some(current) = node {
            height += 1;
            node = current.first_child.as_deref();
        }

        height
    }
}

/*

=====================
===== MUTATIONS =====
=====================

*/

impl<E: Element> OffsetTree<E> {
    /// Inserts `element` at the element boundary `offset`, shifting everything
    /// after it. Empty elements are ignored.
    ///
    /// # Errors
    ///
    /// - `PieceError::InvalidOffset` if `offset > len`.
    /// - `PieceError::NotABoundary` if `offset` falls inside an element.
    pub fn insert(&mut self, offset: u64, element: E) -> PieceResult<()> {
        if element.is_empty() {
            return Ok(());
        }

        let len = self.len();

        if offset > len {
            return Err(PieceError::InvalidOffset { offset, len });
        }

        len.checked_add(element.len()).ok_or(PieceError::Overflow)?;

        tracing::trace!(offset, len = element.len(), "offset tree insert");

        let root = self
            .root
            .get_or_insert_with(|| Box::new(Node::leaf(Vec::new())));
        let promoted = root.insert(offset, element, &self.order)?;

        self.grow(promoted);

        Ok(())
    }

    /// Ensures an element boundary at `offset`, splitting the element that
    /// spans it. A no-op on existing boundaries, including `0` and `len`.
    ///
    /// # Errors
    ///
    /// - `PieceError::InvalidOffset` if `offset > len`.
    pub fn split(&mut self, offset: u64) -> PieceResult<()> {
        let len = self.len();

        if offset > len {
            return Err(PieceError::InvalidOffset { offset, len });
        }

        let Some(root) = self.root.as_deref_mut() else {
            return Ok(());
        };
        let promoted = root.split_at(offset, &self.order)?;

        self.grow(promoted);

        Ok(())
    }

    /// Removes the element starting at `offset` and returns it.
    ///
    /// # Errors
    ///
    /// - `PieceError::InvalidOffset` if `offset >= len`.
    /// - `PieceError::NotABoundary` if no element starts at `offset`.
    pub fn remove(&mut self, offset: u64) -> PieceResult<E> {
        let len = self.len();
        let Some(root) = self.root.as_deref_mut().filter(|_| offset < len) else {
            return Err(PieceError::InvalidOffset { offset, len });
        };
        let removed = root.remove_at(offset, &self.order)?;

        tracing::trace!(offset, len = removed.len(), "offset tree remove");

        self.shrink();

        Ok(removed)
    }

    /// Places a pair promoted out of the root above it.
    fn grow(&mut self, promoted: Option<Pair<E>>) {
        let Some(pair) = promoted else {
            return;
        };

        tracing::debug!(separator = ?pair.range, "offset tree root split");

        self.root = Some(Box::new(Node {
            pairs: vec![pair],
            first_child: self.root.take(),
        }));
    }

    /// Replaces a root without pairs by its only child.
    fn shrink(&mut self) {
        if self.root.as_ref().is_some_and(|root| root.pairs.is_empty()) {
            self.root = self.root.take().and_then(|mut root| root.first_child.take());

            tracing::debug!(height = self.height(), "offset tree root collapsed");
        }
    }
}

/*

======================
===== INVARIANTS =====
======================

*/

#[cfg(test)]
impl<E: Element> OffsetTree<E> {
    /// Panics with a description of the first structural violation.
    pub(crate) fn check_invariants(&self) {
        let Some(root) = self.root.as_deref() else {
            return;
        };

        match root.check(&self.order, true) {
            Ok((len, _)) => {
                let sum: u64 = self.pairs().map(|(range, _)| range.end - range.start).sum();

                assert_eq!(len, sum, "length differs from the sum of pair sizes");
            }
            Err(violation) => panic!("offset tree invariant violated: {violation}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece_table::segment::ChangeSegment;
    use proptest::prelude::*;

    fn order3() -> TreeOrder {
        TreeOrder::new(3).unwrap()
    }

    /// 22 single-byte elements holding `0..=21`, appended one by one.
    fn fixture() -> OffsetTree<ChangeSegment> {
        let mut tree = OffsetTree::new(order3());

        for value in 0..22u8 {
            tree.insert(u64::from(value), ChangeSegment::new(vec![value]))
                .unwrap();
            tree.check_invariants();
        }

        tree
    }

    fn contents(tree: &OffsetTree<ChangeSegment>) -> Vec<u8> {
        tree.bytes_from(0).collect::<PieceResult<Vec<u8>>>().unwrap()
    }

    fn byte(tree: &OffsetTree<ChangeSegment>, offset: u64) -> Option<u8> {
        tree.byte_at(offset).unwrap()
    }

    // --- LOOKUP TESTS ---

    #[test]
    fn test_fixture_shape() {
        let tree = fixture();

        assert_eq!(tree.len(), 22);
        assert_eq!(tree.element_count(), 22);
        assert!(tree.height() > 2);
        assert_eq!(contents(&tree), (0..22).collect::<Vec<u8>>());

        for offset in 0..22 {
            assert_eq!(byte(&tree, offset), Some(offset as u8));
        }

        assert_eq!(byte(&tree, 22), None);
    }

    #[test]
    fn test_find_reports_local_offset() {
        let mut tree = OffsetTree::new(order3());

        tree.insert(0, ChangeSegment::new(b"hello".to_vec())).unwrap();
        tree.insert(5, ChangeSegment::new(b"world".to_vec())).unwrap();

        let found = tree.find(7).unwrap();

        assert_eq!(found.range, 5..10);
        assert_eq!(found.local, 2);
        assert!(tree.find(10).is_none());
    }

    #[test]
    fn test_empty_tree() {
        let mut tree: OffsetTree<ChangeSegment> = OffsetTree::new(order3());

        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(byte(&tree, 0), None);
        assert!(tree.split(0).is_ok());
        assert!(matches!(
            tree.remove(0),
            Err(PieceError::InvalidOffset { offset: 0, len: 0 })
        ));
        assert!(matches!(
            tree.insert(1, ChangeSegment::new(vec![1])),
            Err(PieceError::InvalidOffset { offset: 1, len: 0 })
        ));
    }

    #[test]
    fn test_pairs_from_middle() {
        let tree = fixture();

        let starts: Vec<u64> = tree.pairs_from(17).map(|(range, _)| range.start).collect();

        assert_eq!(starts, vec![17, 18, 19, 20, 21]);
        assert_eq!(tree.pairs_from(22).count(), 0);
        assert_eq!(
            tree.bytes_from(19).collect::<PieceResult<Vec<u8>>>().unwrap(),
            vec![19, 20, 21]
        );
    }

    // --- REMOVAL TESTS ---

    #[test]
    fn test_remove_3() {
        let mut tree = fixture();

        let removed = tree.remove(3).unwrap();
        tree.check_invariants();

        assert_eq!(removed.bytes(), &[3]);
        assert_eq!(tree.len(), 21);
        assert_eq!(byte(&tree, 3), Some(4));
        assert_eq!(byte(&tree, 20), Some(21));
        assert_eq!(byte(&tree, 21), None);
    }

    #[test]
    fn test_remove_single_offsets() {
        for offset in [21u64, 9, 12, 18, 8, 0, 7] {
            let mut tree = fixture();

            tree.remove(offset).unwrap();
            tree.check_invariants();

            let expected: Vec<u8> = (0..22u8).filter(|v| u64::from(*v) != offset).collect();

            assert_eq!(contents(&tree), expected, "after removing {offset}");
        }
    }

    #[test]
    fn test_remove_all_from_front() {
        let mut tree = fixture();

        for removed in 1..=22u64 {
            tree.remove(0).unwrap();
            tree.check_invariants();

            assert_eq!(tree.len(), 22 - removed);

            for offset in 0..tree.len() {
                assert_eq!(byte(&tree, offset), Some((offset + removed) as u8));
            }

            assert_eq!(byte(&tree, tree.len()), None);
        }

        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn test_remove_all_from_back() {
        let mut tree = fixture();

        for remaining in (0..22u64).rev() {
            tree.remove(remaining).unwrap();
            tree.check_invariants();

            assert_eq!(tree.len(), remaining);

            for offset in 0..remaining {
                assert_eq!(byte(&tree, offset), Some(offset as u8));
            }

            assert_eq!(byte(&tree, remaining), None);
        }

        assert!(tree.is_empty());
    }

    #[test]
    fn test_remove_inside_element_fails() {
        let mut tree = OffsetTree::new(order3());

        tree.insert(0, ChangeSegment::new(b"abcd".to_vec())).unwrap();

        assert!(matches!(tree.remove(2), Err(PieceError::NotABoundary(2))));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_remove_then_reinsert_restores_bytes() {
        let mut tree = fixture();
        let original = contents(&tree);

        let removed = tree.remove(13).unwrap();
        tree.insert(13, removed).unwrap();
        tree.check_invariants();

        assert_eq!(contents(&tree), original);
    }

    // --- SPLIT TESTS ---

    #[test]
    fn test_split_is_idempotent_and_size_neutral() {
        let mut tree = OffsetTree::new(order3());

        tree.insert(0, ChangeSegment::new((0..40).collect())).unwrap();

        for offset in [10u64, 10, 30, 0, 40, 5, 35, 20] {
            tree.split(offset).unwrap();
            tree.check_invariants();

            assert_eq!(tree.len(), 40);
            assert_eq!(contents(&tree), (0..40).collect::<Vec<u8>>());
        }

        assert_eq!(tree.element_count(), 6);
        assert!(matches!(
            tree.split(41),
            Err(PieceError::InvalidOffset { offset: 41, len: 40 })
        ));
    }

    #[test]
    fn test_split_inside_internal_pair() {
        let mut tree = OffsetTree::new(order3());

        for chunk in 0..8u8 {
            let offset = u64::from(chunk) * 4;

            tree.insert(offset, ChangeSegment::new(vec![chunk; 4])).unwrap();
        }

        assert!(tree.height() > 1);

        // split every element; some of them live in internal nodes
        for offset in (2..32).step_by(4) {
            tree.split(offset).unwrap();
            tree.check_invariants();
        }

        assert_eq!(tree.element_count(), 16);
        assert_eq!(byte(&tree, 31), Some(7));
    }

    #[test]
    fn test_insert_between_split_halves() {
        let mut tree = OffsetTree::new(order3());

        tree.insert(0, ChangeSegment::new(b"helloworld".to_vec())).unwrap();
        tree.split(5).unwrap();
        tree.insert(5, ChangeSegment::new(b", ".to_vec())).unwrap();
        tree.check_invariants();

        assert_eq!(contents(&tree), b"hello, world");
        assert!(matches!(
            tree.insert(1, ChangeSegment::new(b"x".to_vec())),
            Err(PieceError::NotABoundary(1))
        ));
    }

    // --- PROPERTY TESTS ---

    #[derive(Clone, Debug)]
    enum Edit {
        Insert { at: u64, bytes: Vec<u8> },
        Remove { at: u64, len: u64 },
    }

    fn edit_strategy() -> impl Strategy<Value = Edit> {
        prop_oneof![
            (any::<u64>(), prop::collection::vec(any::<u8>(), 1..6))
                .prop_map(|(at, bytes)| Edit::Insert { at, bytes }),
            (any::<u64>(), 1..8u64).prop_map(|(at, len)| Edit::Remove { at, len }),
        ]
    }

    /// Removes `[start, start + len)` the way the piece table does.
    fn remove_range(tree: &mut OffsetTree<ChangeSegment>, start: u64, len: u64) {
        tree.split(start).unwrap();
        tree.split(start + len).unwrap();

        let mut removed = 0;

        while removed < len {
            removed += tree.remove(start).unwrap().len();
        }

        assert_eq!(removed, len);
    }

    proptest! {
        #[test]
        fn prop_matches_reference(
            max_pairs in 3usize..7,
            edits in prop::collection::vec(edit_strategy(), 1..80),
        ) {
            let mut tree = OffsetTree::new(TreeOrder::new(max_pairs).unwrap());
            let mut reference: Vec<u8> = Vec::new();

            for edit in edits {
                let len = reference.len() as u64;

                match edit {
                    Edit::Insert { at, bytes } => {
                        let at = at % (len + 1);

                        tree.split(at).unwrap();
                        tree.insert(at, ChangeSegment::new(bytes.clone())).unwrap();
                        reference.splice(at as usize..at as usize, bytes);
                    }
                    Edit::Remove { at, len: remove_len } => {
                        if len == 0 {
                            continue;
                        }

                        let at = at % len;
                        let remove_len = remove_len.min(len - at);

                        remove_range(&mut tree, at, remove_len);
                        reference.drain(at as usize..(at + remove_len) as usize);
                    }
                }

                tree.check_invariants();
                prop_assert_eq!(tree.len(), reference.len() as u64);
            }

            prop_assert_eq!(contents(&tree), reference.clone());

            for (offset, expected) in reference.iter().enumerate() {
                prop_assert_eq!(byte(&tree, offset as u64), Some(*expected));
            }
        }
    }
}
