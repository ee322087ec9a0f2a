use std::ops::{AddAssign, SubAssign};

use crate::errors::{PieceError, PieceResult};
use crate::offset_tree::element::Element;

/// One content run inside a node.
#[derive(Debug)]
pub struct Pair<E> {
    /// Node-local position of `element`; always exactly `element.len()` wide.
    pub range: std::ops::Range<u64>,
    pub element: E,
    /// Subtree filling the gap between this pair and the next one.
    pub child: Option<Box<Node<E>>>,
}

/// A B-tree node whose pairs carry content at every level.
///
/// Children fill the gaps between pairs: slot `0` is `first_child`, slot
/// `i + 1` is `pairs[i].child`. A child's base offset is the start of the gap
/// it fills, so it is derived rather than stored. A node is either a leaf (no
/// children at all) or internal (every slot populated).
#[derive(Debug)]
pub struct Node<E> {
    pub pairs: Vec<Pair<E>>,
    pub first_child: Option<Box<Node<E>>>,
}

/// Where a node-local offset falls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Inside (or at the start of) `pairs[idx]`.
    Pair(usize),
    /// In the gap owned by child slot `idx`.
    Gap(usize),
}

/*

==========================
===== INLINE METHODS =====
==========================

*/

impl<E> Node<E> {
    pub fn leaf(pairs: Vec<Pair<E>>) -> Self {
        Self {
            pairs,
            first_child: None,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.first_child.is_none()
    }

    /// Total bytes in this subtree. Walks the right spine.
    pub(crate) fn len(&self) -> u64 {
        match self.pairs.last() {
            Some(last) => last.range.end + last.child.as_ref().map_or(0, |child| child.len()),
            None => self.first_child.as_ref().map_or(0, |child| child.len()),
        }
    }

    /// Binary search for the pair containing `offset`.
    #[inline]
    pub fn locate(&self, offset: u64) -> Slot {
        let idx = self.pairs.partition_point(|pair| pair.range.end <= offset);

        match self.pairs.get(idx) {
            Some(pair) if pair.range.start <= offset => Slot::Pair(idx),
            _ => Slot::Gap(idx),
        }
    }

    /// Node-local offset where child slot `slot` begins.
    #[inline]
    pub fn child_base(&self, slot: usize) -> u64 {
        slot.checked_sub(1)
            .and_then(|idx| self.pairs.get(idx))
            .map_or(0, |pair| pair.range.end)
    }

    #[inline]
    pub fn child(&self, slot: usize) -> Option<&Node<E>> {
        match slot.checked_sub(1) {
            None => self.first_child.as_deref(),
            Some(idx) => self.pairs.get(idx)?.child.as_deref(),
        }
    }

    #[inline]
    fn child_mut(&mut self, slot: usize) -> Option<&mut Node<E>> {
        match slot.checked_sub(1) {
            None => self.first_child.as_deref_mut(),
            Some(idx) => self.pairs.get_mut(idx)?.child.as_deref_mut(),
        }
    }

    fn take_child(&mut self, slot: usize) -> PieceResult<Box<Node<E>>> {
        let child = match slot.checked_sub(1) {
            None => self.first_child.take(),
            Some(idx) => self.pairs.get_mut(idx).and_then(|pair| pair.child.take()),
        };

        child.ok_or_else(|| PieceError::broken("missing child in internal node"))
    }

    fn put_child(&mut self, slot: usize, child: Box<Node<E>>) {
        match slot.checked_sub(1) {
            None => self.first_child = Some(child),
            Some(idx) => {
                debug_assert!(idx < self.pairs.len(), "child slot {slot} out of range");

                if let Some(pair) = self.pairs.get_mut(idx) {
                    pair.child = Some(child);
                }
            }
        }
    }

    /// Moves `pairs[from..]` (and thereby their children) `by` bytes later.
    #[inline]
    fn shift_forward(&mut self, from: usize, by: u64) {
        for pair in &mut self.pairs[from..] {
            pair.range.start.add_assign(by);
            pair.range.end.add_assign(by);
        }
    }

    /// Moves `pairs[from..]` (and thereby their children) `by` bytes earlier.
    #[inline]
    fn shift_back(&mut self, from: usize, by: u64) {
        for pair in &mut self.pairs[from..] {
            pair.range.start.sub_assign(by);
            pair.range.end.sub_assign(by);
        }
    }
}

/// Re-expresses a pair promoted out of a child in the parent's coordinates.
#[inline]
fn rebased<E>(mut pair: Pair<E>, base: u64) -> Pair<E> {
    pair.range = (pair.range.start + base)..(pair.range.end + base);

    pair
}

/*

=====================
===== INSERTION =====
=====================

*/

impl<E: Element> Node<E> {
    /// Inserts `element` at the node-local boundary `offset`.
    ///
    /// Returns the promoted median pair if this node overflowed and split.
    pub fn insert(
        &mut self,
        offset: u64,
        element: E,
        order: &crate::config::TreeOrder,
    ) -> PieceResult<Option<Pair<E>>> {
        let slot = match self.locate(offset) {
            Slot::Pair(idx) if self.pairs[idx].range.start != offset => {
                return Err(PieceError::NotABoundary(offset));
            }
            Slot::Pair(idx) | Slot::Gap(idx) => idx,
        };
        let size = element.len();

        if self.is_leaf() {
            // Leaf pairs are contiguous, so a boundary must be the previous pair's end.
            if offset != self.child_base(slot) {
                return Err(PieceError::InvalidOffset {
                    offset,
                    len: self.len(),
                });
            }

            let end = offset.checked_add(size).ok_or(PieceError::Overflow)?;

            self.shift_forward(slot, size);
            self.pairs.insert(
                slot,
                Pair {
                    range: offset..end,
                    element,
                    child: None,
                },
            );
        } else {
            let base = self.child_base(slot);
            let child = self
                .child_mut(slot)
                .ok_or_else(|| PieceError::broken("missing child in internal node"))?;
            let promoted = child.insert(offset - base, element, order)?;

            self.shift_forward(slot, size);

            if let Some(pair) = promoted {
                self.pairs.insert(slot, rebased(pair, base));
            }
        }

        Ok(self.split_if_needed(order))
    }

    /// Splits an overflowing node at its median pair.
    ///
    /// The tail pairs move to a new sibling rebased to start at `0`; the
    /// median's former child becomes the sibling's `first_child` and the median
    /// itself is returned with the sibling as its child.
    fn split_if_needed(&mut self, order: &crate::config::TreeOrder) -> Option<Pair<E>> {
        if self.pairs.len() <= order.max_pairs {
            return None;
        }

        let mid = self.pairs.len() / 2;
        let tail = self.pairs.split_off(mid + 1);
        let mut median = self.pairs.pop()?;
        let mut sibling = Node {
            pairs: tail,
            first_child: median.child.take(),
        };

        sibling.shift_back(0, median.range.end);
        median.child = Some(Box::new(sibling));

        Some(median)
    }
}

/*

=================
===== SPLIT =====
=================

*/

impl<E: Element> Node<E> {
    /// Makes `offset` an element boundary.
    ///
    /// Size-neutral: the tail of the split element is re-inserted directly
    /// after its head, so nothing outside this subtree moves.
    pub fn split_at(
        &mut self,
        offset: u64,
        order: &crate::config::TreeOrder,
    ) -> PieceResult<Option<Pair<E>>> {
        match self.locate(offset) {
            Slot::Pair(idx) => {
                let range = self.pairs[idx].range.clone();

                if range.start == offset {
                    return Ok(None);
                }

                let tail = self.pairs[idx].element.split_off(offset - range.start);

                self.pairs[idx].range.end = offset;

                if self.is_leaf() {
                    self.pairs.insert(
                        idx + 1,
                        Pair {
                            range: offset..range.end,
                            element: tail,
                            child: None,
                        },
                    );
                } else {
                    // The child now starts at `offset`; it absorbs the tail at its front.
                    let child = self.pairs[idx]
                        .child
                        .as_deref_mut()
                        .ok_or_else(|| PieceError::broken("missing child in internal node"))?;

                    if let Some(pair) = child.insert(0, tail, order)? {
                        self.pairs.insert(idx + 1, rebased(pair, offset));
                    }
                }

                Ok(self.split_if_needed(order))
            }
            Slot::Gap(slot) => {
                let base = self.child_base(slot);

                if self.is_leaf() {
                    // Only the end of a leaf is a gap.
                    return if offset == base {
                        Ok(None)
                    } else {
                        Err(PieceError::InvalidOffset { offset, len: base })
                    };
                }

                let child = self
                    .child_mut(slot)
                    .ok_or_else(|| PieceError::broken("missing child in internal node"))?;

                if let Some(pair) = child.split_at(offset - base, order)? {
                    self.pairs.insert(slot, rebased(pair, base));
                }

                Ok(self.split_if_needed(order))
            }
        }
    }
}

/*

========================
======= DELETION =======
========================

*/

impl<E: Element> Node<E> {
    /// Removes the element starting exactly at node-local `offset`.
    ///
    /// An internal pair is replaced by its predecessor, taken from the
    /// rightmost spine of the preceding child. Children that underflow on the
    /// way back up are rebalanced.
    pub fn remove_at(
        &mut self,
        offset: u64,
        order: &crate::config::TreeOrder,
    ) -> PieceResult<E> {
        match self.locate(offset) {
            Slot::Pair(idx) => {
                let range = self.pairs[idx].range.clone();

                if range.start != offset {
                    return Err(PieceError::NotABoundary(offset));
                }

                let size = range.end - range.start;

                if self.is_leaf() {
                    let pair = self.pairs.remove(idx);

                    self.shift_back(idx, size);

                    return Ok(pair.element);
                }

                let predecessor = self
                    .child_mut(idx)
                    .ok_or_else(|| PieceError::broken("missing child in internal node"))?
                    .pop_last(order)?;
                let predecessor_len = predecessor.len();
                let pair = &mut self.pairs[idx];
                let removed = std::mem::replace(&mut pair.element, predecessor);

                pair.range = (range.start - predecessor_len)..range.start;

                self.shift_back(idx + 1, size);
                self.rebalance(idx, order)?;

                Ok(removed)
            }
            Slot::Gap(slot) => {
                let base = self.child_base(slot);

                if self.is_leaf() {
                    return Err(PieceError::InvalidOffset { offset, len: base });
                }

                let removed = self
                    .child_mut(slot)
                    .ok_or_else(|| PieceError::broken("missing child in internal node"))?
                    .remove_at(offset - base, order)?;

                self.shift_back(slot, removed.len());
                self.rebalance(slot, order)?;

                Ok(removed)
            }
        }
    }

    /// Removes and returns the last element of this subtree.
    fn pop_last(&mut self, order: &crate::config::TreeOrder) -> PieceResult<E> {
        if self.is_leaf() {
            return self
                .pairs
                .pop()
                .map(|pair| pair.element)
                .ok_or_else(|| PieceError::broken("predecessor taken from an empty leaf"));
        }

        let slot = self.pairs.len();
        let element = self
            .child_mut(slot)
            .ok_or_else(|| PieceError::broken("missing child in internal node"))?
            .pop_last(order)?;

        self.rebalance(slot, order)?;

        Ok(element)
    }

    /// Restores the minimum fan-out of child `slot`: borrow from the left
    /// sibling, then from the right one, otherwise merge.
    fn rebalance(&mut self, slot: usize, order: &crate::config::TreeOrder) -> PieceResult<()> {
        let deficient = self
            .child(slot)
            .ok_or_else(|| PieceError::broken("missing child in internal node"))?
            .pairs
            .len();

        if deficient >= order.min_pairs {
            return Ok(());
        }

        let has_spare =
            |node: Option<&Node<E>>| node.is_some_and(|node| node.pairs.len() > order.min_pairs);

        if slot > 0 && has_spare(self.child(slot - 1)) {
            tracing::debug!(slot, "offset tree rotate right");

            return self.rotate_right(slot);
        }

        if slot < self.pairs.len() && has_spare(self.child(slot + 1)) {
            tracing::debug!(slot, "offset tree rotate left");

            return self.rotate_left(slot);
        }

        if slot > 0 {
            tracing::debug!(separator = slot - 1, "offset tree merge with left sibling");

            self.merge(slot - 1)
        } else if slot < self.pairs.len() {
            tracing::debug!(separator = slot, "offset tree merge with right sibling");

            self.merge(slot)
        } else {
            Err(PieceError::broken("underflowing child without siblings"))
        }
    }

    /// Moves the left sibling's last pair up into the separator and the
    /// separator down to the front of child `slot`.
    fn rotate_right(&mut self, slot: usize) -> PieceResult<()> {
        let separator_idx = slot - 1;
        let left_base = self.child_base(slot - 1);
        let mut left = self.take_child(slot - 1)?;
        let mut deficient = self.take_child(slot)?;
        let Pair {
            range: moved_range,
            element: moved_element,
            child: moved_child,
        } = left
            .pairs
            .pop()
            .ok_or_else(|| PieceError::broken("rotating from an empty sibling"))?;
        // The moved pair's child becomes the deficient node's new first child.
        let new_base = left_base + moved_range.end;
        let separator = &mut self.pairs[separator_idx];
        let moved_child_len = separator.range.start - new_base;
        let separator_len = separator.range.end - separator.range.start;
        let down_element = std::mem::replace(&mut separator.element, moved_element);

        separator.range = (left_base + moved_range.start)..new_base;

        deficient.shift_forward(0, moved_child_len + separator_len);

        let down_child = std::mem::replace(&mut deficient.first_child, moved_child);

        deficient.pairs.insert(
            0,
            Pair {
                range: moved_child_len..moved_child_len + separator_len,
                element: down_element,
                child: down_child,
            },
        );

        self.put_child(slot - 1, left);
        self.put_child(slot, deficient);

        Ok(())
    }

    /// Moves the right sibling's first pair up into the separator and the
    /// separator down to the end of child `slot`.
    fn rotate_left(&mut self, slot: usize) -> PieceResult<()> {
        let separator_idx = slot;
        let base = self.child_base(slot);
        let mut deficient = self.take_child(slot)?;
        let mut right = self.take_child(slot + 1)?;

        if right.pairs.is_empty() {
            return Err(PieceError::broken("rotating from an empty sibling"));
        }

        let Pair {
            range: moved_range,
            element: moved_element,
            child: moved_child,
        } = right.pairs.remove(0);
        let down_child = std::mem::replace(&mut right.first_child, moved_child);

        // The right sibling now begins after the moved pair.
        right.shift_back(0, moved_range.end);

        let separator = &mut self.pairs[separator_idx];
        let separator_range = separator.range.clone();
        let down_element = std::mem::replace(&mut separator.element, moved_element);

        separator.range = (separator_range.end + moved_range.start)
            ..(separator_range.end + moved_range.end);

        deficient.pairs.push(Pair {
            range: (separator_range.start - base)..(separator_range.end - base),
            element: down_element,
            child: down_child,
        });

        self.put_child(slot, deficient);
        self.put_child(slot + 1, right);

        Ok(())
    }

    /// Folds child `separator_idx`, `pairs[separator_idx]` and child
    /// `separator_idx + 1` into one node.
    fn merge(&mut self, separator_idx: usize) -> PieceResult<()> {
        let base = self.child_base(separator_idx);
        let mut left = self.take_child(separator_idx)?;
        let right = self.take_child(separator_idx + 1)?;
        let separator = self.pairs.remove(separator_idx);
        let right_base = separator.range.end - base;
        let Node {
            pairs: right_pairs,
            first_child: right_first_child,
        } = *right;

        left.pairs.push(Pair {
            range: (separator.range.start - base)..right_base,
            element: separator.element,
            child: right_first_child,
        });
        left.pairs.extend(
            right_pairs
                .into_iter()
                .map(|pair| rebased(pair, right_base)),
        );

        self.put_child(separator_idx, left);

        Ok(())
    }
}

/*

======================
===== INVARIANTS =====
======================

*/

#[cfg(test)]
impl<E: Element> Node<E> {
    /// Verifies layout, sizes and fan-out of this subtree.
    /// Returns `(subtree len, height)`.
    pub(crate) fn check(
        &self,
        order: &crate::config::TreeOrder,
        is_root: bool,
    ) -> Result<(u64, usize), String> {
        if self.pairs.len() > order.max_pairs {
            return Err(format!("node holds {} pairs", self.pairs.len()));
        }

        if self.pairs.is_empty() || (!is_root && self.pairs.len() < order.min_pairs) {
            return Err(format!("node underflow: {} pairs", self.pairs.len()));
        }

        let mut cursor = 0u64;
        let mut height = None;

        for slot in 0..=self.pairs.len() {
            match (self.is_leaf(), self.child(slot)) {
                (true, Some(_)) => return Err(format!("leaf has child in slot {slot}")),
                (false, None) => return Err(format!("internal node misses child {slot}")),
                (_, Some(child)) => {
                    let (len, child_height) = child.check(order, false)?;

                    if *height.get_or_insert(child_height) != child_height {
                        return Err("leaves at different depths".to_string());
                    }

                    cursor += len;
                }
                (true, None) => {}
            }

            if let Some(pair) = self.pairs.get(slot) {
                if pair.range.start != cursor {
                    return Err(format!("pair {slot} starts at {}, expected {cursor}", pair.range.start));
                }

                if pair.range.end - pair.range.start != pair.element.len() || pair.element.is_empty() {
                    return Err(format!("pair {slot} range {:?} mismatches element", pair.range));
                }

                cursor = pair.range.end;
            }
        }

        Ok((cursor, height.map_or(0, |h| h + 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeOrder;
    use crate::piece_table::segment::ChangeSegment;

    fn change(bytes: &[u8]) -> ChangeSegment {
        ChangeSegment::new(bytes.to_vec())
    }

    fn leaf_of(runs: &[&[u8]]) -> Node<ChangeSegment> {
        let mut node = Node::leaf(Vec::new());
        let mut offset = 0;

        for run in runs {
            node.insert(offset, change(run), &TreeOrder::new(8).unwrap())
                .unwrap();
            offset += run.len() as u64;
        }

        node
    }

    #[test]
    fn locate_distinguishes_pairs_and_gaps() {
        let node = leaf_of(&[b"ab", b"cde"]);

        assert_eq!(node.locate(0), Slot::Pair(0));
        assert_eq!(node.locate(1), Slot::Pair(0));
        assert_eq!(node.locate(2), Slot::Pair(1));
        assert_eq!(node.locate(4), Slot::Pair(1));
        assert_eq!(node.locate(5), Slot::Gap(2));
        assert_eq!(node.len(), 5);
    }

    #[test]
    fn insert_shifts_later_pairs() {
        let mut node = leaf_of(&[b"ab", b"cd"]);

        node.insert(2, change(b"XYZ"), &TreeOrder::new(8).unwrap())
            .unwrap();

        let ranges: Vec<_> = node.pairs.iter().map(|p| p.range.clone()).collect();

        assert_eq!(ranges, vec![0..2, 2..5, 5..7]);
    }

    #[test]
    fn insert_inside_pair_is_rejected() {
        let mut node = leaf_of(&[b"abcd"]);

        let result = node.insert(2, change(b"x"), &TreeOrder::new(8).unwrap());

        assert!(matches!(result, Err(PieceError::NotABoundary(2))));
        assert_eq!(node.pairs.len(), 1);
    }

    #[test]
    fn overflow_promotes_median_with_rebased_sibling() {
        let order = TreeOrder::new(3).unwrap();
        let mut node = leaf_of(&[b"a", b"bb", b"ccc"]);

        let promoted = node.insert(6, change(b"dddd"), &order).unwrap().unwrap();

        // [a, bb] | ccc | [dddd]
        assert_eq!(node.pairs.len(), 2);
        assert_eq!(promoted.range, 3..6);

        let sibling = promoted.child.as_deref().unwrap();

        assert_eq!(sibling.pairs.len(), 1);
        assert_eq!(sibling.pairs[0].range, 0..4);
        assert!(sibling.first_child.is_none());
    }

    #[test]
    fn split_at_boundary_is_noop() {
        let order = TreeOrder::new(3).unwrap();
        let mut node = leaf_of(&[b"ab", b"cd"]);

        assert!(node.split_at(2, &order).unwrap().is_none());
        assert!(node.split_at(4, &order).unwrap().is_none());
        assert_eq!(node.pairs.len(), 2);
        assert!(matches!(
            node.split_at(5, &order),
            Err(PieceError::InvalidOffset { offset: 5, .. })
        ));
    }

    #[test]
    fn remove_requires_pair_start() {
        let order = TreeOrder::new(3).unwrap();
        let mut node = leaf_of(&[b"abc"]);

        assert!(matches!(
            node.remove_at(1, &order),
            Err(PieceError::NotABoundary(1))
        ));
        assert!(matches!(
            node.remove_at(3, &order),
            Err(PieceError::InvalidOffset { offset: 3, .. })
        ));
    }
}
