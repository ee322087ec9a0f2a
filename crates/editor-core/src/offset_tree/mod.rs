/// # Offset Tree Module.
///
/// A B-tree keyed by byte offset. Every pair stores an element together with
/// its node-local range, so edits only ever shift the pairs of the nodes on
/// the edited path.
pub mod element;
pub mod iter;
pub mod node;
pub mod tree;
