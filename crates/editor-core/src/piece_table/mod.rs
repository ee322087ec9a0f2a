/// # Piece Table Module.
///
/// A document is a sequence of segments held in an offset tree: untouched
/// regions of the backing file and buffers of inserted bytes.
pub mod file;
pub mod segment;
pub mod writeback;

/// Shared handle to the read window of a document's backing file.
pub type SharedWindow<B> = std::sync::Arc<std::sync::Mutex<io::window::ReadWindow<B>>>;
