//! # File IO Module.
//!
//! Positional access to a document's backing file and the read-ahead
//! window that lazily serves file-backed segments.
pub mod backing;
pub mod window;
