//! # Editor State.
//!
//! Owns an open [`PieceFile`](editor_core::piece_table::file::PieceFile) and
//! serializes saves onto a background worker.
pub mod document;
pub mod errors;
