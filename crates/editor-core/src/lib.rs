//! Offset-indexed piece table for editing large files in place.

pub mod config;
pub mod errors;
pub mod offset_tree;
pub mod piece_table;
