//! File system helpers.

pub mod tree;
