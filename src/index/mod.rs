//! Disk-resident B+-tree index over composite, fixed-format keys.

pub mod node;
pub mod tree;

pub use node::{KeyCodec, Node, NodeKind};
pub use tree::IndexTree;
