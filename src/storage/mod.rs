pub mod block;
pub mod buffer_pool;

pub use block::{Block, BlockIndex};
pub use buffer_pool::{BufferPool, BufferPoolConfig, PinGuard};
