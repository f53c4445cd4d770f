pub mod filter;
pub mod ring_buffer;

pub use filter::{FilterContract, FilterError, SemanticHint};
pub use ring_buffer::RingBuffer;
