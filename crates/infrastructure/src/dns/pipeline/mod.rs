//! The RFC 7766 pipelining engine: pipes (one multiplexed TCP
//! connection each), their per-pipe correlation cache, and the pool
//! driver that admits requests and replaces failed pipes.

mod driver;
mod pipe;
mod sender_cache;

pub use driver::PipeDriver;
