pub mod ports;
pub mod use_cases;

pub use ports::{MessagePipeline, ResponseSink};
pub use use_cases::ForwardQueryUseCase;
