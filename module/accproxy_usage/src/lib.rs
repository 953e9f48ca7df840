//! Usage extraction (buffered and streaming) and durable, backpressure-bounded logging of
//! completed requests. See §4.7 and §4.11.

mod accumulator;
mod extractor;
mod logger;
mod model;
mod store;

pub use accumulator::{ StreamUsageAccumulator, StreamUsageResult };
pub use extractor::{ extract_buffered, extract_stream_chunk };
pub use logger::{ UsageLogger, DEFAULT_QUEUE_CAPACITY };
pub use model::UsageRecord;
pub use store::UsageStore;
