//! Per-extent writer and reader pipelines against replicated data
//! partitions . This is
//! the hard-engineering core: asynchronous pipelined request/reply,
//! bounded in-flight counters for backpressure, and a recovery state
//! machine that reissues work against a fresh replica or a brand-new
//! extent when the original one fails mid-stream.

mod alloc;
mod reader;
mod state;
mod writer;

pub use alloc::create_extent;
pub use reader::Reader;
pub use state::PipelineState;
pub use writer::{Writer, WriterHost, DEFAULT_REQUEST_RETRY_MAX};
