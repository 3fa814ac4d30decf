use crate::Stream;
use async_trait::async_trait;
use cubefs_error::{Error, Result};
use cubefs_extent::{Writer, WriterHost};
use std::sync::{Arc, Weak};

/// Bridges a [`Writer`]'s recovery path back to its owning [`Stream`]
/// . Holds a `Weak` reference rather than an `Arc` -- the
/// stream's writer list holds the writers, and each writer holds one of
/// these, so a strong back-reference would keep both alive forever.
pub struct StreamHandle(Weak<Stream>);

impl StreamHandle {
    pub(crate) fn new(stream: Weak<Stream>) -> Self {
        Self(stream)
    }
}

#[async_trait]
impl WriterHost for StreamHandle {
    async fn recover_writer(&self, original_file_offset: u64) -> Result<Arc<Writer>> {
        let stream = self
            .0
            .upgrade()
            .ok_or_else(|| Error::io("stream closed while a writer was recovering"))?;
        stream.allocate_recovery_writer(original_file_offset).await
    }
}
