use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use super::types::{GeneratedAsset, GenerationRequest, JobHandle};
use crate::error::VideoGenError;

/// Body of a downloaded asset, chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Bytes, VideoGenError>>;

/// Remote side of a generation: start an operation, check on it, fetch what it made.
///
/// Implementations carry their own credential; callers never pass it per call.
#[async_trait]
pub trait VideoGenApi: Send + Sync {
    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, VideoGenError>;

    async fn refresh(&self, handle: &JobHandle) -> Result<JobHandle, VideoGenError>;

    async fn download(&self, asset: &GeneratedAsset) -> Result<ByteStream, VideoGenError>;
}
