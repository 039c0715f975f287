use crate::quote::{QuotePayload, QuoteRequest};
use anyhow::Result;
use async_trait::async_trait;

/// Quoting service boundary. Implementations must tolerate concurrent
/// in-flight calls; cancellation happens by the caller abandoning the task
/// that awaits the result.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn request_quote(&self, request: &QuoteRequest) -> Result<QuotePayload>;
}
