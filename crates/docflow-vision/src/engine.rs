//! Recognition engine contracts.
//!
//! Engines are long-lived handles: construct once at process start, share via
//! `Arc`, and call [`RecognitionEngine::shutdown`] when the process stops.

use async_trait::async_trait;
use docflow_core::Result;

use crate::types::EngineOutput;

/// Fast, local recognition engine.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, image: &[u8]) -> Result<EngineOutput>;

    /// Release engine resources. Calls after shutdown fail.
    async fn shutdown(&self) {}
}

/// Higher-accuracy, higher-latency vision-language engine.
#[async_trait]
pub trait VisionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, image: &[u8]) -> Result<EngineOutput>;

    async fn shutdown(&self) {}
}
