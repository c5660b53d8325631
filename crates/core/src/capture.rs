use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// Events a capture implementation publishes to the runtime while listening.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Full accumulated utterance since the last `start()`. Implementations
    /// may coalesce rapid updates but must converge to the complete text.
    Transcript(String),
    /// The underlying stream terminated without a `stop()` request. The
    /// session does not auto-restart capture on this.
    Ended,
    Error(String),
}

/// Contract for a continuous speech-to-text source.
///
/// Language is fixed at construction; switching languages means building a
/// new adapter. Capability is reported once, before the session ever starts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    fn is_supported(&self) -> bool;

    fn is_listening(&self) -> bool;

    /// Begin continuous capture, clearing any previously accumulated text.
    async fn start(&mut self) -> Result<()>;

    /// Halt capture, preserving the last accumulated text.
    async fn stop(&mut self) -> Result<()>;
}
