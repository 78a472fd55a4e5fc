//! Reply generation
//!
//! The session controller only depends on [`ResponseGenerator`]; the canned
//! implementation stands in for a remote assistant.

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Reply sent for roaming questions about the USA
pub const ROAMING_REPLY: &str = "For roaming in the USA, you can use Roam Like Home at 16 dollars/day up to 20 days, or a US Travel Pass for 14 or 30 days. Want details?";

/// Produces a bot reply for a user message
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate the reply text for `text`
    async fn reply(&self, text: &str) -> Result<String>;
}

/// Rule-based responder with a fixed artificial latency
#[derive(Debug, Clone, Default)]
pub struct CannedResponder {
    latency: Duration,
}

impl CannedResponder {
    /// Create a responder that answers immediately
    #[must_use]
    pub const fn new() -> Self {
        Self {
            latency: Duration::ZERO,
        }
    }

    /// Create a responder that waits `latency` before answering
    #[must_use]
    pub const fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl ResponseGenerator for CannedResponder {
    async fn reply(&self, text: &str) -> Result<String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(canned_reply(text))
    }
}

/// Pick the canned reply for a user message
#[must_use]
pub fn canned_reply(text: &str) -> String {
    let lower = text.to_lowercase();
    if lower.contains("roam") && lower.contains("usa") {
        ROAMING_REPLY.to_string()
    } else {
        format!("You said: {text}")
    }
}
