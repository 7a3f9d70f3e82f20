//! In-memory collaborators for testing.
//!
//! These stand in for the broker, the push gateway and live connections so
//! the pipeline can be exercised without any network.
//!
//! # Features
//!
//! - **Recording**: every publish, push and frame is kept for assertions
//! - **Failure injection**: fail the next publish, specific push tokens, or
//!   every send on a sink

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::error::{PublishError, PushError};
use crate::fanout::{LiveSink, SinkError};
use crate::traits::{CommandPublisher, PushGateway, PushMessage};

/// A [`CommandPublisher`] that records what it is asked to publish.
///
/// # Example
///
/// ```
/// use tracker_core::{CommandPublisher, MockPublisher};
///
/// # tokio_test_block(async {
/// let publisher = MockPublisher::new();
/// publisher.publish("Tracker/to/mode", "3").await.unwrap();
/// assert_eq!(publisher.published()[0].1, "3");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockPublisher {
    published: Mutex<Vec<(String, String)>>,
    fail_next: AtomicBool,
    disconnected: AtomicBool,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next publish with a transport error.
    pub fn fail_next(&self, fail: bool) {
        self.fail_next.store(fail, Ordering::SeqCst);
    }

    /// Reject every publish with [`PublishError::NotConnected`].
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// `(topic, payload)` pairs in publish order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandPublisher for MockPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(PublishError::NotConnected);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PublishError::Transport("injected failure".to_string()));
        }
        if let Ok(mut published) = self.published.lock() {
            published.push((topic.to_string(), payload.to_string()));
        }
        Ok(())
    }
}

/// A [`PushGateway`] that records delivered messages.
#[derive(Debug, Default)]
pub struct MockPushGateway {
    sent: Mutex<Vec<PushMessage>>,
    failing_tokens: Mutex<HashSet<String>>,
}

impl MockPushGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `token` fail.
    pub fn fail_token(&self, token: impl Into<String>) {
        if let Ok(mut failing) = self.failing_tokens.lock() {
            failing.insert(token.into());
        }
    }

    /// Successfully delivered messages.
    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PushGateway for MockPushGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        let failing = self
            .failing_tokens
            .lock()
            .map(|f| f.contains(&message.token))
            .unwrap_or(false);
        if failing {
            return Err(PushError::Gateway {
                status: 404,
                body: "unregistered token".to_string(),
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

/// A [`LiveSink`] that records frames, or fails every send.
#[derive(Debug, Default)]
pub struct MockSink {
    frames: Mutex<Vec<String>>,
    fail: bool,
    attempts: AtomicU32,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every send fails as if the connection were gone.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Number of sends attempted, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl LiveSink for MockSink {
    fn send(&self, frame: &str) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SinkError::Closed);
        }
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(frame.to_string());
        }
        Ok(())
    }
}
