//! Mock provider for testing.
//!
//! [`MockProvider`] is a queue-based fake that lets tests script exactly
//! which chunks and errors a provider produces, without touching the
//! network. It implements [`Provider`], so it works anywhere a real
//! adapter does, including behind [`DynProvider`](crate::DynProvider).
//!
//! ```rust,ignore
//! use llm_typed::mock::MockProvider;
//! use llm_typed::test_helpers::{json_chunks, mock_for};
//!
//! let mock: MockProvider = mock_for("mock", "test-model");
//! mock.queue_stream(json_chunks(&[r#"{"ok":"#, "true}"]));
//! ```
//!
//! [`LlmError`] holds boxed sources and is not `Clone`, so scripts queue
//! a cloneable [`MockError`] that is converted when dequeued.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use futures::StreamExt;

use crate::error::LlmError;
use crate::provider::{Provider, ProviderMetadata, ProviderRequest};
use crate::stream::{ChunkEvent, ChunkStream};

/// Cloneable subset of [`LlmError`] for queuing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockError {
    /// Maps to [`LlmError::Http`].
    Http {
        /// HTTP status code, if any.
        status: Option<http::StatusCode>,
        /// Error message.
        message: String,
        /// Whether the error is retryable.
        retryable: bool,
    },
    /// Maps to [`LlmError::Auth`].
    Auth(String),
    /// Maps to [`LlmError::InvalidRequest`].
    InvalidRequest(String),
    /// Maps to [`LlmError::Provider`].
    Provider {
        /// Provider error code.
        code: String,
        /// Error message.
        message: String,
        /// Whether the error is retryable.
        retryable: bool,
    },
    /// Maps to [`LlmError::Timeout`].
    Timeout {
        /// Elapsed milliseconds.
        elapsed_ms: u64,
    },
}

impl From<MockError> for LlmError {
    fn from(error: MockError) -> Self {
        match error {
            MockError::Http {
                status,
                message,
                retryable,
            } => Self::Http {
                status,
                message,
                retryable,
            },
            MockError::Auth(msg) => Self::Auth(msg),
            MockError::InvalidRequest(msg) => Self::InvalidRequest(msg),
            MockError::Provider {
                code,
                message,
                retryable,
            } => Self::Provider {
                code,
                message,
                retryable,
            },
            MockError::Timeout { elapsed_ms } => Self::Timeout { elapsed_ms },
        }
    }
}

#[derive(Debug)]
struct Script {
    items: Vec<Result<ChunkEvent, MockError>>,
    stall: bool,
}

/// A queue-based fake provider.
///
/// Every `stream` call pops the next script and records the request for
/// [`recorded_requests`](Self::recorded_requests).
///
/// # Panics
///
/// `stream` panics when no script is queued.
pub struct MockProvider {
    scripts: Mutex<VecDeque<Result<Script, MockError>>>,
    meta: ProviderMetadata,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("meta", &self.meta)
            .field("queued_streams", &self.remaining())
            .field("recorded_requests", &self.requests.lock().expect("mock lock poisoned").len())
            .finish()
    }
}

impl MockProvider {
    /// A mock with the given metadata and nothing queued.
    pub fn new(meta: ProviderMetadata) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            meta,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues a stream that yields `events` and ends.
    pub fn queue_stream(&self, events: Vec<ChunkEvent>) -> &Self {
        self.queue_stream_results(events.into_iter().map(Ok).collect())
    }

    /// Queues a stream that may fail part-way.
    pub fn queue_stream_results(&self, items: Vec<Result<ChunkEvent, MockError>>) -> &Self {
        self.push(Ok(Script { items, stall: false }))
    }

    /// Queues a stream that yields `events` and then never ends.
    ///
    /// Useful with a paused clock to test deadlines and cancellation.
    pub fn queue_stalled_stream(&self, events: Vec<ChunkEvent>) -> &Self {
        self.push(Ok(Script {
            items: events.into_iter().map(Ok).collect(),
            stall: true,
        }))
    }

    /// Queues an error returned from `stream` itself, before any chunk.
    pub fn queue_stream_error(&self, error: MockError) -> &Self {
        self.push(Err(error))
    }

    /// Every request received, in order.
    pub fn recorded_requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().expect("mock lock poisoned").clone()
    }

    /// Number of scripts not yet consumed.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().expect("mock lock poisoned").len()
    }

    fn push(&self, script: Result<Script, MockError>) -> &Self {
        self.scripts
            .lock()
            .expect("mock lock poisoned")
            .push_back(script);
        self
    }
}

impl Provider for MockProvider {
    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, LlmError> {
        self.requests
            .lock()
            .expect("mock lock poisoned")
            .push(request.clone());
        let script = self
            .scripts
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .expect("MockProvider: no queued streams remaining")?;

        let items = futures::stream::iter(script.items.into_iter().map(|r| r.map_err(LlmError::from)));
        if script.stall {
            Ok(Box::pin(items.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(items))
        }
    }

    fn metadata(&self) -> ProviderMetadata {
        self.meta.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::StopReason;
    use crate::provider::DynProvider;
    use crate::test_helpers::{collect_stream, collect_stream_results, mock_for};
    use std::time::Duration;

    #[tokio::test]
    async fn test_streams_pop_in_order() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(vec![ChunkEvent::TextDelta("a".into())]);
        mock.queue_stream(vec![ChunkEvent::TextDelta("b".into())]);

        let first = collect_stream(mock.stream(&ProviderRequest::default()).await.unwrap()).await;
        let second = collect_stream(mock.stream(&ProviderRequest::default()).await.unwrap()).await;
        assert_eq!(first, [ChunkEvent::TextDelta("a".into())]);
        assert_eq!(second, [ChunkEvent::TextDelta("b".into())]);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_open_error() {
        let mock = mock_for("mock", "m");
        mock.queue_stream_error(MockError::Auth("bad".into()));
        let err = mock.stream(&ProviderRequest::default()).await.err().unwrap();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(mock.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_mid_stream_error() {
        let mock = mock_for("mock", "m");
        mock.queue_stream_results(vec![
            Ok(ChunkEvent::TextDelta("x".into())),
            Err(MockError::Provider {
                code: "overloaded".into(),
                message: "busy".into(),
                retryable: true,
            }),
        ]);
        let results =
            collect_stream_results(mock.stream(&ProviderRequest::default()).await.unwrap()).await;
        assert_eq!(results.len(), 2);
        assert!(results[1].as_ref().err().unwrap().is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_never_ends() {
        let mock = mock_for("mock", "m");
        mock.queue_stalled_stream(vec![ChunkEvent::StreamEnd {
            finish_reason: StopReason::EndTurn,
        }]);
        let mut stream = mock.stream(&ProviderRequest::default()).await.unwrap();
        assert!(stream.next().await.is_some());
        let next = tokio::time::timeout(Duration::from_secs(60), stream.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_records_requests_through_dyn() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(vec![]);
        let request = ProviderRequest {
            temperature: Some(0.5),
            system: Some("be brief".into()),
            ..Default::default()
        };
        let provider: &dyn DynProvider = &mock;
        let _ = provider.stream_boxed(&request).await.unwrap();
        let recorded = mock.recorded_requests();
        assert_eq!(recorded[0].temperature, Some(0.5));
        assert_eq!(recorded[0].system.as_deref(), Some("be brief"));
    }

    #[tokio::test]
    #[should_panic(expected = "no queued streams")]
    async fn test_empty_queue_panics() {
        let mock = mock_for("mock", "m");
        let _ = mock.stream(&ProviderRequest::default()).await;
    }

    #[test]
    fn test_debug_shows_queue_state() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(vec![]);
        let debug = format!("{mock:?}");
        assert!(debug.contains("queued_streams: 1"));
        assert!(debug.contains("recorded_requests: 0"));
    }
}
