//! `OpenAI` `Provider` implementation.

use std::collections::HashSet;
use std::time::Duration;

use llm_typed::error::LlmError;
use llm_typed::provider::{Capability, Provider, ProviderMetadata, ProviderRequest};
use llm_typed::stream::ChunkStream;
use llm_typed::transport::Retrying;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::instrument;

use crate::config::OpenAiConfig;
use crate::convert;

/// `OpenAI` provider implementing [`Provider`].
///
/// Streams the Chat Completions API with strict tool calling and
/// `json_schema` response formats, both of which accept `anyOf`.
/// Rate limits and dropped connections are retried with backoff
/// according to [`OpenAiConfig::retry`] before a stream is handed out.
///
/// # Example
///
/// ```rust,no_run
/// use llm_typed::TypedCall;
/// use llm_typed::schema::{Record, TypeDescriptor};
/// use llm_typed_openai::{OpenAiConfig, OpenAiProvider};
///
/// # async fn example() -> Result<(), llm_typed::LlmError> {
/// let provider = OpenAiProvider::new(OpenAiConfig {
///     api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
///     model: "gpt-4o-mini".into(),
///     ..Default::default()
/// });
///
/// let city = Record::new("City").field("name", TypeDescriptor::string());
/// let outcome = TypedCall::new(city)
///     .user("Name the capital of France.")
///     .run(&provider)
///     .await?;
/// println!("{}", outcome.value.as_value());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenAiProvider {
    transport: Retrying<ChatCompletions>,
}

impl OpenAiProvider {
    /// Create a new `OpenAI` provider from configuration.
    ///
    /// If `config.client` is `Some`, that client is reused for connection
    /// pooling. Timeouts are applied per request.
    pub fn new(config: OpenAiConfig) -> Self {
        let retry = config.retry.clone();
        let client = config.client.clone().unwrap_or_default();
        Self {
            transport: Retrying::new(ChatCompletions { config, client }, retry),
        }
    }

    /// The adapter's configuration.
    pub fn config(&self) -> &OpenAiConfig {
        &self.transport.inner().config
    }
}

/// One HTTP exchange with `/chat/completions`, without retries.
#[derive(Debug)]
struct ChatCompletions {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl ChatCompletions {
    /// Headers for one request: auth, organization, then the request's
    /// own extras, which win on conflict.
    fn request_headers(&self, extra: Option<&HeaderMap>) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::with_capacity(4);
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", self.config.api_key), || {
                LlmError::Auth("API key is not a valid header value".into())
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(org) = &self.config.organization {
            headers.insert(
                "openai-organization",
                header_value(org, || {
                    LlmError::InvalidRequest("organization is not a valid header value".into())
                })?,
            );
        }
        if let Some(extra) = extra {
            headers.extend(extra.clone());
        }
        Ok(headers)
    }

    /// Build the full URL for the chat completions endpoint.
    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Send a streaming request and return the raw response once its
    /// status line has been checked.
    async fn send_request(&self, request: &ProviderRequest) -> Result<reqwest::Response, LlmError> {
        let body = convert::build_request(request, &self.config);

        let headers = self.request_headers(request.extra_headers.as_ref())?;

        let timeout = request.timeout.or(self.config.timeout);
        let mut req = self
            .client
            .post(self.completions_url())
            .headers(headers)
            .json(&body);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(|e| transport_error(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let http_status = http::StatusCode::from_u16(status.as_u16())
                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
            return Err(convert::convert_error(http_status, &body));
        }

        Ok(response)
    }
}

impl Provider for ChatCompletions {
    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, LlmError> {
        let response = self.send_request(request).await?;
        Ok(crate::stream::into_stream(response))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "openai".into(),
            model: self.config.model.clone(),
            capabilities: HashSet::from([
                Capability::Tools,
                Capability::StructuredOutput,
                Capability::NativeUnions,
            ]),
        }
    }
}

fn header_value(value: &str, err: impl FnOnce() -> LlmError) -> Result<HeaderValue, LlmError> {
    HeaderValue::from_str(value).map_err(|_| err())
}

fn transport_error(e: &reqwest::Error, timeout: Option<Duration>) -> LlmError {
    if e.is_timeout() {
        return LlmError::Timeout {
            elapsed_ms: timeout.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        };
    }
    LlmError::Http {
        status: e.status().map(|s| {
            http::StatusCode::from_u16(s.as_u16()).unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
        }),
        message: e.to_string(),
        retryable: e.is_connect() || e.is_request(),
    }
}

impl Provider for OpenAiProvider {
    #[instrument(skip_all, fields(model = %self.config().model, messages = request.messages.len()))]
    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, LlmError> {
        self.transport.stream(request).await
    }

    fn metadata(&self) -> ProviderMetadata {
        self.transport.metadata()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use llm_typed::chat::StopReason;
    use llm_typed::stream::ChunkEvent;
    use llm_typed::transport::TransportRetryConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    use super::*;

    const SSE_BODY: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    fn transport(config: OpenAiConfig) -> ChatCompletions {
        ChatCompletions {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn quick_retry(max_retries: u32) -> TransportRetryConfig {
        TransportRetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            jitter: 0.0,
            ..Default::default()
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            messages: vec![llm_typed::ChatMessage::user("hi")],
            ..Default::default()
        }
    }

    /// Reads one HTTP request, headers and body.
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }

    /// Serves each canned response on its own connection, in order.
    async fn serve(responses: Vec<(&'static str, &'static str, &'static str)>) -> (String, JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut served = 0;
            for (status, content_type, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                let reply = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
                served += 1;
            }
            served
        });
        (base_url, handle)
    }

    const RATE_LIMITED: (&str, &str, &str) = (
        "429 Too Many Requests",
        "application/json",
        r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#,
    );

    #[test]
    fn test_metadata() {
        let provider = OpenAiProvider::new(OpenAiConfig {
            model: "gpt-4o".into(),
            ..Default::default()
        });
        let meta = provider.metadata();

        assert_eq!(meta.name, "openai");
        assert_eq!(meta.model, "gpt-4o");
        assert!(meta.capabilities.contains(&Capability::Tools));
        assert!(meta.capabilities.contains(&Capability::StructuredOutput));
        assert!(meta.capabilities.contains(&Capability::NativeUnions));
    }

    #[test]
    fn test_config_is_kept() {
        let provider = OpenAiProvider::new(OpenAiConfig {
            model: "gpt-4o-mini".into(),
            retry: quick_retry(9),
            ..Default::default()
        });
        assert_eq!(provider.config().model, "gpt-4o-mini");
        assert_eq!(provider.config().retry.max_retries, 9);
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let transport = transport(OpenAiConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..Default::default()
        });
        assert_eq!(
            transport.completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_headers() {
        let transport = transport(OpenAiConfig {
            api_key: "sk-test".into(),
            organization: Some("org-1".into()),
            ..Default::default()
        });
        let mut extra = HeaderMap::new();
        extra.insert("x-trace", HeaderValue::from_static("t-1"));
        let headers = transport.request_headers(Some(&extra)).unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers["openai-organization"], "org-1");
        assert_eq!(headers["x-trace"], "t-1");
    }

    #[test]
    fn test_bad_api_key_is_auth_error() {
        let transport = transport(OpenAiConfig {
            api_key: "bad\nkey".into(),
            ..Default::default()
        });
        assert!(matches!(transport.request_headers(None), Err(LlmError::Auth(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let transport = transport(OpenAiConfig {
            api_key: "sk-test".into(),
            base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        });
        let err = transport.stream(&request()).await.err().unwrap();
        assert!(err.is_retryable(), "{err:?}");
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_by_the_provider() {
        let (base_url, server) = serve(vec![
            RATE_LIMITED,
            ("200 OK", "text/event-stream", SSE_BODY),
        ])
        .await;
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: "sk-test".into(),
            base_url,
            retry: quick_retry(2),
            ..Default::default()
        });

        let stream = provider.stream(&request()).await.unwrap();
        let events: Vec<ChunkEvent> = stream.map(Result::unwrap).collect().await;
        assert_eq!(
            events,
            vec![
                ChunkEvent::TextDelta("hi".into()),
                ChunkEvent::StreamEnd {
                    finish_reason: StopReason::EndTurn
                },
            ]
        );
        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_budget_is_bounded() {
        let (base_url, server) = serve(vec![RATE_LIMITED, RATE_LIMITED]).await;
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: "sk-test".into(),
            base_url,
            retry: quick_retry(1),
            ..Default::default()
        });

        let err = provider.stream(&request()).await.err().unwrap();
        let LlmError::RetryExhausted {
            attempts,
            last_error,
        } = err
        else {
            panic!("expected RetryExhausted, got {err:?}");
        };
        assert_eq!(attempts, 2);
        assert!(matches!(
            *last_error,
            LlmError::Http {
                status: Some(http::StatusCode::TOO_MANY_REQUESTS),
                retryable: true,
                ..
            }
        ));
        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let (base_url, server) = serve(vec![(
            "400 Bad Request",
            "application/json",
            r#"{"error":{"message":"Invalid schema","type":"invalid_request_error"}}"#,
        )])
        .await;
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: "sk-test".into(),
            base_url,
            retry: quick_retry(3),
            ..Default::default()
        });

        let err = provider.stream(&request()).await.err().unwrap();
        assert!(matches!(err, LlmError::InvalidRequest(_)), "{err:?}");
        assert_eq!(server.await.unwrap(), 1);
    }
}
