//! One recognition call against the configured vendor, with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::http_client::Transport;
use crate::ocr::OcrError;
use crate::provider::ProviderSpec;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means a single attempt.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

/// Sends prompts plus images to the session's vendor.
#[derive(Clone)]
pub struct RequestDispatcher {
    spec: Arc<ProviderSpec>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl RequestDispatcher {
    pub fn new(spec: Arc<ProviderSpec>, transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self {
            spec,
            transport,
            retry,
        }
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    /// Recognize one image; returns the reply's content value.
    ///
    /// The final attempt's error is returned unmodified.
    pub async fn recognize(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<Value, OcrError> {
        let body = self.spec.build_request(image, mime_type, prompt)?;
        let url = self.spec.endpoint_url();
        let headers = self.spec.headers();

        let mut attempt = 0;
        loop {
            match self.attempt(&url, &headers, body.clone()).await {
                Ok(content) => return Ok(content),
                Err(e) if !e.is_retryable() || attempt >= self.retry.max_retries => return Err(e),
                Err(e) => {
                    warn!(
                        "{} request failed (attempt {}), retrying in {:?}: {}",
                        self.spec.name(),
                        attempt + 1,
                        self.retry.delay,
                        e
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, url: &str, headers: &[(String, String)], body: String) -> Result<Value, OcrError> {
        debug!("POST {} ({} bytes)", self.spec.display_url(), body.len());
        let response = self.transport.post(url, headers, body).await?;
        let text = response.text();
        debug!(
            "{} replied {} ({})",
            self.spec.name(),
            response.status,
            response.content_type().unwrap_or("no content type")
        );

        if response.is_rate_limited() {
            warn!("{} is rate limiting requests (status {})", self.spec.name(), response.status);
        }
        if !response.is_success() {
            return Err(OcrError::Http {
                provider: self.spec.name().to_string(),
                status: response.status,
                body: truncate(&text, 500),
                hint: OcrError::status_hint(response.status),
            });
        }

        self.spec.parse_reply(&text)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpResponse;
    use crate::provider::ProviderKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<HttpResponse, OcrError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<HttpResponse, OcrError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn post(&self, _url: &str, _headers: &[(String, String)], _body: String) -> Result<HttpResponse, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(HttpResponse::new(500, "exhausted")))
        }
    }

    fn dispatcher(transport: Arc<Scripted>, retries: u32) -> RequestDispatcher {
        let spec = ProviderSpec::new(ProviderKind::OpenAi, Some("gpt".into()), Some("k".into()), None).unwrap();
        RequestDispatcher::new(Arc::new(spec), transport, RetryPolicy::new(retries, Duration::ZERO))
    }

    fn ok(content: &str) -> Result<HttpResponse, OcrError> {
        let body = serde_json::json!({"choices": [{"message": {"content": content}}]});
        Ok(HttpResponse::new(200, body.to_string()))
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let t = Scripted::new(vec![ok("text")]);
        let v = dispatcher(t.clone(), 3).recognize(b"i", "image/jpeg", "p").await.unwrap();
        assert_eq!(v, Value::String("text".into()));
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let t = Scripted::new(vec![
            Err(OcrError::Transport("reset".into())),
            Ok(HttpResponse::new(502, "bad gateway")),
            ok("done"),
        ]);
        let v = dispatcher(t.clone(), 3).recognize(b"i", "image/jpeg", "p").await.unwrap();
        assert_eq!(v, Value::String("done".into()));
        assert_eq!(t.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_final_error_propagates_with_hint() {
        let t = Scripted::new(vec![
            Ok(HttpResponse::new(413, "first")),
            Ok(HttpResponse::new(413, "second")),
        ]);
        let err = dispatcher(t.clone(), 1).recognize(b"i", "image/jpeg", "p").await.unwrap_err();
        assert_eq!(t.calls.load(Ordering::SeqCst), 2);
        match err {
            OcrError::Http { status, body, hint, .. } => {
                assert_eq!(status, 413);
                assert_eq!(body, "second");
                assert!(hint.unwrap().contains("payload too large"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_payload_too_large_not_sent() {
        let spec = ProviderSpec::new(ProviderKind::Groq, None, Some("k".into()), None).unwrap();
        let t = Scripted::new(vec![]);
        let d = RequestDispatcher::new(Arc::new(spec), t.clone(), RetryPolicy::new(3, Duration::ZERO));
        let err = d
            .recognize(&vec![0u8; 4 * 1024 * 1024], "image/jpeg", "p")
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::PayloadTooLarge { .. }));
        assert_eq!(t.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ab", 3), "ab");
    }
}
