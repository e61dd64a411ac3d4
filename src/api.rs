use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::sleep;

use crate::catalog::{
    CHAT_PATH, HEALTH_PATH, RATE_LIMIT_HEADER, RATE_REMAINING_HEADER, SESSION_HEADER,
    SESSIONS_PATH, TEST_KEY_PATH,
};
use crate::errors::{CliError, redact_secret, with_debug_hint};
use crate::parse::response::extract_error_detail;

/// Body of `POST /api/chat`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub user_message: String,
    pub developer_message: String,
    pub api_key: String,
    pub session_id: Option<String>,
    pub model: String,
}

impl fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatRequest")
            .field("user_message", &self.user_message)
            .field("developer_message", &self.developer_message)
            .field("api_key", &redact_secret(&self.api_key))
            .field("session_id", &self.session_id)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyCheck {
    pub valid: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: Option<String>,
    pub remaining: Option<String>,
}

pub type BodyStream = BoxStream<'static, Result<Vec<u8>, CliError>>;

/// A chat reply whose headers have arrived; the body is still in flight.
pub struct ChatStream {
    pub session_id: Option<String>,
    pub rate_limit: Option<RateLimit>,
    pub body: BodyStream,
}

impl fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStream")
            .field("session_id", &self.session_id)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

/// The two calls the conversation store depends on.
pub trait Transport: Clone + Send + Sync + 'static {
    fn check_credential(
        &self,
        credential: &str,
    ) -> impl Future<Output = Result<KeyCheck, CliError>> + Send;

    fn submit_message(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<ChatStream, CliError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    retries: u32,
    debug: bool,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub request_id: Option<String>,
    pub elapsed_ms: u128,
    pub json: Value,
}

impl ApiClient {
    pub fn new(
        base_url: String,
        timeout_ms: u64,
        retries: u32,
        debug: bool,
    ) -> Result<Self, CliError> {
        let timeout = Duration::from_millis(timeout_ms.max(1));
        // Connect timeout only; chat bodies stream open-ended. JSON calls set a per-request timeout.
        let client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            timeout,
            retries,
            debug,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_json(&self, path: &str) -> Result<ApiResponse, CliError> {
        self.request_json(Method::GET, path, None, true).await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Result<ApiResponse, CliError> {
        self.request_json(Method::POST, path, Some(body), false)
            .await
    }

    pub async fn delete_json(&self, path: &str) -> Result<ApiResponse, CliError> {
        self.request_json(Method::DELETE, path, None, false).await
    }

    pub async fn health(&self) -> Result<ApiResponse, CliError> {
        self.get_json(HEALTH_PATH).await
    }

    pub async fn create_session(&self, developer_message: &str) -> Result<ApiResponse, CliError> {
        self.post_json(
            SESSIONS_PATH,
            json!({ "developer_message": developer_message }),
        )
        .await
    }

    pub async fn session_info(&self, session_id: &str) -> Result<ApiResponse, CliError> {
        self.get_json(&session_path(session_id)?).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<ApiResponse, CliError> {
        self.delete_json(&session_path(session_id)?).await
    }

    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        idempotent: bool,
    ) -> Result<ApiResponse, CliError> {
        let url = join_url(&self.base_url, path);
        let max_attempts = if idempotent {
            self.retries.saturating_add(1)
        } else {
            1
        };

        for attempt in 0..max_attempts {
            let started = Instant::now();
            tracing::debug!(%method, %url, attempt, "sending request");
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .timeout(self.timeout);

            if let Some(ref payload) = body {
                request = request.json(payload);
            }

            let response = request.send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let request_id = header_text(resp.headers(), "x-request-id");

                    let text = resp.text().await.unwrap_or_default();
                    if is_retryable_status(status) && idempotent && attempt + 1 < max_attempts {
                        sleep(backoff_delay_ms(attempt)).await;
                        continue;
                    }

                    let parsed = parse_body(&text);
                    if status.is_success() {
                        return Ok(ApiResponse {
                            request_id,
                            elapsed_ms: started.elapsed().as_millis(),
                            json: parsed,
                        });
                    }

                    return Err(self.http_error(status, request_id, parsed, body.as_ref()));
                }
                Err(err) => {
                    let transient = err.is_timeout() || err.is_connect() || err.is_request();
                    if transient && idempotent && attempt + 1 < max_attempts {
                        sleep(backoff_delay_ms(attempt)).await;
                        continue;
                    }

                    let message = if err.is_timeout() {
                        "Request timed out.".to_string()
                    } else {
                        format!("Network request failed: {err}")
                    };
                    return Err(CliError::Network(with_debug_hint(&message, self.debug)));
                }
            }
        }

        Err(CliError::Network(with_debug_hint(
            "Request failed after retries.",
            self.debug,
        )))
    }

    fn http_error(
        &self,
        status: StatusCode,
        request_id: Option<String>,
        payload: Value,
        sent: Option<&Value>,
    ) -> CliError {
        let message = extract_error_detail(&payload).unwrap_or_else(|| {
            format!(
                "Request failed with status {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string()
        });

        let mut details = message;
        if let Some(id) = request_id {
            details.push_str(&format!(" (request_id: {id})"));
        }
        if self.debug {
            let mut payload_text = payload.to_string();
            if let Some(key) = sent
                .and_then(|b| b.get("api_key"))
                .and_then(|v| v.as_str())
                .filter(|k| !k.is_empty())
            {
                payload_text = payload_text.replace(key, &redact_secret(key));
            }
            details.push_str(&format!(" payload={payload_text}"));
        }

        match status.as_u16() {
            400 | 404 | 422 => CliError::Usage(details),
            401 | 403 => CliError::Auth(details),
            429 => CliError::RateLimited(details),
            500..=599 => CliError::Server(details),
            _ => CliError::Generic(details),
        }
    }

    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ChatStream, CliError> {
        let url = join_url(&self.base_url, CHAT_PATH);
        tracing::debug!(%url, model = %request.model, session = ?request.session_id, "opening chat stream");

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| CliError::Network(format!("Stream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let request_id = header_text(response.headers(), "x-request-id");
            let text = response.text().await.unwrap_or_default();
            let sent = json!({ "api_key": request.api_key });
            return Err(self.http_error(status, request_id, parse_body(&text), Some(&sent)));
        }

        let headers = response.headers();
        let session_id = header_text(headers, SESSION_HEADER);
        let rate_limit = rate_limit_from(headers);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(CliError::from))
            .boxed();

        Ok(ChatStream {
            session_id,
            rate_limit,
            body,
        })
    }
}

impl Transport for ApiClient {
    async fn check_credential(&self, credential: &str) -> Result<KeyCheck, CliError> {
        let res = self
            .post_json(TEST_KEY_PATH, json!({ "api_key": credential }))
            .await?;
        Ok(serde_json::from_value(res.json)?)
    }

    async fn submit_message(&self, request: &ChatRequest) -> Result<ChatStream, CliError> {
        self.open_chat_stream(request).await
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str::<Value>(text).unwrap_or_else(|_| json!({ "raw": text }))
    }
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn rate_limit_from(headers: &HeaderMap) -> Option<RateLimit> {
    let limit = header_text(headers, RATE_LIMIT_HEADER);
    let remaining = header_text(headers, RATE_REMAINING_HEADER);
    if limit.is_none() && remaining.is_none() {
        return None;
    }
    Some(RateLimit { limit, remaining })
}

fn session_path(session_id: &str) -> Result<String, CliError> {
    let id = session_id.trim();
    if id.is_empty() || id.contains('/') {
        return Err(CliError::Usage(format!("Invalid session id '{session_id}'.")));
    }
    Ok(format!("{SESSIONS_PATH}/{id}"))
}

fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn backoff_delay_ms(attempt: u32) -> Duration {
    let pow = attempt.min(6);
    let factor = 1u64 << pow;
    Duration::from_millis(200 * factor)
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    use super::*;

    /// Accepts one connection, records the raw request, replies with `response`.
    async fn serve_once(response: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            request
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            let n = socket.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn request_body(raw: &str) -> Value {
        let (_, body) = raw.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    fn json_response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn client(base: String) -> ApiClient {
        ApiClient::new(base, 5_000, 0, true).unwrap()
    }

    #[tokio::test]
    async fn chat_stream_exposes_body_and_headers() {
        let response = "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\nx-session-id: abc123\r\nx-ratelimit-limit: 500\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n2\r\nHi\r\n6\r\n there\r\n0\r\n\r\n";
        let (base, server) = serve_once(response.to_string()).await;

        let request = ChatRequest {
            user_message: "hello".to_string(),
            developer_message: "You are a helpful AI assistant.".to_string(),
            api_key: "sk-proj-test".to_string(),
            session_id: None,
            model: "gpt-4.1-mini".to_string(),
        };
        let mut stream = client(base).submit_message(&request).await.unwrap();
        assert_eq!(stream.session_id.as_deref(), Some("abc123"));
        assert_eq!(
            stream.rate_limit,
            Some(RateLimit {
                limit: Some("500".to_string()),
                remaining: None
            })
        );

        let mut body = Vec::new();
        while let Some(chunk) = stream.body.next().await {
            body.extend(chunk.unwrap());
        }
        assert_eq!(String::from_utf8(body).unwrap(), "Hi there");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/chat "));
        let sent = request_body(&raw);
        assert_eq!(sent["user_message"], "hello");
        assert_eq!(sent["api_key"], "sk-proj-test");
        assert_eq!(sent["model"], "gpt-4.1-mini");
        assert!(sent["session_id"].is_null());
    }

    #[tokio::test]
    async fn chat_failure_status_maps_to_error() {
        let (base, _server) = serve_once(json_response(
            "500 Internal Server Error",
            r#"{"detail":"upstream exploded"}"#,
        ))
        .await;
        let request = ChatRequest {
            user_message: "hello".to_string(),
            developer_message: String::new(),
            api_key: "sk-proj-test".to_string(),
            session_id: Some("abc123".to_string()),
            model: "gpt-4".to_string(),
        };
        let err = client(base).submit_message(&request).await.unwrap_err();
        match err {
            CliError::Server(msg) => assert!(msg.contains("upstream exploded")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_credential_reads_verdict() {
        let (base, server) = serve_once(json_response(
            "200 OK",
            r#"{"valid":false,"message":"Authentication failed. Please check your API key."}"#,
        ))
        .await;
        let check = client(base).check_credential("sk-proj-abc").await.unwrap();
        assert!(!check.valid);
        assert_eq!(
            check.message.as_deref(),
            Some("Authentication failed. Please check your API key.")
        );

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/test-key "));
        assert_eq!(request_body(&raw), json!({ "api_key": "sk-proj-abc" }));
    }

    #[tokio::test]
    async fn check_credential_non_success_uses_body_detail() {
        let (base, _server) = serve_once(json_response(
            "400 Bad Request",
            r#"{"detail":"Invalid API Key format."}"#,
        ))
        .await;
        let err = client(base).check_credential("sk-proj-abc").await.unwrap_err();
        match err {
            CliError::Usage(msg) => assert!(msg.starts_with("Invalid API Key format.")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(
            join_url("http://localhost:8000/", "/api/chat"),
            "http://localhost:8000/api/chat"
        );
        assert_eq!(join_url("http://a", "https://b/x"), "https://b/x");
    }

    #[test]
    fn session_path_rejects_traversal() {
        assert_eq!(session_path(" abc ").unwrap(), "/api/sessions/abc");
        assert!(session_path("a/b").is_err());
        assert!(session_path("").is_err());
    }

    #[test]
    fn debug_output_redacts_credential() {
        let request = ChatRequest {
            user_message: "hi".to_string(),
            developer_message: String::new(),
            api_key: "sk-proj-secretvalue".to_string(),
            session_id: None,
            model: "gpt-4".to_string(),
        };
        let shown = format!("{request:?}");
        assert!(!shown.contains("secretvalue"));
    }
}
