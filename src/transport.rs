//! HTTP seam shared by the completion client, the model registry and the note
//! bridge.
//!
//! Responses expose their body as a byte stream so streamed completions can be
//! decoded incrementally. Dropping the stream releases the connection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("body_present", &self.body.is_some())
            .finish()
    }
}

/// Status plus a lazily consumed body.
pub struct StreamingHttpResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl fmt::Debug for StreamingHttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingHttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl StreamingHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into a string, replacing invalid UTF-8.
    pub async fn text(mut self) -> Result<String, TransportError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, TransportError> {
        let text = self.text().await?;
        serde_json::from_str(&text).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request could not be sent: {0}")]
    Connect(String),
    #[error("response body read failed: {0}")]
    Read(String),
    #[error("response body could not be decoded: {0}")]
    Decode(String),
}

/// Abstraction over HTTP so streaming and registry code can be tested without
/// a network.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<StreamingHttpResponse, TransportError>;
}

#[async_trait]
impl<T> HttpTransport for Arc<T>
where
    T: HttpTransport + ?Sized,
{
    async fn execute(&self, request: HttpRequest) -> Result<StreamingHttpResponse, TransportError> {
        (**self).execute(request).await
    }
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<StreamingHttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|err| TransportError::Read(err.to_string()))
            })
            .boxed();

        Ok(StreamingHttpResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures_util::stream;

    use super::*;

    /// One canned reply for [`ScriptedTransport`].
    pub(crate) enum ScriptedReply {
        Respond {
            status: u16,
            chunks: Vec<Vec<u8>>,
            stall_after: bool,
        },
        NeverRespond,
        ConnectError(String),
    }

    impl ScriptedReply {
        pub(crate) fn chunks(status: u16, chunks: &[&str]) -> Self {
            ScriptedReply::Respond {
                status,
                chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                stall_after: false,
            }
        }

        pub(crate) fn stalled(status: u16, chunks: &[&str]) -> Self {
            ScriptedReply::Respond {
                status,
                chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                stall_after: true,
            }
        }

        pub(crate) fn json(status: u16, body: Value) -> Self {
            Self::chunks(status, &[body.to_string().as_str()])
        }
    }

    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        replies: Mutex<VecDeque<ScriptedReply>>,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(replies: Vec<ScriptedReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn recorded(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(
            &self,
            request: HttpRequest,
        ) -> Result<StreamingHttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted reply left");
            match reply {
                ScriptedReply::Respond {
                    status,
                    chunks,
                    stall_after,
                } => {
                    let body = stream::iter(chunks.into_iter().map(Ok));
                    let body = if stall_after {
                        body.chain(stream::pending()).boxed()
                    } else {
                        body.boxed()
                    };
                    Ok(StreamingHttpResponse { status, body })
                }
                ScriptedReply::NeverRespond => futures_util::future::pending().await,
                ScriptedReply::ConnectError(message) => Err(TransportError::Connect(message)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{ScriptedReply, ScriptedTransport};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn response_text_joins_chunks() {
        let reply = ScriptedReply::chunks(200, &["{\"a\":", "1}"]);
        let transport = ScriptedTransport::new(vec![reply]);
        let response = transport
            .execute(HttpRequest::get("http://localhost/models"))
            .await
            .unwrap();
        assert!(response.is_success());
        let value: Value = response.json().await.unwrap();
        assert_eq!(value, json!({ "a": 1 }));
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_debug_hides_values() {
        let request = HttpRequest::post_json("http://localhost", json!({}))
            .header("Authorization", "Bearer sk-secret");
        assert_eq!(request.header_value("authorization"), Some("Bearer sk-secret"));
        assert!(!format!("{request:?}").contains("sk-secret"));
    }

    #[tokio::test]
    async fn non_json_body_reports_decode_error() {
        let transport = ScriptedTransport::new(vec![ScriptedReply::chunks(200, &["<html>"])]);
        let response = transport
            .execute(HttpRequest::get("http://localhost"))
            .await
            .unwrap();
        let err = response.json::<Value>().await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
