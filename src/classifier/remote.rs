//! Remote verdict endpoint
//!
//! `POST {endpoint}` with `{"data": "<item>"}`. Responses come in more than
//! one shape, so decoding tries a fixed list of fields in order:
//!
//! - approved when `status` is one of [`APPROVED_STATUSES`] (exact match)
//!   or `approved` is `true`;
//! - the message is the first non-empty string among [`MESSAGE_FIELDS`],
//!   falling back to the raw `status`.
//!
//! A body carrying neither `status` nor `approved` is an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::{Classifier, ClassifyError, Verdict, VerdictSource};

pub const APPROVED_STATUSES: [&str; 2] = ["approved", "Aprovada"];
pub const MESSAGE_FIELDS: [&str; 2] = ["message", "retorno"];

/// Decoded remote answer
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    Approved { message: String },
    Rejected { message: String },
}

impl RemoteStatus {
    pub fn decode(body: &Value) -> Result<Self, ClassifyError> {
        let obj = body
            .as_object()
            .ok_or_else(|| ClassifyError::Decode("response is not a JSON object".to_string()))?;

        let status = obj.get("status").and_then(Value::as_str);
        let approved_flag = obj.get("approved").and_then(Value::as_bool);
        if status.is_none() && approved_flag.is_none() {
            return Err(ClassifyError::Decode(
                "neither `status` nor `approved` present".to_string(),
            ));
        }

        let approved = status.map(|s| APPROVED_STATUSES.contains(&s)).unwrap_or(false)
            || approved_flag == Some(true);
        let message = first_message(obj)
            .or(status)
            .unwrap_or_default()
            .to_string();

        Ok(if approved {
            RemoteStatus::Approved { message }
        } else {
            RemoteStatus::Rejected { message }
        })
    }

    pub fn into_verdict(self) -> Verdict {
        let (approved, message) = match self {
            RemoteStatus::Approved { message } => (true, message),
            RemoteStatus::Rejected { message } => (false, message),
        };
        Verdict {
            approved,
            message,
            source: VerdictSource::Remote,
        }
    }
}

fn first_message(obj: &Map<String, Value>) -> Option<&str> {
    MESSAGE_FIELDS
        .iter()
        .filter_map(|field| obj.get(*field).and_then(Value::as_str))
        .find(|msg| !msg.is_empty())
}

pub struct RemoteClassifier {
    endpoint: String,
    client: Client,
}

impl RemoteClassifier {
    /// Fails when the HTTP client cannot be built with the given timeout
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self, ClassifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(RemoteClassifier {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, text: &str) -> Result<Verdict, ClassifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("ngrok-skip-browser-warning", "true")
            .json(&json!({ "data": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifyError::Status(status.as_u16()));
        }

        let body: Value = serde_json::from_str(&response.text().await?)?;
        let verdict = RemoteStatus::decode(&body)?.into_verdict();
        log::debug!("Remote verdict for {:?}: {}", text, verdict.approved);
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn decode(body: Value) -> Result<RemoteStatus, ClassifyError> {
        RemoteStatus::decode(&body)
    }

    #[test]
    fn test_approved_status_literals() {
        assert_eq!(
            decode(json!({"status": "approved", "message": "ok"})).unwrap(),
            RemoteStatus::Approved { message: "ok".to_string() }
        );
        assert_eq!(
            decode(json!({"status": "Aprovada"})).unwrap(),
            RemoteStatus::Approved { message: "Aprovada".to_string() }
        );
    }

    #[test]
    fn test_status_is_case_sensitive() {
        assert!(matches!(
            decode(json!({"status": "APPROVED"})).unwrap(),
            RemoteStatus::Rejected { .. }
        ));
    }

    #[test]
    fn test_boolean_flag() {
        assert!(matches!(
            decode(json!({"approved": true})).unwrap(),
            RemoteStatus::Approved { .. }
        ));
        assert!(matches!(
            decode(json!({"status": "rejected", "approved": false})).unwrap(),
            RemoteStatus::Rejected { .. }
        ));
        // Either signal is enough
        assert!(matches!(
            decode(json!({"status": "rejected", "approved": true})).unwrap(),
            RemoteStatus::Approved { .. }
        ));
    }

    #[test]
    fn test_message_priority() {
        let body = json!({"status": "x", "message": "", "retorno": "from retorno"});
        let status = decode(body).unwrap();
        assert_eq!(status, RemoteStatus::Rejected { message: "from retorno".to_string() });

        let status = decode(json!({"status": "x", "message": "m", "retorno": "r"})).unwrap();
        assert_eq!(status, RemoteStatus::Rejected { message: "m".to_string() });

        let status = decode(json!({"approved": false})).unwrap();
        assert_eq!(status, RemoteStatus::Rejected { message: String::new() });
    }

    #[test]
    fn test_unrecognized_bodies() {
        assert!(matches!(decode(json!([1, 2])), Err(ClassifyError::Decode(_))));
        assert!(matches!(decode(json!("approved")), Err(ClassifyError::Decode(_))));
        assert!(matches!(decode(json!({"result": "ok"})), Err(ClassifyError::Decode(_))));
    }

    /// Serve one HTTP response and hand back the request body
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            if name.eq_ignore_ascii_case("content-length") {
                                value.trim().parse::<usize>().ok()
                            } else {
                                None
                            }
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        let _ = tx.send(text[header_end + 4..].to_string());
                        break;
                    }
                }
            }

            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}",
                status_line,
                body.len(),
                format!("Connection: close\r\n\r\n{}", body)
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (format!("http://{}/api/check", addr), rx)
    }

    #[tokio::test]
    async fn test_remote_approval() {
        let body = r#"{"status":"approved","message":"Valid email format"}"#;
        let (endpoint, request) = serve_once("HTTP/1.1 200 OK", body).await;
        let classifier = RemoteClassifier::new(&endpoint, 5).unwrap();

        let verdict = classifier.classify("a@b.com").await.unwrap();
        assert!(verdict.approved);
        assert_eq!(verdict.message, "Valid email format");
        assert_eq!(verdict.source, VerdictSource::Remote);

        let sent: Value = serde_json::from_str(&request.await.unwrap()).unwrap();
        assert_eq!(sent, json!({"data": "a@b.com"}));
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let (endpoint, _request) = serve_once("HTTP/1.1 503 Service Unavailable", "{}").await;
        let classifier = RemoteClassifier::new(&endpoint, 5).unwrap();

        let err = classifier.classify("a@b.com").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Status(503)));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (endpoint, _request) = serve_once("HTTP/1.1 200 OK", "<html>oops</html>").await;
        let classifier = RemoteClassifier::new(&endpoint, 5).unwrap();

        let err = classifier.classify("a@b.com").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Json(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let classifier = RemoteClassifier::new(&format!("http://{}/api/check", addr), 5).unwrap();
        let err = classifier.classify("a@b.com").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Http(_)));
    }
}
