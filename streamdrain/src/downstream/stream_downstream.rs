use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    header::{HeaderName, HeaderValue, CONTENT_TYPE},
    Method, Request, Uri,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::StreamTarget,
    error::{ConfigurationError, SinkError},
    pipeline::{encode_payload, BatchSink},
    types::ItemResult,
};

use super::HttpClient;

/// A sink that puts messages on a stream through its http messages api.
///
/// Each batch is one POST of base64 payloads. Per-message failures reported by
/// the service become failed items; any non-success status is a failed call.
/// Requests are not signed; supply an authorization header if the service needs one.
pub struct StreamDownstream {
    client: HttpClient,
    url: Uri,
    header: Option<(HeaderName, HeaderValue)>,
}

impl StreamDownstream {
    /// Create a new stream sender
    pub fn new(
        client: HttpClient,
        target: &StreamTarget,
        header: Option<(HeaderName, HeaderValue)>,
    ) -> Result<Self, ConfigurationError> {
        target.validate()?;
        let url = target
            .messages_url()
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ConfigurationError::Invalid {
                name: "MessageEndpoint",
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            url,
            header,
        })
    }

    /// Where batches are posted
    pub fn url(&self) -> &Uri {
        &self.url
    }

    fn request(&self, body: Vec<u8>) -> Result<Request<Full<Bytes>>, SinkError> {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.url.clone())
            .header(CONTENT_TYPE, "application/json");
        if let Some((header, value)) = self.header.as_ref() {
            request = request.header(header, value);
        }
        request
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| SinkError::Transport(e.into()))
    }
}

#[async_trait::async_trait]
impl BatchSink for StreamDownstream {
    async fn put_batch(&self, items: &[Bytes]) -> Result<Vec<ItemResult>, SinkError> {
        let request = self.request(encode_request(items)?)?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| SinkError::Transport(e.into()))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| SinkError::Transport(e.into()))?
            .to_bytes();
        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            log::error!("stream rejected {} messages: {status} {body}", items.len());
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response: PutMessagesResponse = serde_json::from_slice(&body)?;
        log::debug!(
            "put {} messages, {} failures",
            items.len(),
            response.failures
        );
        Ok(response.into_results())
    }
}

/// Parse `name: value` into a request header
pub fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::Invalid {
        name: "auth-header",
        reason,
    };
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| invalid("expected `name: value`".to_string()))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let mut value = HeaderValue::from_str(value.trim()).map_err(|e| invalid(e.to_string()))?;
    value.set_sensitive(true);
    Ok((name, value))
}

#[derive(Debug, Serialize)]
struct PutMessagesRequest {
    messages: Vec<PutMessagesEntry>,
}

#[derive(Debug, Serialize)]
struct PutMessagesEntry {
    key: Option<String>,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutMessagesResponse {
    #[serde(default)]
    failures: u64,
    #[serde(default)]
    entries: Vec<PutMessagesResultEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutMessagesResultEntry {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl PutMessagesResponse {
    fn into_results(self) -> Vec<ItemResult> {
        self.entries
            .into_iter()
            .map(|entry| match entry.error {
                Some(code) => ItemResult::Failed {
                    code,
                    message: entry.error_message.unwrap_or_default(),
                },
                None => ItemResult::Sent,
            })
            .collect()
    }
}

fn encode_request(items: &[Bytes]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&PutMessagesRequest {
        messages: items
            .iter()
            .map(|item| PutMessagesEntry {
                key: None,
                value: encode_payload(item),
            })
            .collect(),
    })
}

#[cfg(test)]
mod test {
    use std::{
        convert::Infallible,
        sync::{Arc, Mutex},
    };

    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request, Response};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    use crate::{
        config::StreamTarget,
        downstream::{get_client, webpki_trust},
        error::SinkError,
        pipeline::BatchSink,
        types::ItemResult,
    };

    use super::{encode_request, parse_header, PutMessagesResponse, StreamDownstream};

    #[test_log::test]
    fn request_carries_base64_values_and_null_keys() {
        let encoded = encode_request(&[Bytes::from_static(b"hello"), Bytes::from_static(b"")])
            .expect("serializable");
        assert_eq!(
            r#"{"messages":[{"key":null,"value":"aGVsbG8="},{"key":null,"value":""}]}"#,
            String::from_utf8(encoded).expect("json is utf-8")
        );
    }

    #[test_log::test]
    fn response_entries_map_to_item_results() {
        let response: PutMessagesResponse = serde_json::from_str(
            r#"{
                "failures": 1,
                "entries": [
                    {"partition": "0", "offset": 12, "timestamp": "2024-01-01T00:00:00Z"},
                    {"error": "429", "errorMessage": "throttled"}
                ]
            }"#,
        )
        .expect("valid response");
        assert_eq!(1, response.failures);
        assert_eq!(
            vec![ItemResult::Sent, ItemResult::failed("429", "throttled")],
            response.into_results()
        );
    }

    #[test_log::test]
    fn headers_parse_and_stay_out_of_logs() {
        let (name, value) = parse_header("Authorization: Bearer abc").expect("valid");
        assert_eq!("authorization", name.as_str());
        assert!(value.is_sensitive());
        assert!(parse_header("no separator").is_err());
        assert!(parse_header("bad name: x").is_err());
    }

    type Seen = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn serve_once(status: u16, reply: &'static str) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let seen: Seen = Default::default();
        let recorded = seen.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let service = service_fn(move |request: Request<Incoming>| {
                let recorded = recorded.clone();
                async move {
                    let auth = request
                        .headers()
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .map(String::from);
                    assert_eq!(
                        "/20180418/streams/ocid1.stream.test/messages",
                        request.uri().path()
                    );
                    let body = request.into_body().collect().await.expect("body").to_bytes();
                    let body = serde_json::from_slice(&body).expect("json body");
                    recorded.lock().expect("test mutex").push((auth, body));
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(status)
                            .body(Full::new(Bytes::from_static(reply.as_bytes())))
                            .expect("response"),
                    )
                }
            });
            let _ = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await;
        });
        (format!("http://{address}"), seen)
    }

    #[test_log::test(tokio::test)]
    async fn posts_a_batch_and_reads_item_failures() {
        let (endpoint, seen) = serve_once(
            200,
            r#"{"failures":1,"entries":[{"offset":1},{"error":"500","errorMessage":"boom"}]}"#,
        )
        .await;
        let sink = StreamDownstream::new(
            get_client(webpki_trust).expect("client"),
            &StreamTarget::new(endpoint, "ocid1.stream.test").expect("valid target"),
            Some(parse_header("authorization: Bearer token").expect("valid")),
        )
        .expect("valid url");

        let results = sink
            .put_batch(&[Bytes::from_static(b"a"), Bytes::from_static(b"b")])
            .await
            .expect("call succeeds");

        assert_eq!(
            vec![ItemResult::Sent, ItemResult::failed("500", "boom")],
            results
        );
        let seen = seen.lock().expect("test mutex").clone();
        assert_eq!(1, seen.len());
        assert_eq!(Some("Bearer token".to_string()), seen[0].0);
        assert_eq!("YQ==", seen[0].1["messages"][0]["value"]);
        assert!(seen[0].1["messages"][1]["key"].is_null());
    }

    #[test_log::test(tokio::test)]
    async fn error_status_fails_the_call() {
        let (endpoint, _seen) = serve_once(503, "unavailable").await;
        let sink = StreamDownstream::new(
            get_client(webpki_trust).expect("client"),
            &StreamTarget::new(endpoint, "ocid1.stream.test").expect("valid target"),
            None,
        )
        .expect("valid url");

        let error = sink
            .put_batch(&[Bytes::from_static(b"a")])
            .await
            .expect_err("503 is a failed call");
        assert!(
            matches!(error, SinkError::Status { status: 503, ref body } if body == "unavailable"),
            "{error}"
        );
    }
}
