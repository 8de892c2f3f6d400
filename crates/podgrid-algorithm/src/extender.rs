//! Remote filter / prioritize stages.
//!
//! An extender receives the pod and the nodes that survived the built-in
//! predicates as JSON, and answers with a narrower node list or with a
//! score per node:
//!
//! ```text
//! POST {url_prefix}/{filter_verb}      {pod, nodes} → {nodes, failed_nodes, error}
//! POST {url_prefix}/{prioritize_verb}  {pod, nodes} → [{host, score}]
//! ```
//!
//! Only plain `http://` endpoints are supported.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use podgrid_types::{Node, Pod};

use crate::error::{ExtenderError, ExtenderResult};
use crate::priorities::HostPriority;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtenderConfig {
    pub url_prefix: String,
    /// Empty disables the filter stage.
    pub filter_verb: String,
    /// Empty disables the prioritize stage.
    pub prioritize_verb: String,
    /// Multiplier applied to the returned scores.
    pub weight: i64,
    pub timeout_ms: u64,
}

impl Default for ExtenderConfig {
    fn default() -> Self {
        Self {
            url_prefix: String::new(),
            filter_verb: String::new(),
            prioritize_verb: String::new(),
            weight: 1,
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtenderArgs {
    pub pod: Pod,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtenderFilterResult {
    pub nodes: Vec<Node>,
    /// Node name → failure message.
    pub failed_nodes: BTreeMap<String, String>,
    /// Non-empty fails the whole call.
    pub error: String,
}

#[async_trait]
pub trait SchedulerExtender: Send + Sync {
    fn name(&self) -> &str;

    fn weight(&self) -> i64;

    fn supports_filter(&self) -> bool;

    fn supports_prioritize(&self) -> bool;

    async fn filter(&self, pod: &Pod, nodes: Vec<Node>) -> ExtenderResult<ExtenderFilterResult>;

    async fn prioritize(&self, pod: &Pod, nodes: Vec<Node>) -> ExtenderResult<Vec<HostPriority>>;
}

/// JSON-over-HTTP/1.1 extender.
pub struct HttpExtender {
    config: ExtenderConfig,
    /// `host:port` to connect to.
    address: String,
    /// Scheme and authority plus any path prefix, without trailing slash.
    base: String,
    timeout: Duration,
}

impl HttpExtender {
    pub fn new(config: ExtenderConfig) -> ExtenderResult<Self> {
        let invalid = |message: String| ExtenderError::Transport {
            extender: config.url_prefix.clone(),
            message,
        };
        let uri: http::Uri = config
            .url_prefix
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(invalid("only http:// extenders are supported".to_string()));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));
        let base = format!("http://{}{}", authority, uri.path().trim_end_matches('/'));
        let timeout = Duration::from_millis(config.timeout_ms);
        Ok(Self {
            config,
            address,
            base,
            timeout,
        })
    }

    pub fn config(&self) -> &ExtenderConfig {
        &self.config
    }

    async fn post_json<T: DeserializeOwned>(&self, verb: &str, args: &ExtenderArgs) -> ExtenderResult<T> {
        let extender = self.config.url_prefix.clone();
        let uri = format!("{}/{}", self.base, verb);
        let transport = |message: String| ExtenderError::Transport {
            extender: extender.clone(),
            message,
        };

        let call = async {
            let payload = serde_json::to_vec(args).map_err(|e| transport(e.to_string()))?;

            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| transport(e.to_string()))?;
            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| transport(e.to_string()))?;
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("POST")
                .uri(&uri)
                .header("host", &self.address)
                .header("content-type", "application/json")
                .header("user-agent", "podgrid-extender/0.1")
                .body(Full::new(Bytes::from(payload)))
                .map_err(|e| transport(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| transport(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                debug!(%status, %uri, "extender non-2xx");
                return Err(ExtenderError::Status {
                    extender: extender.clone(),
                    status: status.as_u16(),
                });
            }
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| transport(e.to_string()))?
                .to_bytes();
            serde_json::from_slice(&body).map_err(|e| ExtenderError::Decode {
                extender: extender.clone(),
                message: e.to_string(),
            })
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExtenderError::Timeout {
                extender: extender.clone(),
            }),
        }
    }
}

#[async_trait]
impl SchedulerExtender for HttpExtender {
    fn name(&self) -> &str {
        &self.config.url_prefix
    }

    fn weight(&self) -> i64 {
        self.config.weight
    }

    fn supports_filter(&self) -> bool {
        !self.config.filter_verb.is_empty()
    }

    fn supports_prioritize(&self) -> bool {
        !self.config.prioritize_verb.is_empty()
    }

    async fn filter(&self, pod: &Pod, nodes: Vec<Node>) -> ExtenderResult<ExtenderFilterResult> {
        let args = ExtenderArgs {
            pod: pod.clone(),
            nodes,
        };
        let result: ExtenderFilterResult = self.post_json(&self.config.filter_verb, &args).await?;
        if !result.error.is_empty() {
            return Err(ExtenderError::Remote {
                extender: self.config.url_prefix.clone(),
                message: result.error,
            });
        }
        Ok(result)
    }

    async fn prioritize(&self, pod: &Pod, nodes: Vec<Node>) -> ExtenderResult<Vec<HostPriority>> {
        let args = ExtenderArgs {
            pod: pod.clone(),
            nodes,
        };
        self.post_json(&self.config.prioritize_verb, &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podgrid_types::Resource;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one request with a fixed JSON body; returns the prefix to call.
    async fn one_shot_server(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            // Read headers, then as much body as content-length announces.
            loop {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let len = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + len {
                        break;
                    }
                }
            }
            let resp = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/scheduler")
    }

    fn config(url_prefix: String) -> ExtenderConfig {
        ExtenderConfig {
            url_prefix,
            filter_verb: "filter".to_string(),
            prioritize_verb: "prioritize".to_string(),
            weight: 2,
            timeout_ms: 2000,
        }
    }

    #[test]
    fn rejects_non_http_prefixes() {
        assert!(HttpExtender::new(config("https://ext:443".to_string())).is_err());
        assert!(HttpExtender::new(config("not a url".to_string())).is_err());
        let ok = HttpExtender::new(config("http://ext/api/".to_string())).unwrap();
        assert_eq!(ok.address, "ext:80");
        assert_eq!(ok.base, "http://ext/api");
    }

    #[tokio::test]
    async fn filter_decodes_result() {
        let keep = Node::new("a", Resource::new(1000, 1 << 30));
        let result = ExtenderFilterResult {
            nodes: vec![keep.clone()],
            failed_nodes: [("b".to_string(), "no gpu".to_string())].into_iter().collect(),
            error: String::new(),
        };
        let prefix = one_shot_server("200 OK", serde_json::to_string(&result).unwrap()).await;
        let ext = HttpExtender::new(config(prefix)).unwrap();

        let pod = Pod::new("default", "p");
        let out = ext
            .filter(&pod, vec![keep, Node::new("b", Resource::default())])
            .await
            .unwrap();
        assert_eq!(out.nodes.len(), 1);
        assert_eq!(out.failed_nodes["b"], "no gpu");
    }

    #[tokio::test]
    async fn remote_error_fails_the_call() {
        let body = r#"{"nodes":[],"failed_nodes":{},"error":"boom"}"#.to_string();
        let prefix = one_shot_server("200 OK", body).await;
        let ext = HttpExtender::new(config(prefix)).unwrap();
        let err = ext.filter(&Pod::new("default", "p"), Vec::new()).await.unwrap_err();
        assert!(matches!(err, ExtenderError::Remote { ref message, .. } if message == "boom"));
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let prefix = one_shot_server("500 Internal Server Error", "{}".to_string()).await;
        let ext = HttpExtender::new(config(prefix)).unwrap();
        let err = ext.prioritize(&Pod::new("default", "p"), Vec::new()).await.unwrap_err();
        assert!(matches!(err, ExtenderError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn unreachable_extender_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let ext = HttpExtender::new(config(format!("http://{addr}"))).unwrap();
        let err = ext.prioritize(&Pod::new("default", "p"), Vec::new()).await.unwrap_err();
        assert!(matches!(err, ExtenderError::Transport { .. }));
    }
}
