use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use oip_common::codec::{legacy, rest};
use oip_common::envelope::{JSON_CONTENT_TYPE, OCTET_STREAM_CONTENT_TYPE};
use oip_common::{InferError, InferRequest, InferResponse, InferResult};

use super::{bounded, probe_timeout, PredictorClient};
use crate::config::{PredictorProtocol, ProtocolConfig};
use crate::Verb;

fn classify_reqwest_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        return "timeout";
    }
    if error.is_connect() {
        return "connect";
    }
    "other"
}

fn forward_error(error: reqwest::Error) -> InferError {
    match classify_reqwest_error(&error) {
        "timeout" | "connect" => {
            InferError::ModelNotReady(format!("upstream predictor unreachable: {error}"))
        }
        _ => InferError::Upstream {
            status: 502,
            message: error.to_string(),
        },
    }
}

/// Prefer the upstream's own `{"error": ...}` message over the raw body.
fn upstream_message(body: &[u8]) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
        if let Some(Value::String(msg)) = map.get("error") {
            return msg.clone();
        }
    }
    String::from_utf8_lossy(body).chars().take(512).collect()
}

fn malformed(err: InferError) -> InferError {
    InferError::Upstream {
        status: 502,
        message: format!("malformed upstream response: {err}"),
    }
}

/// Forwards to an upstream REST predictor speaking v1 or v2.
#[derive(Debug, Clone)]
pub struct RestPredictor {
    http: reqwest::Client,
    base_url: String,
    protocol: PredictorProtocol,
    timeout: Duration,
}

impl RestPredictor {
    pub fn new(config: &ProtocolConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url()
            .ok_or_else(|| anyhow::anyhow!("predictor host is not configured"))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()?;
        Ok(Self {
            http,
            base_url,
            protocol: config.predictor_protocol,
            timeout: config.predictor_timeout,
        })
    }

    async fn post(&self, url: &str, headers: HeaderMap, body: Vec<u8>) -> InferResult<(HeaderMap, Bytes)> {
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(forward_error)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(forward_error)?;

        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "upstream predictor returned error");
            return Err(InferError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&body),
            });
        }
        Ok((headers, body))
    }

    async fn forward_v1(&self, request: &InferRequest, verb: Verb) -> InferResult<InferResponse> {
        let action = match verb {
            Verb::Infer => "predict",
            Verb::Explain => "explain",
        };
        let url = format!("{}/v1/models/{}:{}", self.base_url, request.model_name, action);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

        let body = legacy::encode_request(request)?;
        let (_, body) = self.post(&url, headers, body).await?;
        let id = request.id.clone().unwrap_or_default();
        legacy::decode_response(&request.model_name, &id, &body).map_err(malformed)
    }

    async fn forward_v2(&self, request: &InferRequest, verb: Verb) -> InferResult<InferResponse> {
        let action = match verb {
            Verb::Infer => "infer",
            Verb::Explain => "explain",
        };
        let url = format!("{}/v2/models/{}/{}", self.base_url, request.model_name, action);

        let (body, header_len) = rest::encode_request(request)?;
        let mut headers = HeaderMap::new();
        match header_len {
            Some(len) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM_CONTENT_TYPE));
                headers.insert(rest::INFERENCE_HEADER_CONTENT_LENGTH, HeaderValue::from(len));
            }
            None => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            }
        }

        let (resp_headers, body) = self.post(&url, headers, body).await?;
        let header_len = match resp_headers.get(rest::INFERENCE_HEADER_CONTENT_LENGTH) {
            Some(v) => Some(
                v.to_str()
                    .ok()
                    .and_then(|s| s.trim().parse::<usize>().ok())
                    .ok_or_else(|| malformed(InferError::invalid("bad header length")))?,
            ),
            None => None,
        };
        rest::decode_response(body, header_len).map_err(malformed)
    }

    async fn forward(&self, request: &InferRequest, verb: Verb) -> InferResult<InferResponse> {
        let fut = async {
            match self.protocol {
                PredictorProtocol::RestV1 => self.forward_v1(request, verb).await,
                _ => self.forward_v2(request, verb).await,
            }
        };
        bounded(self.timeout, fut).await
    }

    async fn probe(&self, path: &str) -> Option<Value> {
        let url = format!("{}{}", self.base_url, path);
        let fut = async {
            let resp = match self.http.get(&url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, kind = classify_reqwest_error(&e), "probe failed");
                    return None;
                }
            };
            if !resp.status().is_success() {
                tracing::debug!(url = %url, status = resp.status().as_u16(), "probe returned non-success");
                return None;
            }
            match resp.json::<Value>().await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "probe body is not JSON");
                    None
                }
            }
        };
        match tokio::time::timeout(probe_timeout(self.timeout), fut).await {
            Ok(v) => v,
            Err(_) => {
                tracing::debug!(url = %url, "probe timed out");
                None
            }
        }
    }

    async fn v1_alive(&self) -> bool {
        self.probe("/")
            .await
            .is_some_and(|v| v.get("status") == Some(&Value::from("alive")))
    }

    async fn v2_flag(&self, path: &str, field: &str) -> bool {
        self.probe(path)
            .await
            .is_some_and(|v| v.get(field) == Some(&Value::Bool(true)))
    }
}

#[async_trait]
impl PredictorClient for RestPredictor {
    async fn infer(&self, request: &InferRequest) -> InferResult<InferResponse> {
        self.forward(request, Verb::Infer).await
    }

    async fn explain(&self, request: &InferRequest) -> InferResult<InferResponse> {
        self.forward(request, Verb::Explain).await
    }

    async fn server_live(&self) -> bool {
        match self.protocol {
            PredictorProtocol::RestV1 => self.v1_alive().await,
            _ => self.v2_flag("/v2/health/live", "live").await,
        }
    }

    async fn server_ready(&self) -> bool {
        match self.protocol {
            PredictorProtocol::RestV1 => self.v1_alive().await,
            _ => self.v2_flag("/v2/health/ready", "ready").await,
        }
    }

    async fn model_ready(&self, name: &str) -> bool {
        match self.protocol {
            // v1 servers report readiness as the string "True"
            PredictorProtocol::RestV1 => self
                .probe(&format!("/v1/models/{name}"))
                .await
                .is_some_and(|v| v.get("ready") == Some(&Value::from("True"))),
            _ => self.v2_flag(&format!("/v2/models/{name}/ready"), "ready").await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_message() {
        assert_eq!(upstream_message(br#"{"error": "boom"}"#), "boom");
        assert_eq!(upstream_message(b"plain text"), "plain text");
    }
}
